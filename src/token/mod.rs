pub mod codec;
pub mod link;

pub use codec::{DecodedToken, SignedToken, TokenCodec, TokenError, URL_KEY};
pub use link::LinkGenerator;
