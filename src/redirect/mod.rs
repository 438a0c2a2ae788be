pub mod handlers;
pub mod ip_extractor;
pub mod routes;

pub use handlers::{RedirectState, SIGNATURE_PARAM};
pub use routes::create_redirect_router;
