mod click;
mod metadata;

pub use click::{Click, NewClick};
pub use metadata::{MetaValue, Metadata};
