//! HTTP request handlers.

pub mod admin;
pub mod assets;
pub mod status;

pub use admin::*;
pub use assets::*;
pub use status::*;
