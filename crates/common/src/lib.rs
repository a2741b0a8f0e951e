//! Common types for the credential router workspace

mod secret;
mod error;

pub use secret::{PREVIEW_LEN, Secret, redact};
pub use error::{Error, Result};
