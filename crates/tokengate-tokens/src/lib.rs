//! Issues and validates the service's own JWTs.

pub mod errors;
mod service;
pub mod types;


pub use errors::*;
pub use service::{current_timestamp, TokenService, RESERVED_CLAIMS};
pub use types::*;
