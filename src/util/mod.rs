//! Utility functions for common operations.
//!
//! - **URL validation**: security-focused validation to prevent SSRF when
//!   subscribing to or following redirects to a feed URL
//! - **Text processing**: plain-text cleanup for titles

mod text;
mod url_validator;

pub use text::{collapse_whitespace, strip_control_chars, truncate_chars};
pub use url_validator::{validate_url, UrlValidationError};
