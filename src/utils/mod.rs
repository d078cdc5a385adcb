//! Shared utilities: topology document validation.

pub mod validation;

pub use validation::{validate, ValidationError, ValidationErrors};
