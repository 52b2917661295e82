//! Argument checks applied before any cache interaction.

use crate::error::ValidationError;

/// Require a string argument to be present and non-empty.
///
/// `None` stands for an absent value. Both `None` and `Some("")` fail with
/// [`ValidationError::NullOrEmpty`] naming `param`.
///
/// # Examples
///
/// ```rust
/// use queue_pool::validation::require_not_empty;
///
/// assert_eq!(require_not_empty(Some("orders"), "name").unwrap(), "orders");
///
/// let err = require_not_empty(Some(""), "name").unwrap_err();
/// assert_eq!(err.to_string(), "name cannot be null or empty.");
/// ```
pub fn require_not_empty<'a>(
    value: Option<&'a str>,
    param: &str,
) -> Result<&'a str, ValidationError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::NullOrEmpty {
            param: param.to_string(),
        }),
    }
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod tests;
