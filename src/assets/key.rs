//! Key validation
//!
//! Every public registry entry point runs its key through [`validate_key`]
//! before touching a cache table or the backend.

use super::error::AssetError;

/// Validate a raw lookup key.
///
/// `None` stands in for a missing key. Keys are not trimmed: a key made of
/// whitespace is a valid, if odd, key.
///
/// # Errors
///
/// Returns [`AssetError::InvalidKey`] if the key is missing or empty.
pub fn validate_key(raw: Option<&str>) -> Result<&str, AssetError> {
    match raw {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(AssetError::InvalidKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_missing_and_empty() {
        assert_eq!(validate_key(None), Err(AssetError::InvalidKey));
        assert_eq!(validate_key(Some("")), Err(AssetError::InvalidKey));
    }

    #[test]
    fn test_accepts_non_empty() {
        assert_eq!(validate_key(Some("ring")), Ok("ring"));
        assert_eq!(validate_key(Some(" ")), Ok(" "));
    }
}
