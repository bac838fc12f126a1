//! Shared helper functions for Rocket route handlers.

use crate::error::ApiError;
use uuid::Uuid;

/// Parse an upload identifier from a path segment.
///
/// Returns [`ApiError::NotFound`] for malformed ids so they read like any
/// other unknown upload.
pub fn parse_upload_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::NotFound(format!("upload {id} not found")))
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_trims() {
        assert_eq!(split_list(" cars, rentals ,,renters"), vec!["cars", "rentals", "renters"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn malformed_ids_are_not_found() {
        assert!(matches!(parse_upload_id("nope"), Err(ApiError::NotFound(_))));
        let id = Uuid::new_v4();
        assert_eq!(parse_upload_id(&id.to_string()).unwrap(), id);
    }
}
