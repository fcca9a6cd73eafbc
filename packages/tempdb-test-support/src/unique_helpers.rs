//! Helpers for generating unique test data
//!
//! ULID-based identifiers keep concurrently running tests from colliding on
//! the same table or database.

use ulid::Ulid;

/// Generate a lowercase SQL identifier `{prefix}_{ulid}` that needs no
/// quoting on any supported server.
///
/// ```
/// use tempdb_test_support::unique_helpers::unique_identifier;
///
/// let name = unique_identifier("t");
/// assert!(name.starts_with("t_"));
/// assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
/// ```
pub fn unique_identifier(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string().to_ascii_lowercase())
}
