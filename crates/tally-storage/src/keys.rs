//! Shared key generation for archived receipts.

const DEFAULT_FILENAME: &str = "receipt";

/// Filename from the last path segment of `url`, query and fragment removed.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, and an empty segment falls
/// back to `receipt`.
pub fn filename_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let last = without_query.rsplit('/').next().unwrap_or_default();

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // A bare ".." or "." segment would escape or alias the prefix
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        DEFAULT_FILENAME.to_string()
    } else {
        cleaned
    }
}

/// Key for an archived receipt: `receipts/{unix_millis}-{filename}`.
pub fn receipt_key(source_url: &str, unix_millis: i64) -> String {
    format!("receipts/{}-{}", unix_millis, filename_from_url(source_url))
}
