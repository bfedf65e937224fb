use std::path::{Component, Path};

use crate::TransferError;

/// Validates a remote file name: a single plain path component.
///
/// Rejects empty names, `.`/`..`, absolute paths, prefixes, and anything
/// containing a directory separator, so a received name can be joined onto
/// a destination root without escaping it.
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidPath("empty name".into()));
    }
    if file_name.contains(['/', '\\']) {
        return Err(TransferError::InvalidPath(format!(
            "directory separators not allowed: {file_name}"
        )));
    }

    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidPath(format!(
            "not a plain file name: {file_name}"
        ))),
    }
}
