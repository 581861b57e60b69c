//! POSIX shell quoting and remote path helpers.

/// Quote a value for a POSIX shell.
///
/// The value is always wrapped in single quotes; an embedded single quote
/// becomes `'\''` (close, escaped quote, reopen).
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Join a relative path onto a remote directory with exactly one separator.
pub fn join_remote(dir: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if dir.is_empty() {
        return relative.to_string();
    }
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        // dir was "/" (or several slashes)
        return format!("/{relative}");
    }
    format!("{trimmed}/{relative}")
}
