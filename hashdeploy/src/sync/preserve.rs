//! Preserve rules: relative path prefixes that clean and clear-destination
//! passes must never delete.

/// Normalize a relative path to forward-slash form.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize a preserve entry: forward slashes, no leading `./` or `/`, no
/// trailing `/`.
fn normalize_entry(entry: &str) -> String {
    let normalized = normalize_path(entry);
    let mut trimmed = normalized.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.trim_matches('/').to_string()
}

/// Decide whether `relative_path` is protected by any preserve entry.
///
/// A path matches an entry when it is equal to it or lies underneath it.
/// Matching works on whole path segments, so `uploads` protects
/// `uploads/a.png` but not `uploads2/a.png`.
pub fn should_preserve<S: AsRef<str>>(relative_path: &str, preserve: &[S]) -> bool {
    if preserve.is_empty() {
        return false;
    }

    let path = normalize_path(relative_path);
    let path = path.trim_start_matches('/');

    preserve.iter().any(|entry| {
        let entry = normalize_entry(entry.as_ref());
        if entry.is_empty() {
            return false;
        }
        path == entry
            || path
                .strip_prefix(entry.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    })
}
