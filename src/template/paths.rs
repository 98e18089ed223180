// src/template/paths.rs

//! Endpoint-relative path handling.
//!
//! Paths inside an endpoint (directory under a local root, key prefix in a
//! bucket, path on a share) are plain strings with forward slashes and no
//! leading or trailing `/`. The empty string is the endpoint root.

/// Normalise a path: forward slashes, no empty or `.` segments, no
/// surrounding slashes.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join two endpoint-relative paths.
pub fn join(base: &str, rel: &str) -> String {
    let base = normalize(base);
    let rel = normalize(rel);
    match (base.is_empty(), rel.is_empty()) {
        (true, _) => rel,
        (false, true) => base,
        (false, false) => format!("{base}/{rel}"),
    }
}

/// Split into `(parent_dir, file_name)`.
pub fn split_parent(path: &str) -> (String, String) {
    let path = normalize(path);
    match path.rsplit_once('/') {
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (String::new(), path),
    }
}

/// Path of `path` relative to `base`, if `path` lies strictly below it.
pub fn strip_base(base: &str, path: &str) -> Option<String> {
    let base = normalize(base);
    let path = normalize(path);
    if base.is_empty() {
        return if path.is_empty() { None } else { Some(path) };
    }
    let rest = path.strip_prefix(&base)?;
    let rest = rest.strip_prefix('/')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}
