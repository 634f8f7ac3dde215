//! Lexical handling of the slash-separated logical paths clients send.
//!
//! These never touch the filesystem and behave the same on every platform.

/// Normalize `path` lexically: collapse repeated separators, drop `.`
/// segments, resolve `..` against the preceding segment.
///
/// `..` at the root of an absolute path is dropped; leading `..` of a
/// relative path is kept. An empty result becomes `"."`.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if rooted => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Join the non-empty `parts` with `/` and [`clean`] the result.
///
/// Returns an empty string if every part is empty.
pub fn join<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<S> = parts.into_iter().collect();
    let joined = parts
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if joined.is_empty() {
        String::new()
    } else {
        clean(&joined)
    }
}

/// Final element of `path`, ignoring trailing separators.
///
/// `""` becomes `"."` and a path of only separators becomes `"/"`.
pub fn base(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Everything but the final element of `path`, cleaned.
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => clean(&path[..=idx]),
        None => ".".to_string(),
    }
}
