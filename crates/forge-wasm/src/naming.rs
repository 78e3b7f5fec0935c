/// Longest session name derived from a project identifier
pub const MAX_SESSION_NAME_LEN: usize = 48;

const FALLBACK_NAME: &str = "terminal";

/// Stable URL/DOM-safe slug for a project
///
/// Uses the last path segment, lowercased, with every run of characters other
/// than ASCII letters and digits collapsed to a single `-`.
pub fn session_name_for(project: &str) -> String {
    let segment = project
        .split(['/', '\\'])
        .filter(|s| !s.trim().is_empty())
        .last()
        .unwrap_or("");

    let mut slug = String::with_capacity(segment.len());
    for ch in segment.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    slug.truncate(MAX_SESSION_NAME_LEN);
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        slug.to_string()
    }
}
