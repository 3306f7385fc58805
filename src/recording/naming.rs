//! File-system names derived from a recording title.
//!
//! A title is client input, so it is only ever used as a path component after
//! it passes [`sanitize_title`]. Anything that fails falls back to a generic
//! name (`{id}` for the directory, `recording.wav` for the audio file).

/// Audio file name used when the title cannot be used.
pub const FALLBACK_STEM: &str = "recording";

/// Extension of the assembled audio file.
pub const AUDIO_EXTENSION: &str = "wav";

/// Characters that are illegal (or hostile) in a path component on at least
/// one platform we care about.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '\0'];

/// Turn a title into a safe path component.
///
/// Returns `None` for empty titles, `.`/`..`, titles with surrounding
/// whitespace, and titles containing a path separator, a null byte or any
/// other forbidden character. Inner spaces become underscores.
pub fn sanitize_title(title: &str) -> Option<String> {
    if title.is_empty() || title != title.trim() {
        return None;
    }
    if title == "." || title == ".." {
        return None;
    }
    if title.contains(FORBIDDEN) || title.chars().any(char::is_control) {
        return None;
    }
    Some(title.replace(' ', "_"))
}

/// Directory name for a recording: `{id}_{sanitized}` or just `{id}`.
pub fn directory_name(id: u64, title: &str) -> String {
    match sanitize_title(title) {
        Some(safe) => format!("{}_{}", id, safe),
        None => id.to_string(),
    }
}

/// Stem (file name without extension) of the audio file.
pub fn file_stem(title: &str) -> String {
    sanitize_title(title).unwrap_or_else(|| FALLBACK_STEM.to_string())
}

/// Audio file name: `{sanitized}.wav` or `recording.wav`.
pub fn audio_file_name(title: &str) -> String {
    format!("{}.{}", file_stem(title), AUDIO_EXTENSION)
}

/// Split a recording directory name back into `(id, title)`.
///
/// The title half keeps its underscores since the original spacing cannot
/// be recovered. Names without a numeric prefix are not ours.
pub fn parse_directory_name(name: &str) -> Option<(u64, String)> {
    let (prefix, rest) = match name.split_once('_') {
        Some((prefix, rest)) => (prefix, rest),
        None => (name, ""),
    };
    let id = prefix.parse::<u64>().ok()?;
    Some((id, rest.to_string()))
}
