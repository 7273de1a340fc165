//! Path and filename identity.
//!
//! Mod archives are authored on Windows: backslash separators and
//! case-insensitive names. Every component that compares plugin names or
//! archive paths goes through this module so that duplicate detection,
//! master resolution and conflict grouping agree on what "the same file" is.

use unicode_normalization::UnicodeNormalization;

/// Convert Windows path separators to forward slashes
/// `Data\Textures\armor.dds` -> `Data/Textures/armor.dds`
pub fn to_forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Identity key for a plugin filename (NFC, lowercase, trimmed).
///
/// `Skyrim.esm`, ` SKYRIM.ESM ` and a decomposed-accent variant all map to
/// the same key.
pub fn plugin_key(filename: &str) -> String {
    filename.trim().nfc().collect::<String>().to_lowercase()
}

/// Check if two plugin filenames refer to the same plugin
pub fn same_plugin(a: &str, b: &str) -> bool {
    plugin_key(a) == plugin_key(b)
}

/// Normalize an archive-internal path: forward slashes, lowercase,
/// no leading `./` or slashes, no empty or `.` segments.
pub fn normalize_archive_path(path: &str) -> String {
    let lower = to_forward_slashes(path).nfc().collect::<String>().to_lowercase();
    lower
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Get the filename from a path (handles both / and \)
pub fn file_name(path: &str) -> &str {
    path.rfind(['\\', '/'])
        .map(|idx| &path[idx + 1..])
        .unwrap_or(path)
}

/// Get file extension (lowercase, without the dot)
pub fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => Some(name[idx + 1..].to_lowercase()),
        _ => None,
    }
}

/// Plugin file extensions recognized by the game
pub const PLUGIN_EXTENSIONS: &[&str] = &["esp", "esm", "esl"];

/// Returns true if the path names a plugin file (.esp/.esm/.esl)
pub fn is_plugin_file(path: &str) -> bool {
    extension(path)
        .map(|ext| PLUGIN_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}
