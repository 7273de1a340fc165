//! Mod content root detection.
//!
//! Archives are often packed with one or more wrapper folders around the
//! real data (`ModName v1.2/Data/meshes/...`). The rule follows how mod
//! managers pick the archive base:
//! 1. if the current level has recognized game content, stop
//! 2. else if it holds exactly one folder (ignoring `fomod`) and no real
//!    files, descend into it and repeat (at most 3 times)
//! 3. otherwise stop
//!
//! All paths here are already normalized (lowercase, forward slashes).

use std::collections::BTreeSet;

const MAX_UNWRAP_DEPTH: usize = 3;

/// Known game content folders.
const VALID_FOLDERS: &[&str] = &[
    "fonts", "interface", "menus", "meshes", "music", "scripts",
    "shaders", "sound", "strings", "textures", "trees", "video",
    "facegen", "materials", "skse", "obse", "mwse", "nvse", "fose",
    "f4se", "sfse", "distantlod", "asi", "skyproc patchers", "tools",
    "mcm", "icons", "bookart", "distantland", "mits", "splash",
    "dllplugins", "calientetools", "netscriptframework", "shadersfx",
    "enbseries", "bodyslide", "seq", "grass", "lodsettings",
    "caliente tools", "docs", "source",
];

/// Known mod file extensions.
const VALID_EXTENSIONS: &[&str] = &["esp", "esm", "esl", "bsa", "ba2", "modgroups", "ini"];

/// Installer metadata folder, never content.
pub const INSTALLER_FOLDER: &str = "fomod";

/// Documentation and preview files that don't prevent unwrapping.
fn is_ignorable_file(name: &str) -> bool {
    const IGNORE_NAMES: &[&str] = &[
        "meta.ini", "readme.txt", "readme.md", "readme",
        "license.txt", "license.md", "license",
        "changelog.txt", "changelog.md", "credits.txt",
    ];

    if IGNORE_NAMES.contains(&name) {
        return true;
    }

    const IGNORE_EXTS: &[&str] = &[
        ".txt", ".md", ".pdf", ".doc", ".docx", ".rtf", ".url", ".html",
        ".png", ".jpg", ".jpeg", ".gif", ".bmp",
    ];

    IGNORE_EXTS.iter().any(|ext| name.ends_with(ext))
}

/// Immediate children of `prefix`: (folders, files).
fn children<'a>(paths: &'a [String], prefix: &str) -> (BTreeSet<&'a str>, Vec<&'a str>) {
    let mut dirs = BTreeSet::new();
    let mut files = Vec::new();

    for path in paths {
        let Some(rest) = path.strip_prefix(prefix) else {
            continue;
        };
        match rest.split_once('/') {
            Some((dir, _)) => {
                dirs.insert(dir);
            }
            None => files.push(rest),
        }
    }

    (dirs, files)
}

fn has_valid_mod_content(dirs: &BTreeSet<&str>, files: &[&str]) -> bool {
    dirs.iter()
        .any(|d| *d != INSTALLER_FOLDER && VALID_FOLDERS.contains(d))
        || files.iter().any(|f| {
            f.rsplit_once('.')
                .map(|(_, ext)| VALID_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
}

/// Find the content root of a normalized path list.
///
/// Returns a prefix ending in `/`, or an empty string when the archive
/// root is the content root.
pub fn find_content_root(paths: &[String]) -> String {
    let mut current = String::new();

    for _ in 0..MAX_UNWRAP_DEPTH {
        let (dirs, files) = children(paths, &current);

        if has_valid_mod_content(&dirs, &files) {
            break;
        }

        let content_dirs: Vec<&str> = dirs
            .iter()
            .copied()
            .filter(|d| *d != INSTALLER_FOLDER)
            .collect();
        let has_real_files = files.iter().any(|f| !is_ignorable_file(f));

        if content_dirs.len() == 1 && !has_real_files {
            current.push_str(content_dirs[0]);
            current.push('/');
            continue;
        }

        break;
    }

    current
}

/// Map a normalized archive path to its path relative to the content
/// root, or `None` if it lies outside the root or in installer metadata.
///
/// A `data/` folder directly under the root is flattened into the root.
pub fn relative_to_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(root)?;
    let rest = rest.strip_prefix("data/").unwrap_or(rest);

    let first = rest.split('/').next().unwrap_or(rest);
    if rest.is_empty() || first == INSTALLER_FOLDER {
        return None;
    }
    Some(rest)
}
