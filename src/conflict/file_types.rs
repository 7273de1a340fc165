//! File type and severity classification by extension.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Coarse risk of two mods shipping the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Score floor for this class.
    pub fn base_score(&self) -> u32 {
        match self {
            Severity::Info => 0,
            Severity::Low => 10,
            Severity::Medium => 40,
            Severity::High => 70,
            Severity::Critical => 90,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Plugin,
    NativeCode,
    Script,
    Animation,
    Archive,
    Mesh,
    Interface,
    Config,
    Sequence,
    Texture,
    Sound,
    Documentation,
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Plugin => "plugin",
            FileType::NativeCode => "native_code",
            FileType::Script => "script",
            FileType::Animation => "animation",
            FileType::Archive => "archive",
            FileType::Mesh => "mesh",
            FileType::Interface => "interface",
            FileType::Config => "config",
            FileType::Sequence => "sequence",
            FileType::Texture => "texture",
            FileType::Sound => "sound",
            FileType::Documentation => "documentation",
            FileType::Other => "other",
        }
    }
}

/// (extensions, type, severity when two mods disagree)
const CLASSES: &[(&[&str], FileType, Severity)] = &[
    (&["esp", "esm", "esl"], FileType::Plugin, Severity::Critical),
    (&["dll", "exe", "asi"], FileType::NativeCode, Severity::Critical),
    (&["pex", "psc"], FileType::Script, Severity::High),
    (&["hkx"], FileType::Animation, Severity::High),
    (&["bsa", "ba2"], FileType::Archive, Severity::High),
    (&["nif", "tri", "bto", "btr"], FileType::Mesh, Severity::Medium),
    (&["swf"], FileType::Interface, Severity::Medium),
    (&["ini", "json", "toml", "xml", "yaml"], FileType::Config, Severity::Medium),
    (&["seq"], FileType::Sequence, Severity::Medium),
    (&["dds", "png", "tga", "jpg", "bmp"], FileType::Texture, Severity::Low),
    (&["wav", "xwm", "fuz", "lip", "mp3", "ogg"], FileType::Sound, Severity::Low),
    (&["txt", "md", "pdf"], FileType::Documentation, Severity::Low),
];

static BY_EXTENSION: Lazy<HashMap<&'static str, (FileType, Severity)>> = Lazy::new(|| {
    CLASSES
        .iter()
        .flat_map(|(exts, file_type, severity)| {
            exts.iter().map(move |ext| (*ext, (*file_type, *severity)))
        })
        .collect()
});

/// Classify a normalized path by its extension.
pub fn classify(path: &str) -> (FileType, Severity) {
    crate::paths::extension(path)
        .and_then(|ext| BY_EXTENSION.get(ext.as_str()).copied())
        .unwrap_or((FileType::Other, Severity::Low))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("textures/x.dds"), (FileType::Texture, Severity::Low));
        assert_eq!(classify("mod.ESP"), (FileType::Plugin, Severity::Critical));
        assert_eq!(classify("scripts/foo.pex"), (FileType::Script, Severity::High));
        assert_eq!(classify("meshes/a.nif"), (FileType::Mesh, Severity::Medium));
        assert_eq!(classify("skse/plugins/x.dll"), (FileType::NativeCode, Severity::Critical));
        assert_eq!(classify("noext"), (FileType::Other, Severity::Low));
        assert_eq!(classify("weird.xyz"), (FileType::Other, Severity::Low));
    }

    #[test]
    fn test_extensions_unique() {
        let total: usize = CLASSES.iter().map(|(e, _, _)| e.len()).sum();
        assert_eq!(BY_EXTENSION.len(), total);
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Info);
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    }
}
