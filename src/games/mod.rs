//! Game type definitions.
//!
//! This module defines supported games and the properties the analyzer
//! needs from them: Nexus domain names for catalog lookups and the plugin
//! header flag layout.

use serde::{Deserialize, Serialize};

/// Supported game types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    /// The Elder Scrolls V: Skyrim Special Edition
    #[default]
    SkyrimSE,
    /// The Elder Scrolls V: Skyrim (2011)
    Skyrim,
    /// Fallout 4
    Fallout4,
    /// Fallout: New Vegas
    FalloutNV,
    /// Fallout 3
    Fallout3,
    /// The Elder Scrolls IV: Oblivion
    Oblivion,
    /// The Elder Scrolls III: Morrowind
    Morrowind,
    /// Starfield
    Starfield,
}

impl GameType {
    /// Returns the display name for this game.
    pub fn name(&self) -> &'static str {
        match self {
            GameType::SkyrimSE => "Skyrim Special Edition",
            GameType::Skyrim => "Skyrim",
            GameType::Fallout4 => "Fallout 4",
            GameType::FalloutNV => "Fallout: New Vegas",
            GameType::Fallout3 => "Fallout 3",
            GameType::Oblivion => "Oblivion",
            GameType::Morrowind => "Morrowind",
            GameType::Starfield => "Starfield",
        }
    }

    /// Returns the Nexus Mods domain name for this game.
    pub fn nexus_domain(&self) -> &'static str {
        match self {
            GameType::SkyrimSE => "skyrimspecialedition",
            GameType::Skyrim => "skyrim",
            GameType::Fallout4 => "fallout4",
            GameType::FalloutNV => "newvegas",
            GameType::Fallout3 => "fallout3",
            GameType::Oblivion => "oblivion",
            GameType::Morrowind => "morrowind",
            GameType::Starfield => "starfield",
        }
    }

    /// Header flag bit marking a light (ESL) plugin, if the game has them.
    pub fn light_flag(&self) -> Option<u32> {
        match self {
            GameType::SkyrimSE | GameType::Fallout4 => Some(0x200),
            GameType::Starfield => Some(0x100),
            _ => None,
        }
    }

    /// Parses a game type from a Nexus domain name or a common alias.
    pub fn from_nexus_domain(domain: &str) -> Option<Self> {
        match domain.to_lowercase().as_str() {
            "skyrimspecialedition" | "sse" | "skyrimse" => Some(GameType::SkyrimSE),
            "skyrim" => Some(GameType::Skyrim),
            "fallout4" | "fo4" => Some(GameType::Fallout4),
            "newvegas" | "falloutnv" | "fnv" => Some(GameType::FalloutNV),
            "fallout3" | "fo3" => Some(GameType::Fallout3),
            "oblivion" => Some(GameType::Oblivion),
            "morrowind" => Some(GameType::Morrowind),
            "starfield" => Some(GameType::Starfield),
            _ => None,
        }
    }
}

impl std::fmt::Display for GameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for GameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameType::from_nexus_domain(s).ok_or_else(|| format!("unknown game: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_type_properties() {
        let skyrim = GameType::SkyrimSE;
        assert_eq!(skyrim.name(), "Skyrim Special Edition");
        assert_eq!(skyrim.nexus_domain(), "skyrimspecialedition");
        assert_eq!(skyrim.light_flag(), Some(0x200));
        assert_eq!(GameType::Starfield.light_flag(), Some(0x100));
        assert_eq!(GameType::Oblivion.light_flag(), None);
    }

    #[test]
    fn test_game_type_display() {
        assert_eq!(GameType::SkyrimSE.to_string(), "Skyrim Special Edition");
    }

    #[test]
    fn test_from_nexus_domain() {
        assert_eq!(
            GameType::from_nexus_domain("skyrimspecialedition"),
            Some(GameType::SkyrimSE)
        );
        assert_eq!(
            GameType::from_nexus_domain("SKYRIMSPECIALEDITION"),
            Some(GameType::SkyrimSE)
        );
        assert_eq!(GameType::from_nexus_domain("newvegas"), Some(GameType::FalloutNV));
        assert_eq!(GameType::from_nexus_domain("cyberpunk2077"), None);
        assert_eq!("fo4".parse::<GameType>(), Ok(GameType::Fallout4));
    }
}
