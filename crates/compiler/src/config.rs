//! Compiler configuration
//!
//! Unit-wide settings, fixed for one compilation. Defaults follow the
//! modern dialect; an `fbc.toml` next to the source (or `--config`) can
//! select legacy behavior per project.

use crate::types::{BaseType, TypeDescriptor};
use serde::Deserialize;
use std::path::Path;

/// Default type of unsuffixed numeric identifiers and bare literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericDefault {
    /// Modern dialect
    Double,
    /// Legacy dialect
    Single,
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Unit default for unsuffixed names and bare numeric literals
    pub unit_default: NumericDefault,
    /// Capacity of the GOSUB return-address stack
    pub gosub_depth: usize,
    /// Annotate each emitted block with its CFG id
    pub block_comments: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            unit_default: NumericDefault::Double,
            gosub_depth: 16,
            block_comments: false,
        }
    }
}

/// On-disk form of the config file; every key optional.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    unit_default: Option<NumericDefault>,
    gosub_depth: Option<usize>,
    block_comments: Option<bool>,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_unit_default(mut self, unit_default: NumericDefault) -> Self {
        self.unit_default = unit_default;
        self
    }

    pub fn with_gosub_depth(mut self, depth: usize) -> Self {
        self.gosub_depth = depth;
        self
    }

    pub fn with_block_comments(mut self, on: bool) -> Self {
        self.block_comments = on;
        self
    }

    /// Load settings from a TOML file, overlaying the defaults.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let file: ConfigFile = toml::from_str(&text)
            .map_err(|e| format!("bad config {}: {}", path.display(), e))?;
        let mut config = CompilerConfig::default();
        if let Some(v) = file.unit_default {
            config.unit_default = v;
        }
        if let Some(v) = file.gosub_depth {
            config.gosub_depth = v;
        }
        if let Some(v) = file.block_comments {
            config.block_comments = v;
        }
        Ok(config)
    }

    /// The descriptor for unsuffixed identifiers in this unit.
    pub fn default_numeric_type(&self) -> TypeDescriptor {
        match self.unit_default {
            NumericDefault::Double => TypeDescriptor::new(BaseType::Double),
            NumericDefault::Single => TypeDescriptor::new(BaseType::Single),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert_eq!(config.unit_default, NumericDefault::Double);
        assert_eq!(config.gosub_depth, 16);
        assert_eq!(config.default_numeric_type().base, BaseType::Double);
    }

    #[test]
    fn test_builder() {
        let config = CompilerConfig::new()
            .with_unit_default(NumericDefault::Single)
            .with_gosub_depth(32);
        assert_eq!(config.default_numeric_type().base, BaseType::Single);
        assert_eq!(config.gosub_depth, 32);
    }

    #[test]
    fn test_toml_parse() {
        let file: ConfigFile =
            toml::from_str("unit_default = \"single\"\ngosub_depth = 8\n").unwrap();
        assert_eq!(file.unit_default, Some(NumericDefault::Single));
        assert_eq!(file.gosub_depth, Some(8));
    }

    #[test]
    fn test_from_file_overlays_defaults() {
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        let path = temp.path().join("fbc.toml");
        std::fs::write(&path, "unit_default = \"single\"\ngosub_depth = 8\n").unwrap();

        let config = CompilerConfig::from_file(&path).unwrap();
        assert_eq!(config.unit_default, NumericDefault::Single);
        assert_eq!(config.gosub_depth, 8);
        // Keys absent from the file keep their defaults
        assert!(!config.block_comments);
    }

    #[test]
    fn test_from_file_rejects_missing_or_malformed() {
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        assert!(CompilerConfig::from_file(&temp.path().join("absent.toml")).is_err());

        let bad = temp.path().join("bad.toml");
        std::fs::write(&bad, "gosub_depth = \"many\"\n").unwrap();
        let err = CompilerConfig::from_file(&bad).unwrap_err();
        assert!(err.contains("bad.toml"), "{}", err);
    }
}
