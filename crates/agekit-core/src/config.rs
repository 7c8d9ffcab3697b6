use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AgekitError, AgekitResult};

/// Smallest scrypt work factor (log2 N) accepted anywhere.
pub const MIN_WORK_FACTOR: u8 = 2;

/// Largest scrypt work factor (log2 N) accepted anywhere.
pub const MAX_WORK_FACTOR: u8 = 30;

/// Top-level configuration (loaded from agekit.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgekitConfig {
    pub scrypt: ScryptConfig,
    pub output: OutputConfig,
    pub identity: IdentityConfig,
    pub log: LogConfig,
}

impl AgekitConfig {
    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> AgekitResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {} (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AgekitError::Config(format!("parsing {}: {e}", path.display())))?;
        config.scrypt.validate()?;
        Ok(config)
    }

    /// Render the active configuration back to TOML.
    pub fn to_toml(&self) -> AgekitResult<String> {
        toml::to_string_pretty(self).map_err(|e| AgekitError::Config(e.to_string()))
    }
}

/// Passphrase (scrypt) parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScryptConfig {
    /// log2 N used when encrypting to a passphrase (default: 18)
    pub work_factor: u8,
    /// Largest log2 N accepted when decrypting (default: 22)
    pub max_work_factor: u8,
}

impl Default for ScryptConfig {
    fn default() -> Self {
        Self {
            work_factor: 18,
            max_work_factor: 22,
        }
    }
}

impl ScryptConfig {
    pub fn validate(&self) -> AgekitResult<()> {
        for (name, value) in [
            ("work_factor", self.work_factor),
            ("max_work_factor", self.max_work_factor),
        ] {
            if !(MIN_WORK_FACTOR..=MAX_WORK_FACTOR).contains(&value) {
                return Err(AgekitError::Config(format!(
                    "scrypt {name} must be in {MIN_WORK_FACTOR}..={MAX_WORK_FACTOR}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Wrap encrypted output in ASCII armor (default: false)
    pub armor: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Default identity file used by `decrypt` when none is given
    pub file: Option<PathBuf>,
}

impl IdentityConfig {
    /// The configured identity file with a leading `~/` expanded.
    pub fn resolved_file(&self) -> Option<PathBuf> {
        self.file.as_deref().map(expand_tilde)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgekitConfig::default();
        assert_eq!(config.scrypt.work_factor, 18);
        assert_eq!(config.scrypt.max_work_factor, 22);
        assert!(!config.output.armor);
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = AgekitConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.scrypt, ScryptConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("agekit.toml");
        std::fs::write(&path, "[scrypt]\nmax_work_factor = 16\n\n[log]\nformat = \"json\"\n")
            .unwrap();

        let config = AgekitConfig::load(&path).unwrap();
        assert_eq!(config.scrypt.work_factor, 18);
        assert_eq!(config.scrypt.max_work_factor, 16);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn test_out_of_range_work_factor_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("agekit.toml");
        std::fs::write(&path, "[scrypt]\nwork_factor = 40\n").unwrap();

        let err = AgekitConfig::load(&path).unwrap_err();
        assert!(matches!(err, AgekitError::Config(_)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AgekitConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: AgekitConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.scrypt, config.scrypt);
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/.config/agekit/keys.txt"));
        if std::env::var("HOME").is_ok() {
            assert!(!expanded.starts_with("~"));
        }
    }
}
