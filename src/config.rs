use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LogConfig;
use crate::models::SupplementSlot;
use crate::protocol::{PhaseDef, RehabProtocol};
use crate::score::SupplementCatalog;
use crate::streak::StreakConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application metadata
    pub metadata: ConfigMetadata,

    /// Storage locations
    pub settings: AppSettings,

    /// Rehab program the engine evaluates against
    #[serde(default)]
    pub program: ProgramConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Data directory path
    pub data_dir: PathBuf,

    /// Log database file name, relative to `data_dir`
    pub database_file: String,

    /// Preferences document file name, relative to `data_dir`
    pub preferences_file: String,
}

/// One supplement in the daily plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplementDef {
    pub id: String,
    pub name: String,
    pub slot: SupplementSlot,
}

/// Rehab program settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// Date of surgery, anchors the phase schedule
    pub surgery_date: Option<NaiveDate>,

    /// First day of the exercise program; defaults to the surgery date
    pub start_date: Option<NaiveDate>,

    /// Daily supplement plan; only these doses count toward adherence
    pub supplements: Vec<SupplementDef>,

    /// Phase schedule, ordered by start week
    pub phases: Vec<PhaseDef>,

    pub streak: StreakConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();

        AppConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            settings: AppSettings::default(),
            program: ProgramConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            data_dir: AppConfig::config_dir(),
            database_file: "logs.db".to_string(),
            preferences_file: "preferences.json".to_string(),
        }
    }
}

impl AppSettings {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join(&self.preferences_file)
    }
}

impl Default for ProgramConfig {
    fn default() -> Self {
        let supplement = |id: &str, name: &str, slot: SupplementSlot| SupplementDef {
            id: id.to_string(),
            name: name.to_string(),
            slot,
        };

        ProgramConfig {
            surgery_date: None,
            start_date: None,
            supplements: vec![
                supplement("collagen", "Collagen peptides", SupplementSlot::Fasting),
                supplement("vitamin_c", "Vitamin C", SupplementSlot::Breakfast),
                supplement("vitamin_d", "Vitamin D3", SupplementSlot::Breakfast),
                supplement("omega_3", "Omega-3", SupplementSlot::Dinner),
                supplement("magnesium", "Magnesium", SupplementSlot::Bedtime),
            ],
            phases: RehabProtocol::default().phases().to_vec(),
            streak: StreakConfig::default(),
        }
    }
}

impl ProgramConfig {
    /// Validated phase schedule
    pub fn protocol(&self) -> crate::error::Result<RehabProtocol> {
        RehabProtocol::new(self.phases.clone())
    }

    /// Planned doses from the supplement plan
    pub fn supplement_catalog(&self) -> SupplementCatalog {
        SupplementCatalog::new(self.supplements.iter().map(|s| (s.slot, s.id.clone())))
    }

    /// Program start, falling back to the surgery date
    pub fn program_start(&self) -> Option<NaiveDate> {
        self.start_date.or(self.surgery_date)
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// `~/.rehabrs`
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rehabrs")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from `path`, or the default location, falling
    /// back to defaults when the file is missing or invalid
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                // Logging is configured from this file, so it is not up yet
                eprintln!("Using default configuration ({}): {:#}", config_path.display(), e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.metadata.version, deserialized.metadata.version);
        assert_eq!(config.program, deserialized.program);
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = AppConfig::default();
        original.program.surgery_date = NaiveDate::from_ymd_opt(2024, 3, 4);
        original.program.supplements.truncate(2);

        original.save_to_file(&config_path).unwrap();
        let loaded = AppConfig::load_from_file(&config_path).unwrap();

        assert_eq!(loaded.program.surgery_date, original.program.surgery_date);
        assert_eq!(loaded.program.supplements.len(), 2);
        assert_eq!(loaded.program.program_start(), original.program.surgery_date);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let toml_str = r#"
            [metadata]
            version = "1.0"
            created_at = "2024-01-01T00:00:00Z"
            updated_at = "2024-01-01T00:00:00Z"

            [settings]
            data_dir = "/tmp/rehab"
            database_file = "logs.db"
            preferences_file = "prefs.json"
        "#;

        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.program.supplements.len(), 5);
        assert!(config.program.protocol().is_ok());
        assert_eq!(
            config.settings.preferences_path(),
            PathBuf::from("/tmp/rehab/prefs.json")
        );
    }
}
