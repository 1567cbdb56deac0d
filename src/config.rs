use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, TimeZone, Utc};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const APP_DIR: &str = ".memex-sync";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_PASSIVE_DATA_CUTOFF: &str = "2021-06-01";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub chunk_size: usize,
    pub visit_limit: usize,
    pub passive_data_cutoff: String,
    pub stage_period_minutes: f64,
    pub wipe_period_minutes: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_root_dir().join("db").join("memex.db"),
            chunk_size: 500,
            visit_limit: 20,
            passive_data_cutoff: DEFAULT_PASSIVE_DATA_CUTOFF.to_string(),
            stage_period_minutes: 60.0,
            wipe_period_minutes: 1440.0,
        }
    }
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        Ok(default_root_dir().join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }

    /// Loads the config file, falling back to defaults when none exists yet.
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        set_mode_600(config_path)?;

        Ok(())
    }

    /// Start of the passive data cutoff day (UTC) in unix milliseconds.
    pub fn passive_data_cutoff_ms(&self) -> Result<i64> {
        let date = parse_date(&self.passive_data_cutoff)?;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .context("Failed to build cutoff timestamp")?;

        Ok(Utc.from_utc_datetime(&midnight).timestamp_millis())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match normalize_config_key(key) {
            "db_path" => {
                self.db_path = expand_home(value);
            }
            "chunk_size" => {
                let parsed = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("chunk_size must be a number"))?;
                if parsed == 0 {
                    bail!("chunk_size must be greater than zero");
                }
                self.chunk_size = parsed;
            }
            "visit_limit" => {
                self.visit_limit = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("visit_limit must be a number"))?;
            }
            "passive_data_cutoff" => {
                parse_date(value)?;
                self.passive_data_cutoff = value.to_string();
            }
            "stage_period_minutes" => {
                self.stage_period_minutes = parse_period(value, "stage_period_minutes")?;
            }
            "wipe_period_minutes" => {
                self.wipe_period_minutes = parse_period(value, "wipe_period_minutes")?;
            }
            _ => {
                bail!(
                    "Unsupported config key: {key}. Supported keys: db_path|db.path, chunk_size|stage.chunk_size, visit_limit|wipe.visit_limit, passive_data_cutoff|wipe.cutoff, stage_period_minutes|stage.period_minutes, wipe_period_minutes|wipe.period_minutes"
                );
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        match normalize_config_key(key) {
            "db_path" => Some(self.db_path.display().to_string()),
            "chunk_size" => Some(self.chunk_size.to_string()),
            "visit_limit" => Some(self.visit_limit.to_string()),
            "passive_data_cutoff" => Some(self.passive_data_cutoff.clone()),
            "stage_period_minutes" => Some(self.stage_period_minutes.to_string()),
            "wipe_period_minutes" => Some(self.wipe_period_minutes.to_string()),
            _ => None,
        }
    }
}

fn normalize_config_key(key: &str) -> &str {
    match key {
        "db_path" | "db.path" => "db_path",
        "chunk_size" | "stage.chunk_size" => "chunk_size",
        "visit_limit" | "wipe.visit_limit" => "visit_limit",
        "passive_data_cutoff" | "wipe.cutoff" => "passive_data_cutoff",
        "stage_period_minutes" | "stage.period_minutes" => "stage_period_minutes",
        "wipe_period_minutes" | "wipe.period_minutes" => "wipe_period_minutes",
        _ => key,
    }
}

fn parse_period(value: &str, key: &str) -> Result<f64> {
    let minutes = value
        .parse::<f64>()
        .map_err(|_| anyhow!("{key} must be a number"))?;
    if !minutes.is_finite() || minutes <= 0.0 {
        bail!("{key} must be a positive number of minutes");
    }
    Ok(minutes)
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date format: {value}. Example: 2021-06-01"))
}

pub fn expand_home(raw: &str) -> PathBuf {
    raw.strip_prefix("~/")
        .and_then(|stripped| home_dir().map(|home| home.join(stripped)))
        .unwrap_or_else(|| PathBuf::from(raw))
}

fn default_root_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn set_mode_600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set file permissions: {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Config;
    use tempfile::tempdir;

    #[test]
    fn dotted_aliases_set_the_same_field() {
        let mut config = Config::default();
        config.set_value("wipe.visit_limit", "7").expect("set");
        assert_eq!(config.visit_limit, 7);
        assert_eq!(config.get_value("visit_limit").as_deref(), Some("7"));
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set_value("chunk_size", "0").is_err());
        assert!(config.set_value("wipe.cutoff", "06/01/2021").is_err());
        assert!(config.set_value("stage.period_minutes", "-5").is_err());
        assert!(config.set_value("unknown", "1").is_err());
        assert_eq!(config.chunk_size, 500);
    }

    #[test]
    fn cutoff_is_start_of_day_utc() {
        let mut config = Config::default();
        config.set_value("wipe.cutoff", "1970-01-02").expect("set");
        assert_eq!(config.passive_data_cutoff_ms().expect("cutoff"), 86_400_000);
    }

    #[test]
    fn save_and_load_round_trip_with_defaults_for_missing_fields() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.set_value("stage.chunk_size", "50").expect("set");
        config.save_to(&path).expect("save");
        let loaded = Config::load_from(&path).expect("load");
        assert_eq!(loaded.chunk_size, 50);

        std::fs::write(&path, r#"{"visit_limit": 3}"#).expect("write partial");
        let partial = Config::load_from(&path).expect("load partial");
        assert_eq!(partial.visit_limit, 3);
        assert_eq!(partial.chunk_size, 500);
    }
}
