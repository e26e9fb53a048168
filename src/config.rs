//! Pilewatch configuration.
//!
//! Loaded from `~/.pilewatch/config.toml`, or the path given with `--config`.
//!
//! Passwords are resolved through a chain, and only when a command needs
//! the service:
//!
//! 1. `PILEWATCH_TELEMETRY_PASSWORD` / `PILEWATCH_ACTIVITY_LOG_PASSWORD`
//! 2. `password` in the matching config section

use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use jiff::SignedDuration;
use serde::Deserialize;

use crate::{
    model::DeviceSpec,
    observation::{ActivityTypes, Vocabulary},
    recommend::RecommendationSettings,
    schedule::DailyTrigger,
    storage::Storage,
};

pub const TELEMETRY_PASSWORD_VAR: &str = "PILEWATCH_TELEMETRY_PASSWORD";
pub const ACTIVITY_LOG_PASSWORD_VAR: &str = "PILEWATCH_ACTIVITY_LOG_PASSWORD";

/// Pilewatch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Outbox database. Defaults to `~/.pilewatch/outbox.sqlite`.
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Devices processed at once during a cycle.
    #[serde(default = "default_device_workers")]
    pub device_workers: usize,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// When daily cycles fire, UTC.
    #[serde(default)]
    pub daily_trigger: DailyTrigger,

    /// Minutes between recommendation passes. Zero disables them.
    #[serde(default = "default_recommendation_interval_mins")]
    pub recommendation_interval_mins: u32,

    pub telemetry: TelemetryConfig,
    pub activity_log: ActivityLogConfig,
    pub activity_types: ActivityTypes,

    #[serde(default)]
    pub vocabulary: Vocabulary,

    #[serde(default)]
    pub recommendation: RecommendationSettings,

    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TelemetryConfig {
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActivityLogConfig {
    pub url: String,
    pub login_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_device_workers() -> usize {
    1
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_recommendation_interval_mins() -> u32 {
    5
}

impl Config {
    /// Load config from `path`, or `~/.pilewatch/config.toml`.
    /// Returns an error if the file is missing or invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::path().ok_or("could not determine home directory")?,
        };

        if !path.exists() {
            return Err(format!(
                "no config file found at {}\n\
                 Create one with at minimum [telemetry], [activity-log], \
                 [activity-types] and one [[devices]] entry.",
                path.display()
            ));
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

        Self::parse(&contents, &path)
    }

    /// Parse and validate config text. `path` is only used in messages.
    pub fn parse(contents: &str, path: &Path) -> Result<Self, String> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| format!("invalid config at {}: {e}", path.display()))?;

        if config.devices.is_empty() {
            return Err(format!("no [[devices]] configured in {}", path.display()));
        }
        if let Some(device) = config.devices.iter().find(|d| d.keys.is_empty()) {
            return Err(format!(
                "device {} has no telemetry keys in {}",
                device.id,
                path.display()
            ));
        }
        for device in &config.devices {
            let mut seen = HashSet::new();
            if let Some(key) = device.keys.iter().find(|k| !seen.insert(k.as_str())) {
                return Err(format!(
                    "device {} lists key {key} twice in {}",
                    device.id,
                    path.display()
                ));
            }
        }

        Ok(config)
    }

    /// The config file path: `~/.pilewatch/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".pilewatch").join("config.toml"))
    }

    pub fn database_path(&self) -> Result<PathBuf, String> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Storage::default_path()
                .ok_or_else(|| "could not determine home directory".into()),
        }
    }

    pub fn telemetry_password(&self) -> Result<String, String> {
        resolve_password(
            env::var(TELEMETRY_PASSWORD_VAR).ok(),
            &self.telemetry.password,
            TELEMETRY_PASSWORD_VAR,
            "telemetry",
        )
    }

    pub fn activity_log_password(&self) -> Result<String, String> {
        resolve_password(
            env::var(ACTIVITY_LOG_PASSWORD_VAR).ok(),
            &self.activity_log.password,
            ACTIVITY_LOG_PASSWORD_VAR,
            "activity-log",
        )
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// `None` when recommendation passes are disabled.
    pub fn recommendation_interval(&self) -> Option<SignedDuration> {
        (self.recommendation_interval_mins > 0)
            .then(|| SignedDuration::from_mins(i64::from(self.recommendation_interval_mins)))
    }
}

/// Pick a password: a non-empty environment value wins over the file.
fn resolve_password(
    from_env: Option<String>,
    from_file: &str,
    var: &str,
    section: &str,
) -> Result<String, String> {
    if let Some(password) = from_env
        && !password.is_empty()
    {
        return Ok(password);
    }
    if !from_file.is_empty() {
        return Ok(from_file.to_string());
    }
    Err(format!(
        "no {section} password: set {var} or add `password` to [{section}]"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [telemetry]
        url = "https://tb.example.org"
        username = "tenant@example.org"
        password = "tb-secret"

        [activity-log]
        url = "https://fc.example.org/api/v1"
        login-url = "https://gk.example.org/api/login/"
        username = "farmer"

        [activity-types]
        temperature = "t-1"
        moisture = "m-1"
        acidity = "a-1"

        [[devices]]
        id = "dev-1"
        name = "Pile A probe"
        keys = ["data_TEMP_SOIL", "data_water_SOIL"]
    "#;

    fn parse(contents: &str) -> Result<Config, String> {
        Config::parse(contents, Path::new("config.toml"))
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL).unwrap();

        assert_eq!(config.device_workers, 1);
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.daily_trigger, DailyTrigger::default());
        assert_eq!(
            config.recommendation_interval(),
            Some(SignedDuration::from_mins(5))
        );
        assert_eq!(config.vocabulary, Vocabulary::default());
        assert_eq!(config.recommendation, RecommendationSettings::default());
        assert_eq!(config.activity_log.login_url, "https://gk.example.org/api/login/");
        assert_eq!(config.devices[0].keys.len(), 2);
    }

    #[test]
    fn overrides_are_read() {
        let contents = format!(
            r#"
            database = "/tmp/pilewatch/outbox.sqlite"
            device-workers = 4
            daily-trigger = "06:30"
            recommendation-interval-mins = 0

            [vocabulary]
            temperature = ["heat"]

            [recommendation]
            materials = ["manure"]
            started-on = "2025-06-01"
            {MINIMAL}"#
        );
        let config = parse(&contents).unwrap();

        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/pilewatch/outbox.sqlite")
        );
        assert_eq!(config.device_workers, 4);
        assert_eq!(config.daily_trigger.to_string(), "06:30");
        assert_eq!(config.recommendation_interval(), None);
        assert_eq!(config.vocabulary.temperature, ["heat"]);
        // Unlisted categories keep their defaults.
        assert_eq!(config.vocabulary.acidity, Vocabulary::default().acidity);
        assert_eq!(config.recommendation.materials, ["manure"]);
        assert!(config.recommendation.started_on.is_some());
    }

    #[test]
    fn bad_trigger_is_rejected() {
        let contents = format!("daily-trigger = \"25:00\"\n{MINIMAL}");
        let err = parse(&contents).unwrap_err();
        assert!(err.contains("config.toml"), "{err}");
    }

    #[test]
    fn devices_are_required() {
        let without_devices = MINIMAL.split("[[devices]]").next().unwrap();
        let err = parse(without_devices).unwrap_err();
        assert!(err.contains("no [[devices]]"), "{err}");
    }

    #[test]
    fn device_without_keys_is_rejected() {
        let contents = MINIMAL.replace(
            r#"keys = ["data_TEMP_SOIL", "data_water_SOIL"]"#,
            "keys = []",
        );
        let err = parse(&contents).unwrap_err();
        assert!(err.contains("dev-1"), "{err}");
    }

    #[test]
    fn repeated_device_key_is_rejected() {
        let contents = MINIMAL.replace(
            r#"keys = ["data_TEMP_SOIL", "data_water_SOIL"]"#,
            r#"keys = ["data_TEMP_SOIL", "data_water_SOIL", "data_TEMP_SOIL"]"#,
        );
        let err = parse(&contents).unwrap_err();
        assert!(err.contains("dev-1"), "{err}");
        assert!(err.contains("data_TEMP_SOIL twice"), "{err}");
    }

    #[test]
    fn env_password_wins() {
        let password = resolve_password(Some("env".into()), "file", "VAR", "telemetry");
        assert_eq!(password.unwrap(), "env");
    }

    #[test]
    fn empty_env_password_falls_back_to_file() {
        let password = resolve_password(Some(String::new()), "file", "VAR", "telemetry");
        assert_eq!(password.unwrap(), "file");
        let password = resolve_password(None, "file", "VAR", "telemetry");
        assert_eq!(password.unwrap(), "file");
    }

    #[test]
    fn missing_password_names_the_variable() {
        let err = resolve_password(None, "", "PILEWATCH_X", "activity-log").unwrap_err();
        assert!(err.contains("PILEWATCH_X"));
        assert!(err.contains("[activity-log]"));
    }

    #[test]
    fn load_does_not_need_passwords() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, MINIMAL.replace(r#"password = "tb-secret""#, "")).unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();

        assert!(config.telemetry.password.is_empty());
        assert!(config.activity_log.password.is_empty());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::load(Some(dir.path().join("absent.toml").as_path())).unwrap_err();
        assert!(err.contains("no config file found"), "{err}");
    }
}
