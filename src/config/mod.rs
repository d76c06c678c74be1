use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer, Serialize};
use time::Duration;

pub mod themes;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "MoodDiary";
const APP_NAME: &str = "mood-diary";

pub const ENV_CONFIG: &str = "DIARY_CONFIG";
pub const ENV_DATA: &str = "DIARY_DATA";
pub const ENV_REMOTE_URL: &str = "DIARY_REMOTE_URL";
pub const ENV_REMOTE_ANON_KEY: &str = "DIARY_REMOTE_ANON_KEY";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            self.write_default_config(&default_cfg)?;
            default_cfg.post_load(&self.paths)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub backup_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(ENV_CONFIG).ok().map(PathBuf::from);
        let override_data = env::var(ENV_DATA).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));

        Ok(Self::rooted(config_dir, config_file, data_root, state_dir))
    }

    /// Lays every path out under one root directory.
    pub fn under(root: &Path) -> Self {
        let config_dir = root.join("config");
        let config_file = config_dir.join("config.toml");
        Self::rooted(config_dir, config_file, root.join("data"), root.join("state"))
    }

    fn rooted(
        config_dir: PathBuf,
        config_file: PathBuf,
        data_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            config_dir,
            config_file,
            database_path: data_dir.join("diary.db"),
            backup_dir: data_dir.join("backups"),
            log_dir: state_dir.join("logs"),
            data_dir,
            state_dir,
        }
    }

    pub fn autosave_dir(&self) -> PathBuf {
        self.state_dir.join("autosave")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.backup_dir,
            &self.log_dir,
            &self.state_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(deserialize_with = "lenient_theme")]
    pub theme: ThemeName,
    pub auto_save: AutoSaveConfig,
    pub storage: StorageOptions,
    pub remote: RemoteConfig,
    pub search: SearchOptions,
    pub display: DisplayOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        self.remote.apply_env_overrides();
        Ok(())
    }
}

/// Unknown theme names fall back to the default instead of failing the load.
fn lenient_theme<'de, D>(deserializer: D) -> Result<ThemeName, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let parsed: Result<ThemeName, serde::de::value::Error> =
        ThemeName::deserialize(raw.as_str().into_deserializer());
    Ok(parsed.unwrap_or_else(|_| {
        tracing::warn!(theme = %raw, "unknown theme in config, falling back to main");
        ThemeName::default()
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    pub debounce_ms: u64,
    pub enabled: bool,
    pub crash_recovery: bool,
    /// Retain crash-recovery snapshots for this many hours (0 = keep indefinitely)
    pub snapshot_retention_hours: u64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 3_000,
            enabled: true,
            crash_recovery: true,
            snapshot_retention_hours: 24 * 7,
        }
    }
}

impl AutoSaveConfig {
    pub fn debounce_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_ms)
    }

    /// `None` keeps snapshots forever, which is also what an unrepresentable
    /// retention means.
    pub fn snapshot_retention(&self) -> Option<Duration> {
        if self.snapshot_retention_hours == 0 {
            return None;
        }
        i64::try_from(self.snapshot_retention_hours)
            .ok()
            .and_then(|hours| hours.checked_mul(3_600))
            .map(Duration::seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    #[serde(skip)]
    pub backup_dir: PathBuf,
    pub wal_autocheckpoint: u32,
    pub backup_on_exit: bool,
    /// Write the two welcome entries into a brand-new store
    pub seed_first_run: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            backup_dir: PathBuf::new(),
            wal_autocheckpoint: 1000,
            backup_on_exit: false,
            seed_first_run: true,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        if self.backup_dir.as_os_str().is_empty() {
            self.backup_dir = paths.backup_dir.clone();
        }
        Ok(())
    }
}

/// Credentials for the hosted backend. Both `url` and `anon_key` must be set
/// for cloud features to switch on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    pub table: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            table: "diary_entries".to_string(),
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env::var(ENV_REMOTE_URL).ok().filter(|v| !v.trim().is_empty()) {
            self.url = url;
        }
        if let Some(key) = env::var(ENV_REMOTE_ANON_KEY)
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            self.anon_key = key;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub max_results: usize,
    pub regex_default: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 200,
            regex_default: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    pub preview_chars: usize,
    pub list_limit: usize,
    pub trend_days: u32,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            preview_chars: 120,
            list_limit: 50,
            trend_days: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeName {
    System,
    #[default]
    Main,
    Sunset,
    Ocean,
    Forest,
    Lavender,
}
