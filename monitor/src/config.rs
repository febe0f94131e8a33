mod autostart;
pub mod defaults;
mod file_config;
mod patterns;
mod properties;
mod store;

pub use file_config::{config_dir, FileConfig};
pub use patterns::{Pattern, PatternList};
pub use properties::{DomainPreference, FilterType, PolicySnapshot, PropertiesManager};
pub use store::ConfigFile;

use std::path::PathBuf;
use std::time::Duration;

pub struct Config {
    pub poll_time: Duration,
    pub keep_alive: Duration,
    pub debounce_window: Duration,
    pub send_timeout: Duration,
    pub send_attempts: u32,
    pub retry_backoff: Duration,
    pub dependency_check_interval: Duration,
    pub resources_dir: PathBuf,
    pub settings_dir: PathBuf,
    pub project: Option<String>,
    pub dry_run: bool,
    pub releases_url: String,
    pub download_url: String,
}

impl Config {
    pub fn from_file(config: &FileConfig) -> anyhow::Result<Self> {
        Ok(Self {
            poll_time: config.watcher.get_poll_time(),
            keep_alive: config.watcher.get_keep_alive(),
            debounce_window: config.watcher.get_debounce_window(),
            send_timeout: config.watcher.get_send_timeout(),
            send_attempts: config.watcher.send_attempts.max(1),
            retry_backoff: Duration::from_millis(defaults::retry_backoff_millis()),
            dependency_check_interval: config.watcher.get_dependency_check_interval(),
            resources_dir: config.resources_dir()?,
            settings_dir: match config.config_file.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => config_dir()?,
            },
            project: config.wakatime.project.clone(),
            dry_run: config.wakatime.dry_run,
            releases_url: config.wakatime.releases_url.clone(),
            download_url: config.wakatime.download_url.clone(),
        })
    }
}
