use anyhow::{anyhow, Context};
use serde::Deserialize;
use serde_default::DefaultFromSerde;
use std::{fs, io::ErrorKind, path::PathBuf, time::Duration};

use crate::config::defaults;

pub fn default_config() -> String {
    format!(
        r#"# The commented values are the defaults on the file creation
[watcher]
# poll-time-seconds = {}
# keep-alive-seconds = {}
# debounce-window-seconds = {}
# send-timeout-seconds = {}
# send-attempts = {}
# dependency-check-hours = {}

[wakatime]
# The directory where wakatime-cli is installed, "~/.wakatime" if not set.
# resources-dir = "~/.wakatime"
# project = "desktop"
# dry-run = false
# releases-url = "{}"
# download-url = "{}"

# Which applications and domains are tracked is not configured here:
# the monitoring policy lives in settings.toml next to this file and is changed
# with "wakawatcher monitor" and "wakawatcher policy".
"#,
        defaults::poll_time_seconds(),
        defaults::keep_alive_seconds(),
        defaults::debounce_window_seconds(),
        defaults::send_timeout_seconds(),
        defaults::send_attempts(),
        defaults::dependency_check_hours(),
        defaults::releases_url(),
        defaults::download_url(),
    )
}

#[derive(Deserialize, DefaultFromSerde)]
#[serde(rename_all = "kebab-case")]
pub struct WatcherConfig {
    #[serde(default = "defaults::poll_time_seconds")]
    pub poll_time_seconds: u32,
    #[serde(default = "defaults::keep_alive_seconds")]
    pub keep_alive_seconds: u32,
    #[serde(default = "defaults::debounce_window_seconds")]
    pub debounce_window_seconds: u32,
    #[serde(default = "defaults::send_timeout_seconds")]
    pub send_timeout_seconds: u32,
    #[serde(default = "defaults::send_attempts")]
    pub send_attempts: u32,
    #[serde(default = "defaults::dependency_check_hours")]
    pub dependency_check_hours: u32,
}

impl WatcherConfig {
    /// At least a second, the polling interval can't be empty.
    pub fn get_poll_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_time_seconds.max(1)))
    }

    pub fn get_keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_seconds))
    }

    pub fn get_debounce_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.debounce_window_seconds))
    }

    pub fn get_send_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.send_timeout_seconds))
    }

    /// At least an hour, releases are not polled more often.
    pub fn get_dependency_check_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.dependency_check_hours.max(1)) * 3600)
    }
}

#[derive(Deserialize, DefaultFromSerde)]
#[serde(rename_all = "kebab-case")]
pub struct WakatimeConfig {
    #[serde(default)]
    pub resources_dir: Option<PathBuf>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "defaults::releases_url")]
    pub releases_url: String,
    #[serde(default = "defaults::download_url")]
    pub download_url: String,
}

#[derive(Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub wakatime: WakatimeConfig,
    #[serde(default)]
    pub config_file: PathBuf,
}

pub fn expand_home(path: PathBuf) -> anyhow::Result<PathBuf> {
    if path.starts_with("~/") {
        Ok(dirs::home_dir()
            .ok_or(anyhow!("Home directory is not found"))?
            .join(path.strip_prefix("~").unwrap_or(&path)))
    } else {
        Ok(path)
    }
}

pub fn config_dir() -> anyhow::Result<PathBuf> {
    let mut path: PathBuf = dirs::config_dir().ok_or(anyhow!("Config directory is unknown"))?;
    path.push("wakawatcher");

    Ok(path)
}

impl FileConfig {
    pub fn new(config_override: Option<PathBuf>) -> anyhow::Result<Self> {
        let is_config_overridden = config_override.is_some();
        let config_path = if let Some(config_override) = config_override {
            expand_home(config_override)?
        } else {
            config_dir()?.join("config.toml")
        };

        let mut config = if fs::metadata(&config_path).is_ok() {
            debug!("Reading config at {}", config_path.display());
            let config_content = std::fs::read_to_string(&config_path).with_context(|| {
                format!("Impossible to read config file {}", config_path.display())
            })?;

            toml::from_str(&config_content)?
        } else {
            if is_config_overridden {
                anyhow::bail!("Config file is not accessible at {}", config_path.display());
            }
            let config = default_config();
            if let Some(parent) = config_path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    if e.kind() != ErrorKind::AlreadyExists {
                        Err(e)?;
                    }
                }
            }
            debug!("Creating config at {}", config_path.display());
            std::fs::write(&config_path, config)?;

            Self::default()
        };
        config.config_file = config_path;

        Ok(config)
    }

    pub fn resources_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.wakatime.resources_dir {
            Some(dir) => expand_home(dir.clone()),
            None => Ok(dirs::home_dir()
                .ok_or(anyhow!("Home directory is not found"))?
                .join(".wakatime")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[rstest]
    fn all() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[watcher]
poll-time-seconds = 4
keep-alive-seconds = 60
debounce-window-seconds = 15
send-timeout-seconds = 10
send-attempts = 5
dependency-check-hours = 12

[wakatime]
resources-dir = "/opt/wakatime"
project = "desktop"
dry-run = true
        "#
        )
        .unwrap();

        let config = FileConfig::new(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(4, config.watcher.poll_time_seconds);
        assert_eq!(60, config.watcher.keep_alive_seconds);
        assert_eq!(Duration::from_secs(15), config.watcher.get_debounce_window());
        assert_eq!(10, config.watcher.send_timeout_seconds);
        assert_eq!(5, config.watcher.send_attempts);
        assert_eq!(
            Duration::from_secs(12 * 3600),
            config.watcher.get_dependency_check_interval()
        );

        assert_eq!(
            PathBuf::from("/opt/wakatime"),
            config.resources_dir().unwrap()
        );
        assert_eq!(Some("desktop".to_string()), config.wakatime.project);
        assert!(config.wakatime.dry_run);
        assert_eq!(defaults::releases_url(), config.wakatime.releases_url);
    }

    #[rstest]
    fn empty() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[watcher]").unwrap();

        let config = FileConfig::new(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(
            defaults::poll_time_seconds(),
            config.watcher.poll_time_seconds
        );
        assert_eq!(
            defaults::keep_alive_seconds(),
            config.watcher.keep_alive_seconds
        );
        assert_eq!(
            defaults::debounce_window_seconds(),
            config.watcher.debounce_window_seconds
        );
        assert_eq!(defaults::send_attempts(), config.watcher.send_attempts);
        assert_eq!(None, config.wakatime.project);
        assert!(!config.wakatime.dry_run);
    }

    #[rstest]
    fn zero_intervals_are_raised_to_the_minimum() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "[watcher]\npoll-time-seconds = 0\ndependency-check-hours = 0\n"
        )
        .unwrap();

        let config = FileConfig::new(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(Duration::from_secs(1), config.watcher.get_poll_time());
        assert_eq!(
            Duration::from_secs(3600),
            config.watcher.get_dependency_check_interval()
        );
    }

    #[rstest]
    fn default_template_is_valid() {
        let config: FileConfig = toml::from_str(&default_config()).unwrap();

        assert_eq!(
            defaults::poll_time_seconds(),
            config.watcher.poll_time_seconds
        );
        assert_eq!(defaults::download_url(), config.wakatime.download_url);
    }

    #[rstest]
    fn wrong_file() {
        let file = PathBuf::new();

        let config = FileConfig::new(Some(file));

        assert!(config.is_err());
        assert_eq!(
            "Config file is not accessible at ",
            config.err().unwrap().to_string()
        );
    }
}
