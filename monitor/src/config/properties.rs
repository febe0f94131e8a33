use super::autostart;
use super::patterns::PatternList;
use super::store::ConfigFile;
use anyhow::anyhow;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

const SETTINGS: &str = "settings";
const MONITORED_APPS: &str = "monitored_apps";
const LOG_FILE_NAME: &str = "wakawatcher.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    MonitorAll,
    Denylist,
    Allowlist,
}

impl Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterType::MonitorAll => write!(f, "all"),
            FilterType::Denylist => write!(f, "denylist"),
            FilterType::Allowlist => write!(f, "allowlist"),
        }
    }
}

impl FromStr for FilterType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" | "monitor_all" | "none" => Ok(FilterType::MonitorAll),
            "denylist" | "blacklist" => Ok(FilterType::Denylist),
            "allowlist" | "whitelist" => Ok(FilterType::Allowlist),
            other => Err(anyhow!("Unknown filter type \"{other}\"")),
        }
    }
}

/// Granularity of a browser tab host when it's matched against the lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainPreference {
    /// `docs.example.com` is compared as `example.com`.
    #[default]
    Domain,
    /// `docs.example.com` is compared as is.
    Subdomain,
}

impl Display for DomainPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainPreference::Domain => write!(f, "domain"),
            DomainPreference::Subdomain => write!(f, "subdomain"),
        }
    }
}

impl FromStr for DomainPreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "domain" => Ok(DomainPreference::Domain),
            "subdomain" => Ok(DomainPreference::Subdomain),
            other => Err(anyhow!("Unknown domain preference \"{other}\"")),
        }
    }
}

/// The view of the settings used on every policy evaluation.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    pub filter_type: FilterType,
    pub domain_preference: DomainPreference,
    pub denylist: PatternList,
    pub allowlist: PatternList,
    pub monitored_apps: HashMap<String, bool>,
    pub log_to_file: bool,
    pub launch_on_login: bool,
}

impl PolicySnapshot {
    pub fn app_override(&self, path: &str) -> Option<bool> {
        self.monitored_apps.get(path).copied()
    }
}

pub struct PropertiesManager {
    file: ConfigFile,
    cache: RwLock<Arc<PolicySnapshot>>,
    log_file_path: PathBuf,
    autostart_dir: Option<PathBuf>,
}

impl PropertiesManager {
    pub fn new(file: ConfigFile, resources_dir: &Path) -> Self {
        let snapshot = Self::read_snapshot(&file);

        Self {
            file,
            cache: RwLock::new(Arc::new(snapshot)),
            log_file_path: resources_dir.join(LOG_FILE_NAME),
            autostart_dir: autostart::default_dir(),
        }
    }

    pub fn with_autostart_dir(mut self, autostart_dir: Option<PathBuf>) -> Self {
        self.autostart_dir = autostart_dir;
        self
    }

    fn read_snapshot(file: &ConfigFile) -> PolicySnapshot {
        let filter_type = parse_or_default(file.get(SETTINGS, "filter_type", false));
        let domain_preference = parse_or_default(file.get(SETTINGS, "domain_preference", false));

        let monitored_apps = file
            .entries(MONITORED_APPS, false)
            .into_iter()
            .filter_map(|(path, value)| match parse_bool(&value) {
                Some(monitored) => Some((path, monitored)),
                None => {
                    warn!("Ignoring monitored state \"{value}\" of {path}");
                    None
                }
            })
            .collect();

        PolicySnapshot {
            filter_type,
            domain_preference,
            denylist: PatternList::parse(&split_list(file.get(SETTINGS, "denylist", false))),
            allowlist: PatternList::parse(&split_list(file.get(SETTINGS, "allowlist", false))),
            monitored_apps,
            log_to_file: file
                .get(SETTINGS, "log_to_file", false)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
            launch_on_login: file
                .get(SETTINGS, "launch_on_login", false)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
        }
    }

    /// Cached settings, rebuilt after every successful write.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.cache.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Writes and rebuilds the cache under the same lock.
    fn write(&self, change: impl FnOnce(&ConfigFile) -> anyhow::Result<()>) -> anyhow::Result<()> {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        change(&self.file)?;
        *cache = Arc::new(Self::read_snapshot(&self.file));

        Ok(())
    }

    fn set(&self, section: &str, key: &str, value: &str) -> anyhow::Result<()> {
        self.write(|file| file.set(section, key, value, false))?;
        debug!("Setting {section}.{key} is changed");

        Ok(())
    }

    pub fn filter_type(&self) -> FilterType {
        self.snapshot().filter_type
    }

    pub fn set_filter_type(&self, filter_type: FilterType) -> anyhow::Result<()> {
        self.set(SETTINGS, "filter_type", &filter_type.to_string())
    }

    pub fn domain_preference(&self) -> DomainPreference {
        self.snapshot().domain_preference
    }

    pub fn set_domain_preference(&self, preference: DomainPreference) -> anyhow::Result<()> {
        self.set(SETTINGS, "domain_preference", &preference.to_string())
    }

    pub fn denylist(&self) -> Vec<String> {
        self.snapshot().denylist.sources()
    }

    pub fn set_denylist<S: AsRef<str>>(&self, denylist: &[S]) -> anyhow::Result<()> {
        self.set(SETTINGS, "denylist", &join_list(denylist))
    }

    pub fn allowlist(&self) -> Vec<String> {
        self.snapshot().allowlist.sources()
    }

    pub fn set_allowlist<S: AsRef<str>>(&self, allowlist: &[S]) -> anyhow::Result<()> {
        self.set(SETTINGS, "allowlist", &join_list(allowlist))
    }

    pub fn app_override(&self, path: &str) -> Option<bool> {
        self.snapshot().app_override(path)
    }

    pub fn set_app_monitored(&self, path: &str, monitored: bool) -> anyhow::Result<()> {
        self.set(MONITORED_APPS, path, &monitored.to_string())
    }

    pub fn clear_app_monitored(&self, path: &str) -> anyhow::Result<()> {
        self.write(|file| file.remove(MONITORED_APPS, path, false))
    }

    pub fn should_log_to_file(&self) -> bool {
        self.snapshot().log_to_file
    }

    pub fn set_should_log_to_file(&self, log_to_file: bool) -> anyhow::Result<()> {
        self.set(SETTINGS, "log_to_file", &log_to_file.to_string())
    }

    pub fn should_launch_on_login(&self) -> bool {
        self.snapshot().launch_on_login
    }

    pub fn set_should_launch_on_login(&self, launch_on_login: bool) -> anyhow::Result<()> {
        let previous = self.should_launch_on_login();
        self.set(SETTINGS, "launch_on_login", &launch_on_login.to_string())?;
        let Some(dir) = &self.autostart_dir else {
            return Ok(());
        };

        if let Err(e) = autostart::apply(dir, launch_on_login) {
            self.set(SETTINGS, "launch_on_login", &previous.to_string())?;
            return Err(e);
        }

        Ok(())
    }

    pub fn log_file_path(&self) -> &Path {
        &self.log_file_path
    }

    pub fn internal(&self, section: &str, key: &str) -> Option<String> {
        self.file.get(section, key, true)
    }

    pub fn set_internal(&self, section: &str, key: &str, value: &str) -> anyhow::Result<()> {
        self.file.set(section, key, value, true)
    }
}

fn parse_or_default<T: FromStr<Err = anyhow::Error> + Default>(value: Option<String>) -> T {
    match value.map(|v| v.parse::<T>()) {
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            warn!("{e}, using the default");
            T::default()
        }
        None => T::default(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_list<S: AsRef<str>>(entries: &[S]) -> String {
    entries
        .iter()
        .map(|e| e.as_ref().trim())
        .filter(|e| !e.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
