use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use toml::{Table, Value};

const SETTINGS_FILE: &str = "settings.toml";
const INTERNAL_FILE: &str = "internal.toml";

struct Store {
    path: PathBuf,
    table: Mutex<Table>,
}

impl Store {
    fn open(path: PathBuf) -> Self {
        let table = match std::fs::read_to_string(&path) {
            Ok(content) => content.parse::<Table>().unwrap_or_else(|e| {
                warn!(
                    "Settings at {} are malformed and ignored until the next write: {e}",
                    path.display()
                );
                Table::new()
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Unable to read settings at {}: {e}", path.display());
                }
                Table::new()
            }
        };

        Self {
            path,
            table: Mutex::new(table),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get(&self, section: &str, key: &str) -> Option<String> {
        let table = self.lock();
        let value = table.get(section)?.as_table()?.get(key)?;

        value_to_string(value)
    }

    fn entries(&self, section: &str) -> Vec<(String, String)> {
        let table = self.lock();
        let Some(section) = table.get(section).and_then(Value::as_table) else {
            return Vec::new();
        };

        section
            .iter()
            .filter_map(|(key, value)| value_to_string(value).map(|v| (key.clone(), v)))
            .collect()
    }

    fn update(&self, section: &str, change: impl FnOnce(&mut Table)) -> anyhow::Result<()> {
        let mut table = self.lock();
        let mut updated = table.clone();
        let section_table = updated
            .entry(section)
            .or_insert(Value::Table(Table::new()));
        if !section_table.is_table() {
            *section_table = Value::Table(Table::new());
        }
        if let Value::Table(section_table) = section_table {
            change(section_table);
        }

        self.write(&updated)?;
        *table = updated;

        Ok(())
    }

    fn write(&self, table: &Table) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Unable to create settings directory {}", dir.display()))?;

        let content = toml::to_string(table).with_context(|| "Unable to serialize settings")?;
        let mut file = NamedTempFile::new_in(dir)
            .with_context(|| format!("Unable to create a temporary file in {}", dir.display()))?;
        file.write_all(content.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path)
            .with_context(|| format!("Unable to replace settings at {}", self.path.display()))?;
        trace!("Settings are written to {}", self.path.display());

        Ok(())
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        _ => None,
    }
}

/// Durable section/key/value storage of the settings.
///
/// User-visible keys and keys managed by the agent itself live in two files
/// of the same format. Every write replaces the file atomically and the
/// in-memory copy only changes after the file has been replaced.
pub struct ConfigFile {
    settings: Store,
    internal: Store,
}

impl ConfigFile {
    pub fn open(dir: &Path) -> Self {
        debug!("Opening settings in {}", dir.display());

        Self {
            settings: Store::open(dir.join(SETTINGS_FILE)),
            internal: Store::open(dir.join(INTERNAL_FILE)),
        }
    }

    fn store(&self, internal: bool) -> &Store {
        if internal {
            &self.internal
        } else {
            &self.settings
        }
    }

    pub fn get(&self, section: &str, key: &str, internal: bool) -> Option<String> {
        self.store(internal).get(section, key)
    }

    pub fn set(&self, section: &str, key: &str, value: &str, internal: bool) -> anyhow::Result<()> {
        self.store(internal).update(section, |table| {
            table.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    pub fn remove(&self, section: &str, key: &str, internal: bool) -> anyhow::Result<()> {
        self.store(internal).update(section, |table| {
            table.remove(key);
        })
    }

    pub fn entries(&self, section: &str, internal: bool) -> Vec<(String, String)> {
        self.store(internal).entries(section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::tempdir;

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn set_then_get(#[case] internal: bool) {
        let dir = tempdir().unwrap();
        let config = ConfigFile::open(dir.path());

        config.set("settings", "filter_type", "denylist", internal).unwrap();

        assert_eq!(
            Some("denylist".to_string()),
            config.get("settings", "filter_type", internal)
        );
        assert_eq!(None, config.get("settings", "filter_type", !internal));
    }

    #[rstest]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let config = ConfigFile::open(dir.path());
            config.set("settings", "allowlist", "github.com\n*.rs", false).unwrap();
            config.set("monitored_apps", "/usr/bin/vim", "false", false).unwrap();
            config.set("internal", "cli_version", "v1.73.0", true).unwrap();
        }

        let config = ConfigFile::open(dir.path());

        assert_eq!(
            Some("github.com\n*.rs".to_string()),
            config.get("settings", "allowlist", false)
        );
        assert_eq!(
            vec![("/usr/bin/vim".to_string(), "false".to_string())],
            config.entries("monitored_apps", false)
        );
        assert_eq!(
            Some("v1.73.0".to_string()),
            config.get("internal", "cli_version", true)
        );
    }

    #[rstest]
    fn remove_key() {
        let dir = tempdir().unwrap();
        let config = ConfigFile::open(dir.path());
        config.set("monitored_apps", "/usr/bin/vim", "true", false).unwrap();

        config.remove("monitored_apps", "/usr/bin/vim", false).unwrap();

        assert_eq!(None, config.get("monitored_apps", "/usr/bin/vim", false));
        assert!(config.entries("monitored_apps", false).is_empty());
    }

    #[rstest]
    fn reads_hand_written_values() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            "[settings]\nlog_to_file = true\nretries = 3\n",
        )
        .unwrap();

        let config = ConfigFile::open(dir.path());

        assert_eq!(
            Some("true".to_string()),
            config.get("settings", "log_to_file", false)
        );
        assert_eq!(Some("3".to_string()), config.get("settings", "retries", false));
    }

    #[rstest]
    fn failed_write_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let settings_dir = dir.path().join("settings");
        let config = ConfigFile::open(&settings_dir);
        config.set("settings", "filter_type", "allowlist", false).unwrap();

        // Renaming over a non-empty directory fails.
        std::fs::remove_file(settings_dir.join(SETTINGS_FILE)).unwrap();
        std::fs::create_dir(settings_dir.join(SETTINGS_FILE)).unwrap();
        std::fs::write(settings_dir.join(SETTINGS_FILE).join("blocker"), "").unwrap();

        assert!(config.set("settings", "filter_type", "denylist", false).is_err());
        assert_eq!(
            Some("allowlist".to_string()),
            config.get("settings", "filter_type", false)
        );
    }
}
