mod browsers;
mod desktop_entry;

use crate::config::PropertiesManager;
use crate::target::app_file_name;
use desktop_entry::DesktopEntry;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// An application as found on the system, before the monitoring overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DiscoveredApp {
    name: String,
    executable_path: String,
    is_browser: bool,
    desktop_id: Option<String>,
    wm_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub name: String,
    pub executable_path: String,
    pub is_browser: bool,
    pub monitored: bool,
    pub desktop_id: Option<String>,
    pub wm_class: Option<String>,
}

impl AppEntry {
    fn new(app: &DiscoveredApp, monitored: bool) -> Self {
        Self {
            name: app.name.clone(),
            executable_path: app.executable_path.clone(),
            is_browser: app.is_browser,
            monitored,
            desktop_id: app.desktop_id.clone(),
            wm_class: app.wm_class.clone(),
        }
    }
}

pub struct AppsManager {
    properties: Arc<PropertiesManager>,
    catalog: RwLock<Arc<Vec<DiscoveredApp>>>,
    application_dirs: Vec<PathBuf>,
    scan_processes: bool,
}

fn default_application_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(data_dir) = dirs::data_dir() {
        dirs.push(data_dir.join("applications"));
        dirs.push(data_dir.join("flatpak/exports/share/applications"));
    }
    let data_dirs = std::env::var("XDG_DATA_DIRS")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or("/usr/local/share:/usr/share".to_string());
    dirs.extend(
        data_dirs
            .split(':')
            .filter(|d| !d.is_empty())
            .map(|d| Path::new(d).join("applications")),
    );
    dirs.push("/var/lib/flatpak/exports/share/applications".into());
    dirs.push("/var/lib/snapd/desktop/applications".into());

    let mut seen = HashSet::new();
    dirs.retain(|d| seen.insert(d.clone()));
    dirs
}

impl AppsManager {
    pub fn new(properties: Arc<PropertiesManager>) -> Self {
        Self::with_sources(properties, default_application_dirs(), true)
    }

    pub fn with_sources(
        properties: Arc<PropertiesManager>,
        application_dirs: Vec<PathBuf>,
        scan_processes: bool,
    ) -> Self {
        Self {
            properties,
            catalog: RwLock::new(Arc::new(Vec::new())),
            application_dirs,
            scan_processes,
        }
    }

    /// Rebuilds the catalog from scratch. Safe to call repeatedly.
    pub fn load(&self) {
        let mut apps: Vec<DiscoveredApp> = Vec::new();
        let mut known_paths = HashSet::new();
        let mut known_ids = HashSet::new();

        for dir in &self.application_dirs {
            for app in scan_application_dir(dir) {
                // Entries in earlier directories shadow later ones with the same id.
                let id_is_new = app
                    .desktop_id
                    .as_ref()
                    .map_or(true, |id| known_ids.insert(id.clone()));
                if id_is_new && known_paths.insert(app.executable_path.clone()) {
                    apps.push(app);
                }
            }
        }
        if self.scan_processes {
            for app in running_apps() {
                if known_paths.insert(app.executable_path.clone()) {
                    apps.push(app);
                }
            }
        }
        apps.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

        info!(
            "Found {} applications, {} of them are browsers",
            apps.len(),
            apps.iter().filter(|a| a.is_browser).count()
        );
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(apps);
    }

    fn catalog(&self) -> Arc<Vec<DiscoveredApp>> {
        Arc::clone(&self.catalog.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn get_apps(&self) -> Vec<AppEntry> {
        let snapshot = self.properties.snapshot();
        self.catalog()
            .iter()
            .map(|app| {
                let monitored = snapshot
                    .app_override(&app.executable_path)
                    .unwrap_or(true);
                AppEntry::new(app, monitored)
            })
            .collect()
    }

    pub fn find_by_path(&self, path: &str) -> Option<AppEntry> {
        let app = self
            .catalog()
            .iter()
            .find(|app| app.executable_path == path)
            .cloned()?;

        Some(AppEntry::new(&app, self.is_monitored(path)))
    }

    /// Finds an application by a window class or a Wayland app id.
    pub fn find_by_app_id(&self, app_id: &str) -> Option<AppEntry> {
        let app_id = app_id.trim_end_matches(".desktop").to_lowercase();
        if app_id.is_empty() {
            return None;
        }
        let catalog = self.catalog();
        let app = catalog
            .iter()
            .find(|app| {
                app.wm_class
                    .as_ref()
                    .is_some_and(|class| class.to_lowercase() == app_id)
                    || app
                        .desktop_id
                        .as_ref()
                        .is_some_and(|id| id.to_lowercase() == app_id)
            })
            .or_else(|| {
                catalog
                    .iter()
                    .find(|app| app_file_name(&app.executable_path).to_lowercase() == app_id)
            })?;

        Some(AppEntry::new(app, self.is_monitored(&app.executable_path)))
    }

    pub fn is_browser(&self, path: &str, app_id: Option<&str>) -> bool {
        if let Some(app) = self.catalog().iter().find(|app| app.executable_path == path) {
            if app.is_browser {
                return true;
            }
        }

        browsers::find(&app_file_name(path), app_id).is_some()
    }

    pub fn app_name(&self, path: &str) -> Option<String> {
        self.catalog()
            .iter()
            .find(|app| app.executable_path == path)
            .map(|app| app.name.clone())
            .or_else(|| browsers::find(&app_file_name(path), None).map(|b| b.name.to_string()))
    }

    pub fn is_monitored(&self, path: &str) -> bool {
        self.properties.app_override(path).unwrap_or(true)
    }

    pub fn set_monitored(&self, path: &str, monitored: bool) -> anyhow::Result<()> {
        debug!("Setting monitored state of {path} to {monitored}");
        self.properties.set_app_monitored(path, monitored)
    }
}

fn scan_application_dir(dir: &Path) -> Vec<DiscoveredApp> {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        trace!("Skipping missing application directory {}", dir.display());
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = read_dir
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "desktop"))
        .collect();
    files.sort();

    files
        .into_iter()
        .filter_map(|file| match DesktopEntry::read(&file) {
            Ok(entry) => Some(entry),
            Err(e) => {
                trace!("Skipping {}: {e}", file.display());
                None
            }
        })
        .filter_map(|entry| {
            let executable_path = entry.resolve_executable()?;
            let executable_path = executable_path.to_string_lossy().to_string();
            let is_browser = browsers::find(
                &app_file_name(&executable_path),
                Some(&entry.id),
            )
            .is_some()
                || browsers::find(&app_file_name(&entry.program), entry.wm_class.as_deref())
                    .is_some();

            Some(DiscoveredApp {
                name: entry.name,
                executable_path,
                is_browser,
                desktop_id: Some(entry.id),
                wm_class: entry.wm_class,
            })
        })
        .collect()
}

fn running_apps() -> Vec<DiscoveredApp> {
    let Ok(proc_dir) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut paths: Vec<String> = proc_dir
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|e| std::fs::read_link(e.path().join("exe")).ok())
        .map(|p| p.to_string_lossy().to_string())
        .filter(|p| !p.ends_with(" (deleted)"))
        .collect();
    paths.sort();
    paths.dedup();

    paths
        .into_iter()
        .map(|executable_path| {
            let name = app_file_name(&executable_path);
            DiscoveredApp {
                is_browser: browsers::find(&name, None).is_some(),
                name,
                executable_path,
                desktop_id: None,
                wm_class: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use rstest::{fixture, rstest};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        apps: AppsManager,
    }

    fn write_executable(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn write_entry(dir: &Path, id: &str, name: &str, exec: &Path, wm_class: Option<&str>) {
        let mut content = format!(
            "[Desktop Entry]\nType=Application\nName={name}\nExec={} %U\n",
            exec.display()
        );
        if let Some(class) = wm_class {
            content.push_str(&format!("StartupWMClass={class}\n"));
        }
        std::fs::write(dir.join(format!("{id}.desktop")), content).unwrap();
    }

    fn path_str(path: &Path) -> String {
        std::fs::canonicalize(path)
            .unwrap()
            .to_string_lossy()
            .to_string()
    }

    #[fixture]
    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        let applications = dir.path().join("applications");
        std::fs::create_dir_all(&applications).unwrap();

        write_executable(&bin.join("vim"));
        write_executable(&bin.join("chrome"));
        write_entry(&applications, "vim", "Vim", &bin.join("vim"), None);
        write_entry(
            &applications,
            "google-chrome",
            "Google Chrome",
            &bin.join("chrome"),
            Some("Google-chrome"),
        );
        std::fs::write(
            applications.join("readme.txt"),
            "not a desktop entry",
        )
        .unwrap();

        let properties = Arc::new(
            PropertiesManager::new(ConfigFile::open(&dir.path().join("settings")), dir.path())
                .with_autostart_dir(None),
        );
        let apps = AppsManager::with_sources(properties, vec![applications], false);
        apps.load();

        Fixture { dir, apps }
    }

    #[rstest]
    fn loads_desktop_entries(fixture: Fixture) {
        let apps = fixture.apps.get_apps();

        assert_eq!(2, apps.len());
        assert_eq!("Google Chrome", apps[0].name);
        assert!(apps[0].is_browser);
        assert_eq!(Some("Google-chrome".to_string()), apps[0].wm_class);
        assert_eq!("Vim", apps[1].name);
        assert!(!apps[1].is_browser);
        assert!(apps.iter().all(|app| app.monitored));
    }

    #[rstest]
    fn load_is_idempotent(fixture: Fixture) {
        let before = fixture.apps.get_apps();

        fixture.apps.load();
        fixture.apps.load();

        assert_eq!(before, fixture.apps.get_apps());
    }

    #[rstest]
    fn overrides_are_merged_at_query_time(fixture: Fixture) {
        let vim = path_str(&fixture.dir.path().join("bin/vim"));

        fixture.apps.set_monitored(&vim, false).unwrap();
        fixture.apps.load();

        assert!(!fixture.apps.is_monitored(&vim));
        let entry = fixture.apps.find_by_path(&vim).unwrap();
        assert!(!entry.monitored);
        assert_eq!("Vim", entry.name);

        fixture.apps.set_monitored(&vim, true).unwrap();
        assert!(fixture.apps.find_by_path(&vim).unwrap().monitored);
    }

    #[rstest]
    fn finds_by_app_id(fixture: Fixture) {
        assert_eq!(
            "Google Chrome",
            fixture.apps.find_by_app_id("google-chrome").unwrap().name
        );
        assert_eq!("Vim", fixture.apps.find_by_app_id("vim.desktop").unwrap().name);
        assert_eq!(None, fixture.apps.find_by_app_id("emacs"));
    }

    #[rstest]
    fn recognizes_browsers_outside_catalog(fixture: Fixture) {
        assert!(fixture.apps.is_browser("/opt/brave.com/brave/brave", None));
        assert!(fixture.apps.is_browser("/unknown/path", Some("firefox")));
        assert!(!fixture.apps.is_browser("/usr/bin/vim", None));
    }

    #[rstest]
    fn names_known_browsers_outside_catalog(fixture: Fixture) {
        let vim = path_str(&fixture.dir.path().join("bin/vim"));

        assert_eq!(Some("Vim".to_string()), fixture.apps.app_name(&vim));
        assert_eq!(
            Some("Firefox".to_string()),
            fixture.apps.app_name("/usr/lib/firefox/firefox")
        );
        assert_eq!(None, fixture.apps.app_name("/usr/bin/emacs"));
    }
}
