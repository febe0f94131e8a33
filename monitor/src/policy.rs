use crate::apps::AppsManager;
use crate::config::{FilterType, PolicySnapshot, PropertiesManager};
use crate::target::{app_file_name, domain_subject, MonitorTarget};
use std::sync::Arc;

/// Decides whether a focused target is tracked.
///
/// Evaluation never touches the disk: it reads the cached settings snapshot
/// and the in-memory catalog only.
pub struct MonitoringManager {
    properties: Arc<PropertiesManager>,
    apps: Arc<AppsManager>,
}

impl MonitoringManager {
    pub fn new(properties: Arc<PropertiesManager>, apps: Arc<AppsManager>) -> Self {
        Self { properties, apps }
    }

    pub fn should_monitor(&self, target: &MonitorTarget) -> bool {
        let snapshot = self.properties.snapshot();
        let app_name = self.apps.app_name(target.app_path());

        evaluate(&snapshot, target, app_name.as_deref())
    }

    pub fn is_monitored(&self, path: &str) -> bool {
        self.apps.is_monitored(path)
    }

    pub fn set_monitored(&self, path: &str, monitored: bool) -> anyhow::Result<()> {
        self.apps.set_monitored(path, monitored)
    }
}

/// Per-application overrides come first, then the lists selected by the filter type.
pub fn evaluate(snapshot: &PolicySnapshot, target: &MonitorTarget, app_name: Option<&str>) -> bool {
    match target {
        MonitorTarget::App { path } => {
            if let Some(monitored) = snapshot.app_override(path) {
                return monitored;
            }

            let file_name = app_file_name(path);
            let mut subjects = vec![path.as_str(), file_name.as_str()];
            if let Some(name) = app_name {
                subjects.push(name);
            }
            matches_filter(snapshot, &subjects)
        }
        MonitorTarget::BrowserTab {
            browser_path,
            domain,
        } => {
            if snapshot.app_override(browser_path) == Some(false) {
                return false;
            }

            let subject = domain_subject(domain, snapshot.domain_preference);
            matches_filter(snapshot, &[subject.as_str()])
        }
    }
}

fn matches_filter(snapshot: &PolicySnapshot, subjects: &[&str]) -> bool {
    match snapshot.filter_type {
        FilterType::MonitorAll => true,
        FilterType::Allowlist => snapshot.allowlist.any_match(subjects),
        FilterType::Denylist => !snapshot.denylist.any_match(subjects),
    }
}
