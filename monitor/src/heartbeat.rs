use crate::target::{app_file_name, MonitorTarget};
use chrono::{DateTime, Utc};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Coding,
    Browsing,
    Communicating,
    Designing,
    Meeting,
    WritingDocs,
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let category = match self {
            Category::Coding => "coding",
            Category::Browsing => "browsing",
            Category::Communicating => "communicating",
            Category::Designing => "designing",
            Category::Meeting => "meeting",
            Category::WritingDocs => "writing docs",
        };
        write!(f, "{category}")
    }
}

const APP_CATEGORIES: &[(&str, Category)] = &[
    ("slack", Category::Communicating),
    ("discord", Category::Communicating),
    ("telegram", Category::Communicating),
    ("signal", Category::Communicating),
    ("thunderbird", Category::Communicating),
    ("element", Category::Communicating),
    ("zoom", Category::Meeting),
    ("teams", Category::Meeting),
    ("figma", Category::Designing),
    ("gimp", Category::Designing),
    ("inkscape", Category::Designing),
    ("krita", Category::Designing),
    ("blender", Category::Designing),
    ("libreoffice", Category::WritingDocs),
    ("obsidian", Category::WritingDocs),
    ("notion", Category::WritingDocs),
];

fn app_category(entity: &str, path: &str) -> Category {
    let candidates = [entity.to_lowercase(), app_file_name(path).to_lowercase()];
    APP_CATEGORIES
        .iter()
        .find(|(name, _)| candidates.iter().any(|c| c.contains(name)))
        .map_or(Category::Coding, |(_, category)| *category)
}

/// A single unit of activity handed to wakatime-cli.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatEvent {
    pub target: MonitorTarget,
    pub timestamp: DateTime<Utc>,
    pub is_write: bool,
    pub project: Option<String>,
    pub entity: String,
    pub category: Category,
}

impl HeartbeatEvent {
    pub fn new(
        target: MonitorTarget,
        timestamp: DateTime<Utc>,
        app_name: Option<&str>,
        project: Option<String>,
    ) -> Self {
        let (entity, category) = match &target {
            MonitorTarget::App { path } => {
                let entity = app_name.map_or_else(|| app_file_name(path), str::to_string);
                let category = app_category(&entity, path);
                (entity, category)
            }
            MonitorTarget::BrowserTab { domain, .. } => (domain.clone(), Category::Browsing),
        };

        Self {
            target,
            timestamp,
            is_write: false,
            project,
            entity,
            category,
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self.target {
            MonitorTarget::App { .. } => "app",
            MonitorTarget::BrowserTab { .. } => "domain",
        }
    }

    pub fn to_args(&self, plugin: &str) -> Vec<String> {
        let time = self.timestamp.timestamp_millis() as f64 / 1000.0;
        let mut args = vec![
            "--entity".to_string(),
            self.entity.clone(),
            "--entity-type".to_string(),
            self.entity_type().to_string(),
            "--category".to_string(),
            self.category.to_string(),
            "--plugin".to_string(),
            plugin.to_string(),
            "--time".to_string(),
            format!("{time:.3}"),
        ];
        if let Some(project) = &self.project {
            args.push("--project".to_string());
            args.push(project.clone());
        }
        if self.is_write {
            args.push("--write".to_string());
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[rstest]
    fn app_arguments() {
        let event = HeartbeatEvent::new(
            MonitorTarget::app("/usr/bin/vim"),
            at(1_700_000_000),
            None,
            Some("dotfiles".into()),
        );

        assert_eq!(
            vec![
                "--entity",
                "vim",
                "--entity-type",
                "app",
                "--category",
                "coding",
                "--plugin",
                "wakawatcher/0.1.0",
                "--time",
                "1700000000.000",
                "--project",
                "dotfiles",
            ],
            event.to_args("wakawatcher/0.1.0")
        );
    }

    #[rstest]
    fn domain_arguments() {
        let mut event = HeartbeatEvent::new(
            MonitorTarget::browser_tab("/usr/bin/firefox", "docs.rs"),
            at(1_700_000_000),
            Some("Firefox"),
            None,
        );
        event.is_write = true;

        let args = event.to_args("wakawatcher/0.1.0");

        assert_eq!(&["--entity", "docs.rs"], &args[0..2]);
        assert_eq!(&["--entity-type", "domain"], &args[2..4]);
        assert_eq!(&["--category", "browsing"], &args[4..6]);
        assert_eq!(Some(&"--write".to_string()), args.last());
        assert!(!args.contains(&"--project".to_string()));
    }

    #[rstest]
    #[case("/usr/bin/slack", None, Category::Communicating, "slack")]
    #[case("/snap/bin/app", Some("Zoom Workplace"), Category::Meeting, "Zoom Workplace")]
    #[case("/usr/bin/gimp-2.10", Some("GNU Image Manipulation Program"), Category::Designing, "GNU Image Manipulation Program")]
    #[case("/usr/bin/code", Some("Visual Studio Code"), Category::Coding, "Visual Studio Code")]
    fn app_entity_and_category(
        #[case] path: &str,
        #[case] name: Option<&str>,
        #[case] category: Category,
        #[case] entity: &str,
    ) {
        let event = HeartbeatEvent::new(MonitorTarget::app(path), at(0), name, None);

        assert_eq!(category, event.category);
        assert_eq!(entity, event.entity);
    }
}
