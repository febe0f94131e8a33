#[macro_use]
extern crate log;

pub mod apps;
pub mod config;
pub mod dependency;
mod heartbeat;
pub mod policy;
mod report_client;
mod target;
pub mod watchers;

pub use apps::{AppEntry, AppsManager};
pub use dependency::{DependencyManager, DependencyState, GithubReleases, Phase};
pub use heartbeat::{Category, HeartbeatEvent};
pub use policy::MonitoringManager;
pub use report_client::{CliSender, HeartbeatSender, ReportClient};
pub use target::MonitorTarget;
pub use watchers::{FocusSource, FocusedWindow, Watcher};
