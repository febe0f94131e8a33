mod browser;
#[cfg(feature = "gnome")]
mod gnome_window;
mod wl_connection;
mod wl_foreign_toplevel_management;
mod x11_connection;
mod x11_window;

pub use browser::domain_from_title;

use crate::apps::AppsManager;
use crate::policy::MonitoringManager;
use crate::report_client::ReportClient;
use crate::target::MonitorTarget;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

const FAILURES_TO_WARN: u32 = 3;
const MIN_POLL_TIME: Duration = Duration::from_millis(1);

/// A sample of the window that has the input focus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusedWindow {
    /// Known only where the window system reports the owning process.
    pub executable: Option<PathBuf>,
    pub app_id: String,
    pub title: String,
}

#[async_trait]
pub trait FocusSource: Send {
    async fn new() -> anyhow::Result<Self>
    where
        Self: Sized;

    async fn focused_window(&mut self) -> anyhow::Result<Option<FocusedWindow>>;
}

async fn create_source<T: FocusSource + 'static>(name: &str) -> Option<Box<dyn FocusSource>> {
    match T::new().await {
        Ok(source) => {
            info!("Selected focus source: {name}");
            Some(Box::new(source))
        }
        Err(e) => {
            debug!("Focus source \"{name}\" cannot run: {e}");
            None
        }
    }
}

macro_rules! watch {
    ($source:expr) => {
        if let Some(source) = $source.await {
            return Some(source);
        }
    };
}

async fn filter_first_supported() -> Option<Box<dyn FocusSource>> {
    watch!(create_source::<wl_foreign_toplevel_management::WindowSource>(
        "Wayland window (wlr-foreign-toplevel-management-unstable-v1)"
    ));
    watch!(create_source::<x11_window::WindowSource>("X11 window"));
    #[cfg(feature = "gnome")]
    watch!(create_source::<gnome_window::WindowSource>(
        "Gnome window (extension)"
    ));

    None
}

/// Decides which samples are reported: transitions and keep-alives of the
/// same target.
struct TargetTracker {
    keep_alive: TimeDelta,
    last: Option<(MonitorTarget, DateTime<Utc>)>,
    consecutive_failures: u32,
}

impl TargetTracker {
    fn new(keep_alive: Duration) -> Self {
        Self {
            keep_alive: TimeDelta::from_std(keep_alive).unwrap_or(TimeDelta::MAX),
            last: None,
            consecutive_failures: 0,
        }
    }

    fn observe(&mut self, target: &MonitorTarget, now: DateTime<Utc>) -> bool {
        self.consecutive_failures = 0;
        match &self.last {
            Some((last, reported)) if last == target && now - *reported < self.keep_alive => {
                false
            }
            _ => {
                self.last = Some((target.clone(), now));
                true
            }
        }
    }

    fn observe_nothing(&mut self) {
        self.consecutive_failures = 0;
        self.last = None;
    }

    fn fail(&mut self, error: &anyhow::Error) {
        self.consecutive_failures += 1;
        if self.consecutive_failures == FAILURES_TO_WARN {
            warn!(
                "Focused window is unknown for {FAILURES_TO_WARN} polls in a row: {error}"
            );
        } else {
            debug!("Failed to sample the focused window: {error}");
        }
    }
}

fn resolve_target(apps: &AppsManager, window: &FocusedWindow) -> Option<MonitorTarget> {
    let path = match &window.executable {
        Some(executable) => executable.to_string_lossy().into_owned(),
        None => apps
            .find_by_app_id(&window.app_id)
            .map(|app| app.executable_path)
            .unwrap_or_else(|| window.app_id.clone()),
    };
    if path.is_empty() {
        return None;
    }

    if apps.is_browser(&path, Some(&window.app_id)) {
        if let Some(domain) = domain_from_title(&window.title) {
            return Some(MonitorTarget::browser_tab(path, &domain));
        }
    }

    Some(MonitorTarget::app(path))
}

struct WatchLoop {
    client: Arc<ReportClient>,
    policy: Arc<MonitoringManager>,
    apps: Arc<AppsManager>,
    poll_time: Duration,
    tracker: TargetTracker,
}

impl WatchLoop {
    async fn run(
        mut self,
        mut source: Box<dyn FocusSource>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Box<dyn FocusSource> {
        let mut ticks = interval(self.poll_time);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticks.tick() => self.run_iteration(source.as_mut()).await,
            }
        }

        source
    }

    async fn run_iteration(&mut self, source: &mut dyn FocusSource) {
        let sample = match timeout(self.poll_time, source.focused_window()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("Timeout after {:?}", self.poll_time)),
        };

        let window = match sample {
            Ok(Some(window)) => window,
            Ok(None) => {
                self.tracker.observe_nothing();
                return;
            }
            Err(e) => {
                self.tracker.fail(&e);
                return;
            }
        };
        let Some(target) = resolve_target(&self.apps, &window) else {
            self.tracker.observe_nothing();
            return;
        };

        let now = Utc::now();
        if !self.tracker.observe(&target, now) {
            return;
        }
        if self.policy.should_monitor(&target) {
            trace!(r#"Focused {target}, title="{}""#, window.title);
            self.client.submit(target, now);
        } else {
            trace!("{target} is not monitored");
        }
    }
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Box<dyn FocusSource>>,
}

enum State {
    Stopped(Option<Box<dyn FocusSource>>),
    Running(Running),
}

/// Polls the focused window and reports targets that pass the policy.
pub struct Watcher {
    client: Arc<ReportClient>,
    policy: Arc<MonitoringManager>,
    apps: Arc<AppsManager>,
    state: Mutex<State>,
}

impl Watcher {
    pub fn new(
        client: Arc<ReportClient>,
        policy: Arc<MonitoringManager>,
        apps: Arc<AppsManager>,
    ) -> Self {
        Self {
            client,
            policy,
            apps,
            state: Mutex::new(State::Stopped(None)),
        }
    }

    /// Uses the given source instead of detecting the window system.
    pub fn with_source(self, source: Box<dyn FocusSource>) -> Self {
        Self {
            state: Mutex::new(State::Stopped(Some(source))),
            ..self
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, State::Running(_))
    }

    /// Starts polling, a no-op if it's already running.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let source = match &mut *state {
            State::Running(_) => {
                debug!("Watcher is already running");
                return Ok(());
            }
            State::Stopped(source) => source.take(),
        };
        let source = match source {
            Some(source) => source,
            None => filter_first_supported()
                .await
                .ok_or(anyhow!("No supported focus source is found"))?,
        };

        let watch_loop = WatchLoop {
            client: Arc::clone(&self.client),
            policy: Arc::clone(&self.policy),
            apps: Arc::clone(&self.apps),
            poll_time: self.client.config.poll_time.max(MIN_POLL_TIME),
            tracker: TargetTracker::new(self.client.config.keep_alive),
        };
        let (shutdown, receiver) = oneshot::channel();
        let task = tokio::spawn(watch_loop.run(source, receiver));
        info!(
            "Watching the focused window every {:?}",
            self.client.config.poll_time
        );
        *state = State::Running(Running { shutdown, task });

        Ok(())
    }

    /// Stops polling. Nothing is submitted once this returns.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let running = match std::mem::replace(&mut *state, State::Stopped(None)) {
            State::Running(running) => running,
            stopped => {
                *state = stopped;
                debug!("Watcher is already stopped");
                return;
            }
        };

        // The loop may have ended on its own only by panicking.
        let _ = running.shutdown.send(());
        match running.task.await {
            Ok(source) => *state = State::Stopped(Some(source)),
            Err(e) => error!("Watcher task failed: {e}"),
        }
        info!("Watcher is stopped");
    }
}
