use crate::apps::AppsManager;
use crate::config::Config;
use crate::dependency::DependencyManager;
use crate::heartbeat::HeartbeatEvent;
use crate::target::MonitorTarget;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[async_trait]
pub trait HeartbeatSender: Send + Sync {
    async fn send(&self, executable: &Path, event: &HeartbeatEvent) -> anyhow::Result<()>;
}

/// Runs wakatime-cli once per heartbeat, success is a zero exit code.
pub struct CliSender {
    plugin: String,
    dry_run: bool,
}

impl CliSender {
    pub fn new(dry_run: bool) -> Self {
        Self {
            plugin: format!("wakawatcher/{}", env!("CARGO_PKG_VERSION")),
            dry_run,
        }
    }
}

#[async_trait]
impl HeartbeatSender for CliSender {
    async fn send(&self, executable: &Path, event: &HeartbeatEvent) -> anyhow::Result<()> {
        let args = event.to_args(&self.plugin);
        if self.dry_run {
            info!("Dry run: {} {}", executable.display(), args.join(" "));
            return Ok(());
        }
        trace!("Running {} {}", executable.display(), args.join(" "));

        let output = Command::new(executable)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", executable.display()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} exited with {}: {}",
                executable.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

struct LastSent {
    target: MonitorTarget,
    timestamp: DateTime<Utc>,
}

/// Turns accepted targets into heartbeats.
///
/// The same target is sent at most once per debounce window, a different
/// target is always sent. Every send runs on its own task with a bounded
/// number of attempts.
pub struct ReportClient {
    pub config: Config,
    sender: Arc<dyn HeartbeatSender>,
    dependency: Arc<DependencyManager>,
    apps: Arc<AppsManager>,
    last_sent: Mutex<Option<LastSent>>,
    closed: AtomicBool,
}

impl ReportClient {
    pub fn new(
        config: Config,
        sender: Arc<dyn HeartbeatSender>,
        dependency: Arc<DependencyManager>,
        apps: Arc<AppsManager>,
    ) -> Self {
        Self {
            config,
            sender,
            dependency,
            apps,
            last_sent: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn is_debounced(&self, target: &MonitorTarget, timestamp: DateTime<Utc>) -> bool {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        let window =
            TimeDelta::from_std(self.config.debounce_window).unwrap_or(TimeDelta::MAX);

        if let Some(last) = last_sent.as_ref() {
            if &last.target == target && timestamp - last.timestamp < window {
                return true;
            }
        }
        *last_sent = Some(LastSent {
            target: target.clone(),
            timestamp,
        });

        false
    }

    /// Returns the handle of the started send, `None` if the event is dropped.
    pub fn submit(
        self: &Arc<Self>,
        target: MonitorTarget,
        timestamp: DateTime<Utc>,
    ) -> Option<JoinHandle<()>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let Some(executable) = self.dependency.executable() else {
            debug!("wakatime-cli is not ready, dropping {target}");
            return None;
        };
        if self.is_debounced(&target, timestamp) {
            trace!("Debounced {target}");
            return None;
        }

        let app_name = self.apps.app_name(target.app_path());
        let event = HeartbeatEvent::new(
            target,
            timestamp,
            app_name.as_deref(),
            self.config.project.clone(),
        );
        debug!("Sending heartbeat for {} ({})", event.entity, event.target);

        let client = Arc::clone(self);
        Some(tokio::spawn(async move {
            client.send_with_retries(&executable, &event).await;
        }))
    }

    async fn send_with_retries(&self, executable: &Path, event: &HeartbeatEvent) {
        let attempts = self.config.send_attempts.max(1);
        for attempt in 1..=attempts {
            if self.closed.load(Ordering::SeqCst) {
                debug!("Client is closed, dropping heartbeat for {}", event.entity);
                return;
            }
            let result = timeout(self.config.send_timeout, self.sender.send(executable, event))
                .await
                .unwrap_or_else(|_| {
                    Err(anyhow!(
                        "Timeout after {:?}",
                        self.config.send_timeout
                    ))
                });

            match result {
                Ok(()) => {
                    trace!("Heartbeat for {} is sent", event.entity);
                    return;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Attempt {attempt}/{attempts} to send heartbeat for {} failed: {e}",
                        event.entity
                    );
                    sleep(retry_delay(self.config.retry_backoff, attempt)).await;
                }
                Err(e) => {
                    error!(
                        "Dropping heartbeat for {} after {attempts} attempts: {e}",
                        event.entity
                    );
                }
            }
        }
    }

    /// Stops every further send, including retries of the running ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Doubles the backoff after every failed attempt, up to `MAX_RETRY_DELAY`.
fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
    backoff
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_RETRY_DELAY)
}
