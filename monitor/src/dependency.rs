mod github;

pub use github::GithubReleases;

use crate::config::PropertiesManager;
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use std::fmt::Display;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, timeout};

const INTERNAL: &str = "internal";
const CLI_VERSION: &str = "cli_version";
const CLI_VERSION_LAST_ACCESSED: &str = "cli_version_last_accessed";
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    major: u32,
    minor: u32,
    patch: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let core = trimmed.strip_prefix('v').unwrap_or(trimmed);
        // Pre-release and build suffixes are not compared.
        let core = core.split(['-', '+']).next().unwrap_or(core);
        let mut parts = core.split('.').map(|part| {
            part.parse::<u32>()
                .map_err(|_| anyhow!("Invalid version \"{trimmed}\""))
        });

        let major = parts.next().ok_or(anyhow!("Empty version"))??;
        let minor = parts.next().transpose()?.unwrap_or(0);
        let patch = parts.next().transpose()?.unwrap_or(0);
        if parts.next().is_some() {
            bail!("Invalid version \"{trimmed}\"");
        }

        Ok(Self::new(major, minor, patch))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn latest_version(&self) -> anyhow::Result<Version>;

    /// Returns the zip archive of the given asset.
    async fn download(&self, version: &Version, asset: &str) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Unchecked,
    Checking,
    Installing,
    Ready,
    Failed(String),
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Unchecked => write!(f, "unchecked"),
            Phase::Checking => write!(f, "checking"),
            Phase::Installing => write!(f, "installing"),
            Phase::Ready => write!(f, "ready"),
            Phase::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DependencyState {
    pub phase: Phase,
    pub executable_path: PathBuf,
    pub installed_version: Option<Version>,
    pub latest_known_version: Option<Version>,
}

pub fn asset_name() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        os => os,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        arch => arch,
    };

    format!("wakatime-cli-{os}-{arch}")
}

/// Keeps wakatime-cli installed and up to date.
///
/// Heartbeats are only dispatched while the phase is [`Phase::Ready`].
/// Checks and installs never run concurrently.
pub struct DependencyManager {
    resources_dir: PathBuf,
    asset: String,
    state: RwLock<DependencyState>,
    install_lock: tokio::sync::Mutex<()>,
    releases: Arc<dyn ReleaseSource>,
    properties: Arc<PropertiesManager>,
    check_interval: Duration,
}

impl DependencyManager {
    pub fn new(
        resources_dir: &Path,
        releases: Arc<dyn ReleaseSource>,
        properties: Arc<PropertiesManager>,
        check_interval: Duration,
    ) -> Self {
        let asset = asset_name();
        let executable_path = resources_dir.join(&asset);

        Self {
            resources_dir: resources_dir.to_path_buf(),
            asset,
            state: RwLock::new(DependencyState {
                phase: Phase::Unchecked,
                executable_path,
                installed_version: None,
                latest_known_version: None,
            }),
            install_lock: tokio::sync::Mutex::new(()),
            releases,
            properties,
            check_interval: check_interval.max(MIN_CHECK_INTERVAL),
        }
    }

    pub fn state(&self) -> DependencyState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update(&self, change: impl FnOnce(&mut DependencyState)) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        change(&mut state);
    }

    fn set_phase(&self, phase: Phase) {
        debug!("wakatime-cli is {phase}");
        self.update(|state| state.phase = phase);
    }

    pub fn is_ready(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).phase == Phase::Ready
    }

    /// The executable to run, only while it's ready.
    pub fn executable(&self) -> Option<PathBuf> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        (state.phase == Phase::Ready).then(|| state.executable_path.clone())
    }

    fn executable_path(&self) -> PathBuf {
        self.state().executable_path
    }

    /// Checks the installation once, installing or upgrading if needed.
    pub async fn check(&self) {
        let Ok(_guard) = self.install_lock.try_lock() else {
            debug!("wakatime-cli check is already in progress");
            return;
        };

        if !self.is_ready() {
            self.set_phase(Phase::Checking);
        }
        match self.check_installation().await {
            Ok(version) => {
                info!("wakatime-cli {version} is ready");
                self.update(|state| {
                    state.installed_version = Some(version);
                    state.phase = Phase::Ready;
                });
            }
            Err(e) => {
                warn!("wakatime-cli is unavailable, heartbeats are paused: {e:#}");
                self.set_phase(Phase::Failed(format!("{e:#}")));
            }
        }
    }

    /// Checks on startup and then on every interval until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.check().await;
            sleep(self.check_interval).await;
        }
    }

    async fn check_installation(&self) -> anyhow::Result<Version> {
        let executable = self.executable_path();
        let installed = installed_version(&executable).await;
        self.update(|state| state.installed_version = installed);

        let latest = match self.latest_version().await {
            Ok(latest) => Some(latest),
            Err(e) => match installed {
                Some(installed) => {
                    warn!("Unable to check for wakatime-cli updates, keeping {installed}: {e:#}");
                    None
                }
                None => return Err(e),
            },
        };

        match (installed, latest) {
            (Some(installed), Some(latest)) if installed >= latest => Ok(installed),
            (Some(installed), None) => Ok(installed),
            (installed, Some(latest)) => {
                match installed {
                    Some(installed) => info!("Upgrading wakatime-cli from {installed} to {latest}"),
                    None => info!("Installing wakatime-cli {latest}"),
                }
                self.set_phase(Phase::Installing);
                if let Err(e) = self.install(&latest).await {
                    return match installed {
                        Some(installed) => {
                            warn!("Failed to upgrade wakatime-cli, keeping {installed}: {e:#}");
                            Ok(installed)
                        }
                        None => Err(e),
                    };
                }

                installed_version(&executable)
                    .await
                    .ok_or(anyhow!("Installed wakatime-cli doesn't report its version"))
            }
            (None, None) => bail!("wakatime-cli is not installed"),
        }
    }

    async fn latest_version(&self) -> anyhow::Result<Version> {
        let now = Utc::now().timestamp();
        let cached = self
            .properties
            .internal(INTERNAL, CLI_VERSION)
            .and_then(|v| v.parse::<Version>().ok());
        let last_accessed = self
            .properties
            .internal(INTERNAL, CLI_VERSION_LAST_ACCESSED)
            .and_then(|v| v.parse::<i64>().ok());

        let interval = i64::try_from(self.check_interval.as_secs()).unwrap_or(i64::MAX);
        let latest = match (cached, last_accessed) {
            (Some(cached), Some(last)) if now.saturating_sub(last) < interval => {
                trace!("Using the cached latest wakatime-cli version {cached}");
                cached
            }
            _ => {
                let latest = self.releases.latest_version().await?;
                if let Err(e) = self
                    .properties
                    .set_internal(INTERNAL, CLI_VERSION, &latest.to_string())
                    .and_then(|()| {
                        self.properties.set_internal(
                            INTERNAL,
                            CLI_VERSION_LAST_ACCESSED,
                            &now.to_string(),
                        )
                    })
                {
                    warn!("Unable to remember the latest wakatime-cli version: {e}");
                }
                latest
            }
        };
        self.update(|state| state.latest_known_version = Some(latest));

        Ok(latest)
    }

    async fn install(&self, version: &Version) -> anyhow::Result<()> {
        let archive = self.releases.download(version, &self.asset).await?;
        let resources_dir = self.resources_dir.clone();
        let asset = self.asset.clone();

        tokio::task::spawn_blocking(move || extract_executable(&archive, &asset, &resources_dir))
            .await
            .with_context(|| "Installation task failed")?
    }
}

async fn installed_version(executable: &Path) -> Option<Version> {
    if !executable.is_file() {
        return None;
    }

    let output = timeout(
        VERSION_TIMEOUT,
        Command::new(executable)
            .arg("--version")
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match output {
        Ok(Ok(output)) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            match stdout.trim().parse() {
                Ok(version) => Some(version),
                Err(e) => {
                    warn!("Unknown wakatime-cli version: {e}");
                    None
                }
            }
        }
        Ok(Ok(output)) => {
            warn!("{} --version exited with {}", executable.display(), output.status);
            None
        }
        Ok(Err(e)) => {
            warn!("Failed to run {}: {e}", executable.display());
            None
        }
        Err(_) => {
            warn!("{} --version timed out", executable.display());
            None
        }
    }
}

fn extract_executable(archive: &[u8], asset: &str, resources_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(resources_dir)
        .with_context(|| format!("Unable to create {}", resources_dir.display()))?;

    let mut archive =
        zip::ZipArchive::new(Cursor::new(archive)).with_context(|| "Invalid release archive")?;
    let mut entry = archive
        .by_name(asset)
        .with_context(|| format!("{asset} is not found in the release archive"))?;

    let mut file = tempfile::NamedTempFile::new_in(resources_dir)?;
    std::io::copy(&mut entry, &mut file)?;
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o755))?;
    }

    let executable = resources_dir.join(asset);
    file.persist(&executable)
        .with_context(|| format!("Unable to install {}", executable.display()))?;
    debug!("Installed {}", executable.display());

    #[cfg(unix)]
    {
        let link = resources_dir.join("wakatime-cli");
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)?;
        }
        if let Err(e) = std::os::unix::fs::symlink(&executable, &link) {
            warn!("Unable to link {}: {e}", link.display());
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    pub struct FakeReleases {
        latest: Mutex<Option<Version>>,
        pub version_requests: AtomicU32,
        pub downloads: AtomicU32,
    }

    impl FakeReleases {
        pub fn new(latest: Option<Version>) -> Self {
            Self {
                latest: Mutex::new(latest),
                version_requests: AtomicU32::new(0),
                downloads: AtomicU32::new(0),
            }
        }

        fn set_latest(&self, latest: Option<Version>) {
            *self.latest.lock().unwrap() = latest;
        }
    }

    fn script(version: &Version) -> String {
        format!("#!/bin/sh\necho {version}\n")
    }

    fn archive(asset: &str, content: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(
                asset,
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored),
            )
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[async_trait]
    impl ReleaseSource for FakeReleases {
        async fn latest_version(&self) -> anyhow::Result<Version> {
            self.version_requests.fetch_add(1, Ordering::SeqCst);
            (*self.latest.lock().unwrap()).ok_or(anyhow!("network is unreachable"))
        }

        async fn download(&self, version: &Version, asset: &str) -> anyhow::Result<Vec<u8>> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(archive(asset, &script(version)))
        }
    }

    fn properties(dir: &Path) -> Arc<PropertiesManager> {
        Arc::new(
            PropertiesManager::new(ConfigFile::open(&dir.join("settings")), dir)
                .with_autostart_dir(None),
        )
    }

    fn manager(
        dir: &Path,
        releases: &Arc<FakeReleases>,
        properties: Arc<PropertiesManager>,
    ) -> DependencyManager {
        DependencyManager::new(
            &dir.join("resources"),
            Arc::clone(releases) as Arc<dyn ReleaseSource>,
            properties,
            Duration::from_secs(24 * 3600),
        )
    }

    pub fn install_script(resources_dir: &Path, version: &Version) {
        use std::os::unix::fs::PermissionsExt;

        std::fs::create_dir_all(resources_dir).unwrap();
        let path = resources_dir.join(asset_name());
        std::fs::write(&path, script(version)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    pub async fn ready_dependency(
        dir: &Path,
        properties: Arc<PropertiesManager>,
    ) -> Arc<DependencyManager> {
        let releases = Arc::new(FakeReleases::new(Some(Version::new(1, 0, 0))));
        let dependency = manager(dir, &releases, properties);
        dependency.check().await;
        assert!(dependency.is_ready());

        Arc::new(dependency)
    }

    pub fn unchecked_dependency(
        dir: &Path,
        properties: Arc<PropertiesManager>,
    ) -> Arc<DependencyManager> {
        let releases = Arc::new(FakeReleases::new(Some(Version::new(1, 0, 0))));
        Arc::new(manager(dir, &releases, properties))
    }

    #[rstest]
    #[case("v1.73.1", Version::new(1, 73, 1))]
    #[case("1.73.1\n", Version::new(1, 73, 1))]
    #[case("v2.0", Version::new(2, 0, 0))]
    #[case("v1.90.0-alpha.1", Version::new(1, 90, 0))]
    fn parses_versions(#[case] text: &str, #[case] expected: Version) {
        assert_eq!(expected, text.parse::<Version>().unwrap());
    }

    #[rstest]
    #[case("<local-build>")]
    #[case("")]
    #[case("1.2.3.4")]
    fn rejects_versions(#[case] text: &str) {
        assert!(text.parse::<Version>().is_err());
    }

    #[rstest]
    fn versions_are_ordered() {
        assert!(Version::new(1, 10, 0) > Version::new(1, 9, 9));
        assert_eq!("v1.2.3", Version::new(1, 2, 3).to_string());
    }

    #[rstest]
    #[tokio::test]
    async fn installs_missing_executable() {
        let dir = tempdir().unwrap();
        let releases = Arc::new(FakeReleases::new(Some(Version::new(1, 73, 0))));
        let dependency = manager(dir.path(), &releases, properties(dir.path()));

        assert_eq!(Phase::Unchecked, dependency.state().phase);
        assert_eq!(None, dependency.executable());

        dependency.check().await;

        let state = dependency.state();
        assert_eq!(Phase::Ready, state.phase);
        assert_eq!(Some(Version::new(1, 73, 0)), state.installed_version);
        assert_eq!(Some(Version::new(1, 73, 0)), state.latest_known_version);
        assert_eq!(Some(state.executable_path.clone()), dependency.executable());
        assert!(state.executable_path.is_file());
        assert!(dir.path().join("resources/wakatime-cli").exists());
        assert_eq!(1, releases.downloads.load(Ordering::SeqCst));
    }

    #[rstest]
    #[tokio::test]
    async fn keeps_up_to_date_executable() {
        let dir = tempdir().unwrap();
        install_script(&dir.path().join("resources"), &Version::new(1, 73, 0));
        let releases = Arc::new(FakeReleases::new(Some(Version::new(1, 73, 0))));
        let dependency = manager(dir.path(), &releases, properties(dir.path()));

        dependency.check().await;

        assert!(dependency.is_ready());
        assert_eq!(0, releases.downloads.load(Ordering::SeqCst));
    }

    #[rstest]
    #[tokio::test]
    async fn upgrades_outdated_executable() {
        let dir = tempdir().unwrap();
        install_script(&dir.path().join("resources"), &Version::new(1, 60, 0));
        let releases = Arc::new(FakeReleases::new(Some(Version::new(1, 73, 0))));
        let dependency = manager(dir.path(), &releases, properties(dir.path()));

        dependency.check().await;

        assert!(dependency.is_ready());
        assert_eq!(
            Some(Version::new(1, 73, 0)),
            dependency.state().installed_version
        );
        assert_eq!(1, releases.downloads.load(Ordering::SeqCst));
    }

    #[rstest]
    #[tokio::test]
    async fn fails_without_network_and_installation() {
        let dir = tempdir().unwrap();
        let releases = Arc::new(FakeReleases::new(None));
        let dependency = manager(dir.path(), &releases, properties(dir.path()));

        dependency.check().await;

        assert!(matches!(dependency.state().phase, Phase::Failed(_)));
        assert_eq!(None, dependency.executable());

        // The next successful check recovers.
        releases.set_latest(Some(Version::new(1, 73, 0)));
        dependency.check().await;
        assert!(dependency.is_ready());
    }

    #[rstest]
    #[tokio::test]
    async fn offline_with_installation_is_ready() {
        let dir = tempdir().unwrap();
        install_script(&dir.path().join("resources"), &Version::new(1, 60, 0));
        let releases = Arc::new(FakeReleases::new(None));
        let dependency = manager(dir.path(), &releases, properties(dir.path()));

        dependency.check().await;

        assert!(dependency.is_ready());
        assert_eq!(0, releases.downloads.load(Ordering::SeqCst));
    }

    #[rstest]
    #[tokio::test]
    async fn latest_version_is_cached_between_checks() {
        let dir = tempdir().unwrap();
        let properties = properties(dir.path());
        let releases = Arc::new(FakeReleases::new(Some(Version::new(1, 73, 0))));
        let dependency = manager(dir.path(), &releases, Arc::clone(&properties));

        dependency.check().await;
        dependency.check().await;
        let restarted = manager(dir.path(), &releases, Arc::clone(&properties));
        restarted.check().await;

        assert!(restarted.is_ready());
        assert_eq!(1, releases.version_requests.load(Ordering::SeqCst));
        assert_eq!(
            Some("v1.73.0".to_string()),
            properties.internal(INTERNAL, CLI_VERSION)
        );
    }

    #[rstest]
    #[tokio::test]
    async fn zero_interval_keeps_the_cache() {
        let dir = tempdir().unwrap();
        let releases = Arc::new(FakeReleases::new(Some(Version::new(1, 73, 0))));
        let dependency = Arc::new(DependencyManager::new(
            &dir.path().join("resources"),
            Arc::clone(&releases) as Arc<dyn ReleaseSource>,
            properties(dir.path()),
            Duration::ZERO,
        ));

        let task = tokio::spawn(Arc::clone(&dependency).run());
        tokio::time::sleep(Duration::from_millis(300)).await;
        task.abort();

        assert!(dependency.is_ready());
        assert_eq!(1, releases.version_requests.load(Ordering::SeqCst));
    }

    #[rstest]
    fn archive_without_asset_is_rejected() {
        let dir = tempdir().unwrap();
        let archive = archive("something-else", "#!/bin/sh\n");

        let result = extract_executable(&archive, &asset_name(), dir.path());

        assert!(result.is_err());
        assert!(!dir.path().join(asset_name()).exists());
    }
}
