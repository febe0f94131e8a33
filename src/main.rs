#[macro_use]
extern crate log;

mod config;

use config::{Action, PolicyChanges, RunnerConfig};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use monitor::config::{ConfigFile, PropertiesManager};
use monitor::{
    AppsManager, CliSender, DependencyManager, GithubReleases, HeartbeatSender,
    MonitoringManager, ReportClient, Watcher,
};
use std::path::Path;
use std::sync::Arc;

fn setup_logger(verbosity: LevelFilter, log_file: Option<&Path>) -> Result<(), fern::InitError> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Cyan);

    let console = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .chain(std::io::stdout());

    let mut dispatch = fern::Dispatch::new()
        .level(log::LevelFilter::Error)
        .level_for("monitor", verbosity)
        .level_for("wakawatcher", verbosity)
        .chain(console);

    if let Some(log_file) = log_file {
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "[{} {} {}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ));
                })
                .chain(fern::log_file(log_file)?),
        );
    }
    dispatch.apply()?;

    Ok(())
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {},
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

fn print_apps(apps: &AppsManager) {
    for app in apps.get_apps() {
        println!(
            "[{}] {}{}  {}",
            if app.monitored { "x" } else { " " },
            app.name,
            if app.is_browser { " (browser)" } else { "" },
            app.executable_path
        );
    }
}

fn apply_policy(properties: &PropertiesManager, changes: PolicyChanges) -> anyhow::Result<()> {
    if let Some(filter_type) = changes.filter_type {
        properties.set_filter_type(filter_type)?;
    }
    if let Some(preference) = changes.domain_preference {
        properties.set_domain_preference(preference)?;
    }
    if let Some(denylist) = changes.denylist {
        properties.set_denylist(denylist.as_slice())?;
    }
    if let Some(allowlist) = changes.allowlist {
        properties.set_allowlist(allowlist.as_slice())?;
    }
    if let Some(log_to_file) = changes.log_to_file {
        properties.set_should_log_to_file(log_to_file)?;
    }
    if let Some(launch_on_login) = changes.launch_on_login {
        properties.set_should_launch_on_login(launch_on_login)?;
    }

    Ok(())
}

fn print_policy(properties: &PropertiesManager) {
    println!("filter type: {}", properties.filter_type());
    println!("domain preference: {}", properties.domain_preference());
    println!("denylist: {:?}", properties.denylist());
    println!("allowlist: {:?}", properties.allowlist());
    let snapshot = properties.snapshot();
    let mut overrides: Vec<_> = snapshot.monitored_apps.iter().collect();
    overrides.sort();
    for (path, monitored) in overrides {
        println!("{} {path}", if *monitored { "on " } else { "off" });
    }
    println!("log to file: {}", properties.should_log_to_file());
    println!("launch on login: {}", properties.should_launch_on_login());
}

async fn run(
    config: monitor::config::Config,
    properties: Arc<PropertiesManager>,
    apps: Arc<AppsManager>,
) -> anyhow::Result<()> {
    let releases = GithubReleases::new(&config.releases_url, &config.download_url)?;
    let dependency = Arc::new(DependencyManager::new(
        &config.resources_dir,
        Arc::new(releases),
        Arc::clone(&properties),
        config.dependency_check_interval,
    ));
    let dependency_task = tokio::spawn(Arc::clone(&dependency).run());

    let sender: Arc<dyn HeartbeatSender> = Arc::new(CliSender::new(config.dry_run));
    let client = Arc::new(ReportClient::new(
        config,
        sender,
        dependency,
        Arc::clone(&apps),
    ));
    let policy = Arc::new(MonitoringManager::new(properties, Arc::clone(&apps)));
    let watcher = Watcher::new(Arc::clone(&client), policy, apps);

    watcher.start().await?;
    wait_for_shutdown().await?;
    info!("Shutting down");

    watcher.stop().await;
    client.close();
    dependency_task.abort();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RunnerConfig::from_cli()?;

    let properties = Arc::new(PropertiesManager::new(
        ConfigFile::open(&config.monitor.settings_dir),
        &config.monitor.resources_dir,
    ));
    let log_file = properties
        .should_log_to_file()
        .then(|| properties.log_file_path().to_path_buf());
    setup_logger(config.verbosity, log_file.as_deref())?;

    let apps = Arc::new(AppsManager::new(Arc::clone(&properties)));
    apps.load();

    match config.action {
        Action::Run => run(config.monitor, properties, apps).await,
        Action::ListApps => {
            print_apps(&apps);
            Ok(())
        }
        Action::SetMonitored { path, monitored } => {
            let policy = MonitoringManager::new(Arc::clone(&properties), Arc::clone(&apps));
            match monitored {
                Some(monitored) => policy.set_monitored(&path, monitored)?,
                None => properties.clear_app_monitored(&path)?,
            }
            let name = apps.find_by_path(&path).map_or_else(|| path.clone(), |app| app.name);
            println!("{name}: {}", if policy.is_monitored(&path) { "on" } else { "off" });
            Ok(())
        }
        Action::Policy(changes) => {
            if !changes.is_empty() {
                apply_policy(&properties, changes)?;
            }
            print_policy(&properties);
            Ok(())
        }
    }
}
