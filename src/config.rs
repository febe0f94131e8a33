use clap::{arg, value_parser, Arg, ArgAction, ArgMatches, Command};
use log::LevelFilter;
use monitor::config::{Config, DomainPreference, FileConfig, FilterType};
use std::path::PathBuf;
use std::time::Duration;

/// Changes requested by `wakawatcher policy`, unset fields are kept.
#[derive(Default)]
pub struct PolicyChanges {
    pub filter_type: Option<FilterType>,
    pub domain_preference: Option<DomainPreference>,
    pub denylist: Option<Vec<String>>,
    pub allowlist: Option<Vec<String>>,
    pub log_to_file: Option<bool>,
    pub launch_on_login: Option<bool>,
}

impl PolicyChanges {
    pub fn is_empty(&self) -> bool {
        self.filter_type.is_none()
            && self.domain_preference.is_none()
            && self.denylist.is_none()
            && self.allowlist.is_none()
            && self.log_to_file.is_none()
            && self.launch_on_login.is_none()
    }
}

pub enum Action {
    Run,
    ListApps,
    /// `None` removes the override.
    SetMonitored {
        path: String,
        monitored: Option<bool>,
    },
    Policy(PolicyChanges),
}

pub struct RunnerConfig {
    pub action: Action,
    pub verbosity: LevelFilter,
    pub monitor: Config,
}

fn command() -> Command {
    Command::new("Wakawatcher")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sends the focused application and browser domain to WakaTime")
        .args([
            arg!(-c --config <FILE> "Custom config file").value_parser(value_parser!(PathBuf)),
            arg!(--"poll-time" <SECONDS> "Period between checks of the focused window")
                .value_parser(value_parser!(u32).range(1..)),
            arg!(--debounce <SECONDS> "Time to coalesce heartbeats of the same target")
                .value_parser(value_parser!(u32)),
            arg!(--"dry-run" "Log heartbeats instead of running wakatime-cli")
                .action(ArgAction::SetTrue),
            Arg::new("verbosity")
                .short('v')
                .global(true)
                .help("Verbosity level: -v for warnings, -vv for info, -vvv for debug, -vvvv for trace")
                .action(ArgAction::Count),
        ])
        .subcommands([
            Command::new("apps").about("List discovered applications and their monitored state"),
            Command::new("monitor")
                .about("Turn monitoring of an application on or off")
                .args([
                    arg!(<PATH> "Executable path of the application"),
                    arg!(<STATE> "Monitoring state, \"default\" follows the filter")
                        .value_parser(["on", "off", "default"]),
                ]),
            Command::new("policy")
                .about("Show or change the monitoring policy")
                .args([
                    arg!(--"filter-type" <TYPE> "Which list decides: all, denylist or allowlist")
                        .value_parser(|s: &str| s.parse::<FilterType>()),
                    arg!(--"domain-preference" <GRANULARITY> "Match browser tabs by domain or subdomain")
                        .value_parser(|s: &str| s.parse::<DomainPreference>()),
                    arg!(--denylist <PATTERN> "Replace the denylist, \"\" clears it")
                        .num_args(1..),
                    arg!(--allowlist <PATTERN> "Replace the allowlist, \"\" clears it")
                        .num_args(1..),
                    arg!(--"log-to-file" <STATE> "Write the log into the resources directory")
                        .value_parser(["on", "off"]),
                    arg!(--"launch-on-login" <STATE> "Start with the desktop session")
                        .value_parser(["on", "off"]),
                ]),
        ])
}

fn switch(matches: &ArgMatches, id: &str) -> Option<bool> {
    matches
        .get_one::<String>(id)
        .and_then(|state| match state.as_str() {
            "on" => Some(true),
            "off" => Some(false),
            _ => None,
        })
}

fn patterns(matches: &ArgMatches, id: &str) -> Option<Vec<String>> {
    matches
        .get_many::<String>(id)
        .map(|values| values.filter(|v| !v.is_empty()).cloned().collect())
}

fn policy_changes(matches: &ArgMatches) -> PolicyChanges {
    PolicyChanges {
        filter_type: matches.get_one::<FilterType>("filter-type").copied(),
        domain_preference: matches
            .get_one::<DomainPreference>("domain-preference")
            .copied(),
        denylist: patterns(matches, "denylist"),
        allowlist: patterns(matches, "allowlist"),
        log_to_file: switch(matches, "log-to-file"),
        launch_on_login: switch(matches, "launch-on-login"),
    }
}

fn action(matches: &ArgMatches) -> Action {
    match matches.subcommand() {
        Some(("apps", _)) => Action::ListApps,
        Some(("monitor", matches)) => Action::SetMonitored {
            path: matches
                .get_one::<String>("PATH")
                .cloned()
                .unwrap_or_default(),
            monitored: switch(matches, "STATE"),
        },
        Some(("policy", matches)) => Action::Policy(policy_changes(matches)),
        _ => Action::Run,
    }
}

impl RunnerConfig {
    pub fn from_cli() -> anyhow::Result<Self> {
        Self::from_matches(&command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let file_config = FileConfig::new(matches.get_one::<PathBuf>("config").cloned())?;
        let mut monitor = Config::from_file(&file_config)?;

        if let Some(poll_time) = matches.get_one::<u32>("poll-time") {
            monitor.poll_time = Duration::from_secs(u64::from(*poll_time));
        }
        if let Some(debounce) = matches.get_one::<u32>("debounce") {
            monitor.debounce_window = Duration::from_secs(u64::from(*debounce));
        }
        if matches.get_flag("dry-run") {
            monitor.dry_run = true;
        }

        let verbosity = match matches.get_count("verbosity") {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        Ok(Self {
            action: action(matches),
            verbosity,
            monitor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor::config::defaults;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[watcher]\npoll-time-seconds = 5\n").unwrap();
        file
    }

    fn parse(file: &NamedTempFile, args: &[&str]) -> RunnerConfig {
        let path = file.path().to_string_lossy().into_owned();
        let mut argv = vec!["wakawatcher", "-c", path.as_str()];
        argv.extend_from_slice(args);
        RunnerConfig::from_matches(&command().get_matches_from(argv)).unwrap()
    }

    #[rstest]
    fn file_values_without_flags() {
        let file = config_file();
        let config = parse(&file, &[]);

        assert!(matches!(config.action, Action::Run));
        assert_eq!(LevelFilter::Error, config.verbosity);
        assert_eq!(Duration::from_secs(5), config.monitor.poll_time);
        assert_eq!(
            Duration::from_secs(u64::from(defaults::debounce_window_seconds())),
            config.monitor.debounce_window
        );
        assert!(!config.monitor.dry_run);
    }

    #[rstest]
    fn flags_override_file() {
        let file = config_file();
        let config = parse(
            &file,
            &["--poll-time", "3", "--debounce", "10", "--dry-run", "-vvv"],
        );

        assert_eq!(Duration::from_secs(3), config.monitor.poll_time);
        assert_eq!(Duration::from_secs(10), config.monitor.debounce_window);
        assert!(config.monitor.dry_run);
        assert_eq!(LevelFilter::Debug, config.verbosity);
    }

    #[rstest]
    fn apps_subcommand() {
        let file = config_file();

        assert!(matches!(parse(&file, &["apps"]).action, Action::ListApps));
    }

    #[rstest]
    fn policy_without_changes() {
        let file = config_file();

        match parse(&file, &["policy"]).action {
            Action::Policy(changes) => assert!(changes.is_empty()),
            _ => panic!("Unexpected action"),
        }
    }

    #[rstest]
    fn policy_changes_are_parsed() {
        let file = config_file();
        let config = parse(
            &file,
            &[
                "policy",
                "--filter-type",
                "allowlist",
                "--domain-preference",
                "subdomain",
                "--allowlist",
                "github.com",
                "/.*\\.rs$/",
                "--denylist",
                "",
                "--log-to-file",
                "on",
            ],
        );

        let Action::Policy(changes) = config.action else {
            panic!("Unexpected action");
        };
        assert_eq!(Some(FilterType::Allowlist), changes.filter_type);
        assert_eq!(Some(DomainPreference::Subdomain), changes.domain_preference);
        assert_eq!(
            Some(vec!["github.com".to_string(), "/.*\\.rs$/".to_string()]),
            changes.allowlist
        );
        assert_eq!(Some(Vec::<String>::new()), changes.denylist);
        assert_eq!(Some(true), changes.log_to_file);
        assert_eq!(None, changes.launch_on_login);
    }

    #[rstest]
    fn unknown_filter_type_is_rejected() {
        assert!(command()
            .try_get_matches_from(["wakawatcher", "policy", "--filter-type", "some"])
            .is_err());
    }

    #[rstest]
    #[case("on", Some(true))]
    #[case("off", Some(false))]
    #[case("default", None)]
    fn monitor_subcommand(#[case] state: &str, #[case] expected: Option<bool>) {
        let file = config_file();
        let config = parse(&file, &["monitor", "/usr/bin/slack", state]);

        match config.action {
            Action::SetMonitored { path, monitored } => {
                assert_eq!("/usr/bin/slack", path);
                assert_eq!(expected, monitored);
            }
            _ => panic!("Unexpected action"),
        }
    }

    #[rstest]
    fn poll_time_must_be_positive() {
        assert!(command()
            .try_get_matches_from(["wakawatcher", "--poll-time", "0"])
            .is_err());
    }
}
