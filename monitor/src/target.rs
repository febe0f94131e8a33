use crate::config::DomainPreference;
use std::fmt::Display;
use std::path::Path;

/// What the user is focused on during one sample.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MonitorTarget {
    App { path: String },
    BrowserTab { browser_path: String, domain: String },
}

impl MonitorTarget {
    pub fn app(path: impl Into<String>) -> Self {
        MonitorTarget::App { path: path.into() }
    }

    pub fn browser_tab(browser_path: impl Into<String>, domain: &str) -> Self {
        MonitorTarget::BrowserTab {
            browser_path: browser_path.into(),
            domain: normalize_host(domain),
        }
    }

    /// Executable path of the focused application, the browser for tabs.
    pub fn app_path(&self) -> &str {
        match self {
            MonitorTarget::App { path } => path,
            MonitorTarget::BrowserTab { browser_path, .. } => browser_path,
        }
    }
}

impl Display for MonitorTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorTarget::App { path } => write!(f, "app {path}"),
            MonitorTarget::BrowserTab {
                browser_path,
                domain,
            } => write!(f, "tab {domain} in {browser_path}"),
        }
    }
}

pub fn app_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |name| name.to_string_lossy().to_string())
}

pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    match host.strip_prefix("www.") {
        Some(stripped) if stripped.contains('.') => stripped.to_string(),
        _ => host,
    }
}

// Second-level labels under which registrations happen one level deeper,
// e.g. "example.co.uk".
const SECOND_LEVEL_SUFFIXES: &[&str] = &[
    "ac", "co", "com", "edu", "gov", "ltd", "me", "net", "org", "plc", "sch",
];

fn is_ip_address(host: &str) -> bool {
    host.parse::<std::net::IpAddr>().is_ok()
}

/// Registrable part of the host: `docs.example.com` becomes `example.com`,
/// `news.bbc.co.uk` becomes `bbc.co.uk`.
pub fn registrable_domain(host: &str) -> String {
    let host = normalize_host(host);
    if is_ip_address(&host) {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let tld = labels[labels.len() - 1];
    let second = labels[labels.len() - 2];
    let keep = if tld.len() == 2 && SECOND_LEVEL_SUFFIXES.contains(&second) {
        3
    } else {
        2
    };

    labels[labels.len().saturating_sub(keep)..].join(".")
}

pub fn domain_subject(domain: &str, preference: DomainPreference) -> String {
    match preference {
        DomainPreference::Domain => registrable_domain(domain),
        DomainPreference::Subdomain => normalize_host(domain),
    }
}
