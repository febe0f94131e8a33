use crate::target::normalize_host;
use url::Url;

const TITLE_SEPARATORS: &[&str] = &[" - ", " — ", " – ", " | "];

/// Finds the domain of the active tab in a browser window title.
///
/// Browsers don't expose the tab URL outside of accessibility APIs, but
/// "URL in title" extensions put it (or the bare host) into the title.
pub fn domain_from_title(title: &str) -> Option<String> {
    title
        .split_whitespace()
        .find_map(url_host)
        .or_else(|| split_title(title).find_map(bare_host))
}

fn split_title(title: &str) -> impl Iterator<Item = &str> {
    let mut segments = vec![title];
    for &separator in TITLE_SEPARATORS {
        segments = segments
            .into_iter()
            .flat_map(|segment| segment.split(separator))
            .collect();
    }
    segments.into_iter().map(str::trim)
}

fn url_host(token: &str) -> Option<String> {
    let token = token.trim_matches(|c: char| matches!(c, '(' | ')' | '[' | ']' | '<' | '>' | '"'));
    if !token.starts_with("http://") && !token.starts_with("https://") {
        return None;
    }
    let url = Url::parse(token).ok()?;
    let host = url.host_str()?;

    Some(normalize_host(host))
}

fn bare_host(segment: &str) -> Option<String> {
    if segment.contains(char::is_whitespace) || !segment.contains('.') {
        return None;
    }
    let candidate = segment.trim_end_matches('/');
    let is_hostname = candidate.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    let top_level = candidate.rsplit('.').next().unwrap_or_default();
    // "v1.2.3" or "report.pdf" are not hosts.
    let looks_like_tld =
        top_level.len() >= 2 && top_level.chars().all(|c| c.is_ascii_alphabetic());
    if !is_hostname || !looks_like_tld || is_file_extension(top_level) {
        return None;
    }

    Some(normalize_host(candidate))
}

fn is_file_extension(top_level: &str) -> bool {
    matches!(
        top_level.to_lowercase().as_str(),
        "pdf" | "png" | "jpg" | "jpeg" | "gif" | "svg" | "txt" | "js" | "html" | "json"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Rust docs https://docs.rs/tokio/latest - Mozilla Firefox", Some("docs.rs"))]
    #[case("GitHub (https://www.GitHub.com/rust-lang) — Chromium", Some("github.com"))]
    #[case("docs.example.com - Google Chrome", Some("docs.example.com"))]
    #[case("Pull requests | github.com | Brave", Some("github.com"))]
    #[case("docs.rs - Mozilla Firefox", Some("docs.rs"))]
    #[case("Homepage | md.gov.md - Chromium", Some("md.gov.md"))]
    #[case("Inbox (3) - Mozilla Firefox", None)]
    #[case("report.pdf - Google Chrome", None)]
    #[case("Release v1.2.3 - Chromium", None)]
    #[case("Version 1.2 - Mozilla Firefox", None)]
    #[case("", None)]
    fn domains_in_titles(#[case] title: &str, #[case] expected: Option<&str>) {
        assert_eq!(expected.map(str::to_string), domain_from_title(title));
    }
}
