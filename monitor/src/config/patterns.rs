use regex::{Regex, RegexBuilder};

/// A user-supplied list entry matched against a path or a domain.
///
/// Entries wrapped in slashes (`/^docs\..*/`) are regular expressions searched
/// anywhere in the subject. Anything else is a glob matching the whole subject,
/// where `*` is any run of characters and `?` is one character.
/// Matching is always case-insensitive. Malformed entries never match.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Option<Regex>,
}

impl Pattern {
    pub fn new(source: &str) -> Self {
        let source = source.trim().to_string();
        let regex = match compile(&source) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Pattern \"{source}\" is malformed and will never match: {e}");
                None
            }
        };

        Self { source, regex }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, subject: &str) -> bool {
        self.regex
            .as_ref()
            .is_some_and(|regex| regex.is_match(subject))
    }
}

fn compile(source: &str) -> Result<Regex, regex::Error> {
    let expression = match source.strip_prefix('/').and_then(|s| s.strip_suffix('/')) {
        Some(expression) if !expression.is_empty() => expression.to_string(),
        _ => glob_to_regex(source),
    };

    RegexBuilder::new(&expression).case_insensitive(true).build()
}

fn glob_to_regex(glob: &str) -> String {
    let mut expression = String::with_capacity(glob.len() + 2);
    expression.push('^');
    for c in glob.chars() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            c => expression.push_str(&regex::escape(&c.to_string())),
        }
    }
    expression.push('$');

    expression
}

#[derive(Debug, Clone, Default)]
pub struct PatternList(Vec<Pattern>);

impl PatternList {
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Self {
        Self(
            entries
                .iter()
                .map(AsRef::as_ref)
                .filter(|entry| !entry.trim().is_empty())
                .map(Pattern::new)
                .collect(),
        )
    }

    pub fn any_match(&self, subjects: &[&str]) -> bool {
        self.0
            .iter()
            .any(|pattern| subjects.iter().any(|subject| pattern.is_match(subject)))
    }

    pub fn sources(&self) -> Vec<String> {
        self.0.iter().map(|p| p.source().to_string()).collect()
    }
}
