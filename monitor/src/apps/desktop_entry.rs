use anyhow::{anyhow, bail, Context};
use std::path::{Path, PathBuf};

#[derive(Debug, PartialEq, Eq)]
pub struct DesktopEntry {
    pub id: String,
    pub name: String,
    pub program: String,
    pub wm_class: Option<String>,
}

impl DesktopEntry {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read {}", path.display()))?;
        let id = path
            .file_stem()
            .ok_or(anyhow!("No file name in {}", path.display()))?
            .to_string_lossy()
            .to_string();

        Self::parse(&id, &content)
    }

    pub fn parse(id: &str, content: &str) -> anyhow::Result<Self> {
        let mut in_main_group = false;
        let mut name = None;
        let mut exec = None;
        let mut wm_class = None;
        let mut entry_type = None;
        let mut hidden = false;

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                in_main_group = line == "[Desktop Entry]";
                continue;
            }
            if !in_main_group {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "Name" => name = Some(value),
                "Exec" => exec = Some(value),
                "StartupWMClass" => wm_class = Some(value),
                "Type" => entry_type = Some(value),
                "NoDisplay" | "Hidden" => hidden |= value == "true",
                _ => (),
            }
        }

        if entry_type.as_deref() != Some("Application") {
            bail!("{id} is not an application");
        }
        if hidden {
            bail!("{id} is hidden");
        }
        let exec = exec.ok_or(anyhow!("{id} has no Exec key"))?;
        let program = exec_program(&exec).ok_or(anyhow!("{id} has an empty Exec key"))?;

        Ok(Self {
            id: id.to_string(),
            name: name.unwrap_or_else(|| id.to_string()),
            program,
            wm_class,
        })
    }

    pub fn resolve_executable(&self) -> Option<PathBuf> {
        let path = if Path::new(&self.program).is_absolute() {
            PathBuf::from(&self.program)
        } else {
            which::which(&self.program).ok()?
        };

        Some(std::fs::canonicalize(&path).unwrap_or(path))
    }
}

/// The program of an Exec line, skipping an `env VAR=value` prefix.
fn exec_program(exec: &str) -> Option<String> {
    let mut tokens = split_exec(exec).into_iter().peekable();
    if tokens.peek().is_some_and(|t| t == "env") {
        tokens.next();
        while tokens.peek().is_some_and(|t| t.contains('=') && !t.starts_with('/')) {
            tokens.next();
        }
    }

    tokens.next().filter(|t| !t.is_empty())
}

fn split_exec(exec: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = exec.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => quoted = !quoted,
            '\\' if quoted => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
