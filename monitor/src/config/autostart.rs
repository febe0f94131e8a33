use anyhow::Context;
use std::path::{Path, PathBuf};

const ENTRY_NAME: &str = "wakawatcher.desktop";

pub fn default_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("autostart"))
}

fn entry(executable: &Path) -> String {
    format!(
        r#"[Desktop Entry]
Type=Application
Name=Wakawatcher
Comment=Reports the focused application to WakaTime
Exec="{}"
Terminal=false
X-GNOME-Autostart-enabled=true
"#,
        executable.display()
    )
}

pub fn apply(dir: &Path, enabled: bool) -> anyhow::Result<()> {
    let path = dir.join(ENTRY_NAME);
    if enabled {
        let executable =
            std::env::current_exe().with_context(|| "Unable to locate the executable")?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Unable to create {}", dir.display()))?;
        std::fs::write(&path, entry(&executable))
            .with_context(|| format!("Unable to write {}", path.display()))?;
        debug!("Autostart entry is written to {}", path.display());
    } else if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("Unable to remove {}", path.display()))?;
        debug!("Autostart entry {} is removed", path.display());
    }

    Ok(())
}
