use super::x11_connection::process_executable;
use super::{FocusSource, FocusedWindow};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use zbus::Connection;

// The extension may not be loaded right after the login.
const LOAD_ATTEMPTS: u32 = 3;
const LOAD_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(3);

#[derive(Deserialize, Default)]
struct WindowData {
    #[serde(default)]
    title: String,
    #[serde(default)]
    wm_class: String,
    #[serde(default)]
    pid: Option<u32>,
}

pub struct WindowSource {
    dbus_connection: Connection,
}

fn is_gnome() -> bool {
    std::env::var("XDG_CURRENT_DESKTOP").is_ok_and(|de| de.to_lowercase().contains("gnome"))
}

impl WindowSource {
    async fn get_window_data(&self) -> anyhow::Result<Option<WindowData>> {
        let call_response = self
            .dbus_connection
            .call_method(
                Some("org.gnome.Shell"),
                "/org/gnome/shell/extensions/FocusedWindow",
                Some("org.gnome.shell.extensions.FocusedWindow"),
                "Get",
                &(),
            )
            .await;

        match call_response {
            Ok(reply) => {
                let json: String = reply
                    .body()
                    .deserialize()
                    .with_context(|| "DBus interface cannot be parsed as string")?;
                serde_json::from_str(&json).map(Some).with_context(|| {
                    "DBus interface org.gnome.shell.extensions.FocusedWindow returned wrong JSON"
                })
            }
            Err(e) if e.to_string().contains("No window in focus") => {
                trace!("No window is active");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load() -> anyhow::Result<Self> {
        let source = Self {
            dbus_connection: Connection::session().await?,
        };
        source.get_window_data().await?;

        Ok(source)
    }
}

#[async_trait]
impl FocusSource for WindowSource {
    async fn new() -> anyhow::Result<Self> {
        if !is_gnome() {
            return Self::load().await;
        }

        let mut attempt = 1;
        loop {
            match Self::load().await {
                Err(e) if attempt < LOAD_ATTEMPTS => {
                    debug!("Gnome extension is not available yet: {e}");
                    attempt += 1;
                    tokio::time::sleep(LOAD_RETRY_DELAY).await;
                }
                result => return result,
            }
        }
    }

    async fn focused_window(&mut self) -> anyhow::Result<Option<FocusedWindow>> {
        let data = self.get_window_data().await?;

        Ok(data.map(|data| FocusedWindow {
            executable: data.pid.and_then(process_executable),
            app_id: data.wm_class,
            title: data.title,
        }))
    }
}
