use super::x11_connection::{process_executable, X11Client};
use super::{FocusSource, FocusedWindow};
use async_trait::async_trait;

pub struct WindowSource {
    client: X11Client,
}

#[async_trait]
impl FocusSource for WindowSource {
    async fn new() -> anyhow::Result<Self> {
        let mut client = X11Client::new()?;
        client.active_window_data()?;

        Ok(WindowSource { client })
    }

    async fn focused_window(&mut self) -> anyhow::Result<Option<FocusedWindow>> {
        let Some(data) = self.client.active_window_data()? else {
            return Ok(None);
        };

        Ok(Some(FocusedWindow {
            executable: data.pid.and_then(process_executable),
            app_id: data.wm_class,
            title: data.title,
        }))
    }
}
