use anyhow::{anyhow, bail, Context};
use std::path::PathBuf;
use std::{env, str};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt, GetPropertyReply, Window};
use x11rb::rust_connection::RustConnection;

pub struct WindowData {
    pub title: String,
    pub wm_class: String,
    pub pid: Option<u32>,
}

pub struct X11Client {
    connection: RustConnection,
    screen_root: Window,
}

impl X11Client {
    pub fn new() -> anyhow::Result<Self> {
        if env::var("DISPLAY").is_err() {
            bail!("DISPLAY is not set");
        }

        let (connection, screen_num) = x11rb::connect(None)?;
        let screen_root = connection.setup().roots[screen_num].root;

        Ok(X11Client {
            connection,
            screen_root,
        })
    }

    fn reconnect(&mut self) {
        match x11rb::connect(None) {
            Ok((connection, screen_num)) => {
                self.screen_root = connection.setup().roots[screen_num].root;
                self.connection = connection;
            }
            Err(e) => error!("Failed to reconnect to X11: {e}"),
        };
    }

    fn execute_with_reconnect<T>(
        &mut self,
        action: fn(&Self) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        match action(self) {
            Ok(v) => Ok(v),
            Err(_) => {
                self.reconnect();
                action(self)
            }
        }
    }

    pub fn active_window_data(&mut self) -> anyhow::Result<Option<WindowData>> {
        self.execute_with_reconnect(|client| {
            let Some(window) = client.find_active_window()? else {
                return Ok(None);
            };

            let name = client.get_property(
                window,
                client.intern_atom("_NET_WM_NAME")?,
                "_NET_WM_NAME",
                client.intern_atom("UTF8_STRING")?,
                u32::MAX,
            )?;
            let class = client.get_property(
                window,
                AtomEnum::WM_CLASS.into(),
                "WM_CLASS",
                AtomEnum::STRING.into(),
                u32::MAX,
            )?;
            let pid = client.get_property(
                window,
                client.intern_atom("_NET_WM_PID")?,
                "_NET_WM_PID",
                AtomEnum::CARDINAL.into(),
                1,
            )?;

            let title = str::from_utf8(&name.value).with_context(|| "Invalid title UTF")?;
            let wm_class = parse_wm_class(&class).map_or(String::new(), |(_, class)| class);

            Ok(Some(WindowData {
                title: title.to_string(),
                wm_class,
                pid: pid.value32().and_then(|mut values| values.next()),
            }))
        })
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        property_name: &str,
        property_type: Atom,
        long_length: u32,
    ) -> anyhow::Result<GetPropertyReply> {
        self.connection
            .get_property(false, window, property, property_type, 0, long_length)
            .with_context(|| format!("GetPropertyRequest[{property_name}] failed"))?
            .reply()
            .with_context(|| format!("GetPropertyReply[{property_name}] failed"))
    }

    fn intern_atom(&self, name: &str) -> anyhow::Result<Atom> {
        Ok(self
            .connection
            .intern_atom(false, name.as_bytes())
            .with_context(|| format!("InternAtomRequest[{name}] failed"))?
            .reply()
            .with_context(|| format!("InternAtomReply[{name}] failed"))?
            .atom)
    }

    fn find_active_window(&self) -> anyhow::Result<Option<Window>> {
        let window: Atom = AtomEnum::WINDOW.into();
        let net_active_window = self.intern_atom("_NET_ACTIVE_WINDOW")?;
        let active_window = self.get_property(
            self.screen_root,
            net_active_window,
            "_NET_ACTIVE_WINDOW",
            window,
            1,
        )?;

        if active_window.format == 32 && active_window.length == 1 {
            let window_id = active_window
                .value32()
                .ok_or(anyhow!("Invalid message. Expected value with format = 32"))?
                .next()
                .ok_or(anyhow!("Active window is not found"))?;

            Ok((window_id != 0).then_some(window_id))
        } else {
            Ok(Some(
                self.connection
                    .get_input_focus()
                    .with_context(|| "Failed to get input focus")?
                    .reply()
                    .with_context(|| "Failed to read input focus from reply")?
                    .focus,
            ))
        }
    }
}

/// The executable of a process, unreadable for processes of other users.
pub fn process_executable(pid: u32) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/{pid}/exe"))
        .map_err(|e| trace!("Executable of process {pid} is unknown: {e}"))
        .ok()
}

/// `WM_CLASS` holds two null-terminated strings, the instance and the class.
fn parse_wm_class(property: &GetPropertyReply) -> anyhow::Result<(String, String)> {
    if property.format != 8 {
        bail!("Malformed property: wrong format");
    }
    parse_wm_class_value(&property.value)
}

fn parse_wm_class_value(value: &[u8]) -> anyhow::Result<(String, String)> {
    let Some(middle) = value.iter().position(|&b| b == 0) else {
        bail!("Missing null byte");
    };
    let (instance, class) = value.split_at(middle);
    let mut class = &class[1..];
    if class.last() == Some(&0) {
        class = &class[..class.len() - 1];
    }

    Ok((
        str::from_utf8(instance)?.to_string(),
        str::from_utf8(class)?.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"navigator\0firefox\0", "navigator", "firefox")]
    #[case(b"code\0Code", "code", "Code")]
    #[case(b"\0\0", "", "")]
    fn wm_class_values(#[case] value: &[u8], #[case] instance: &str, #[case] class: &str) {
        assert_eq!(
            (instance.to_string(), class.to_string()),
            parse_wm_class_value(value).unwrap()
        );
    }

    #[rstest]
    fn wm_class_without_separator() {
        assert!(parse_wm_class_value(b"broken").is_err());
    }

    #[rstest]
    fn own_process_executable() {
        assert_eq!(
            std::env::current_exe().ok(),
            process_executable(std::process::id())
        );
    }
}
