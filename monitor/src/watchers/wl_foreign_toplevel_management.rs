use super::wl_connection::{subscribe_state, WlEventConnection};
use super::{FocusSource, FocusedWindow};
use async_trait::async_trait;
use std::collections::HashMap;
use wayland_client::{
    event_created_child, globals::GlobalListContents, protocol::wl_registry, Connection, Dispatch,
    Proxy, QueueHandle,
};
use wayland_protocols_wlr::foreign_toplevel::v1::client::zwlr_foreign_toplevel_handle_v1::{
    Event as HandleEvent, State as HandleState, ZwlrForeignToplevelHandleV1,
};
use wayland_protocols_wlr::foreign_toplevel::v1::client::zwlr_foreign_toplevel_manager_v1::{
    Event as ManagerEvent, ZwlrForeignToplevelManagerV1, EVT_TOPLEVEL_OPCODE,
};

#[derive(Default)]
struct WindowData {
    app_id: String,
    title: String,
}

#[derive(Default)]
struct ToplevelState {
    windows: HashMap<String, WindowData>,
    current_window_id: Option<String>,
}

impl Dispatch<ZwlrForeignToplevelManagerV1, ()> for ToplevelState {
    fn event(
        state: &mut Self,
        _: &ZwlrForeignToplevelManagerV1,
        event: <ZwlrForeignToplevelManagerV1 as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            ManagerEvent::Toplevel { toplevel } => {
                trace!("Toplevel handle is received {}", toplevel.id());
                state
                    .windows
                    .insert(toplevel.id().to_string(), WindowData::default());
            }
            ManagerEvent::Finished => {
                warn!("Toplevel manager is finished, focus is no longer reported");
            }
            _ => (),
        };
    }

    event_created_child!(ToplevelState, ZwlrForeignToplevelManagerV1, [
        EVT_TOPLEVEL_OPCODE => (ZwlrForeignToplevelHandleV1, ()),
    ]);
}

subscribe_state!(wl_registry::WlRegistry, GlobalListContents, ToplevelState);
subscribe_state!(wl_registry::WlRegistry, (), ToplevelState);

impl Dispatch<ZwlrForeignToplevelHandleV1, ()> for ToplevelState {
    fn event(
        toplevel_state: &mut Self,
        handle: &ZwlrForeignToplevelHandleV1,
        event: <ZwlrForeignToplevelHandleV1 as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let id = handle.id().to_string();
        let Some(window) = toplevel_state.windows.get_mut(&id) else {
            debug!("Window is not found: {id}");
            return;
        };

        match event {
            HandleEvent::Title { title } => {
                trace!("Title is changed for {id}: {title}");
                window.title = title;
            }
            HandleEvent::AppId { app_id } => {
                trace!("App ID is changed for {id}: {app_id}");
                window.app_id = app_id;
            }
            HandleEvent::State { state } => {
                // The state array holds native-endian u32 values.
                let activated = state
                    .chunks_exact(4)
                    .filter_map(|chunk| chunk.try_into().ok())
                    .map(u32::from_ne_bytes)
                    .any(|value| value == HandleState::Activated as u32);
                if activated {
                    trace!("Window is activated: {id}");
                    toplevel_state.current_window_id = Some(id);
                } else if toplevel_state.current_window_id.as_ref() == Some(&id) {
                    toplevel_state.current_window_id = None;
                }
            }
            HandleEvent::Closed => {
                trace!("Window is closed: {id}");
                toplevel_state.windows.remove(&id);
                if toplevel_state.current_window_id.as_ref() == Some(&id) {
                    toplevel_state.current_window_id = None;
                }
            }
            _ => (),
        };
    }
}

pub struct WindowSource {
    connection: WlEventConnection<ToplevelState>,
    toplevel_state: ToplevelState,
}

#[async_trait]
impl FocusSource for WindowSource {
    async fn new() -> anyhow::Result<Self> {
        let mut connection: WlEventConnection<ToplevelState> = WlEventConnection::connect()?;
        connection.get_foreign_toplevel_manager()?;

        let mut toplevel_state = ToplevelState::default();
        connection.roundtrip(&mut toplevel_state)?;

        Ok(Self {
            connection,
            toplevel_state,
        })
    }

    async fn focused_window(&mut self) -> anyhow::Result<Option<FocusedWindow>> {
        self.connection.roundtrip(&mut self.toplevel_state)?;

        let window = self
            .toplevel_state
            .current_window_id
            .as_ref()
            .and_then(|id| self.toplevel_state.windows.get(id));

        Ok(window.map(|window| FocusedWindow {
            executable: None,
            app_id: window.app_id.clone(),
            title: window.title.clone(),
        }))
    }
}
