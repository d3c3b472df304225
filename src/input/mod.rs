//! Input devices and keyboard routing
//!
//! Every device the backend reports becomes an [`Input`]. Pointers are handed
//! to the cursor, keyboards get a keymap and their own key/modifier
//! listeners, and the seat capability mask is rebuilt from the live devices
//! whenever one appears or disappears.

pub mod cursor;
pub mod keyboard;

use bitflags::bitflags;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::backend::{Backend, DeviceHandle, SurfaceHandle};
use crate::error::CoreResult;
use crate::events::{Event, EventKind, EventSource, Subscription};
use crate::registry::InputId;
use crate::server::Server;
use keyboard::{find_binding, KeyState, KeyboardLayout, KeyboardModifiers, Modifiers, XKB_KEYCODE_OFFSET};

bitflags! {
    /// Aggregate capabilities advertised by the seat
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SeatCapabilities: u32 {
        const POINTER = 1;
        const KEYBOARD = 2;
        const TOUCH = 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Keyboard,
    Pointer,
    Touch,
    Tablet,
    Switch,
    /// Anything the core does not route
    Misc,
}

/// Keyboard-specific device state
pub struct Keyboard {
    /// `None` when the keymap failed to compile; keys then go straight to clients
    layout: Option<Box<dyn KeyboardLayout>>,
    modifiers: KeyboardModifiers,
}

impl Keyboard {
    pub fn modifiers(&self) -> &KeyboardModifiers {
        &self.modifiers
    }

    pub fn has_layout(&self) -> bool {
        self.layout.is_some()
    }
}

impl fmt::Debug for Keyboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyboard")
            .field("layout", &self.layout.is_some())
            .field("modifiers", &self.modifiers)
            .finish()
    }
}

/// A live input device
#[derive(Debug)]
pub struct Input {
    pub id: InputId,
    pub device: DeviceHandle,
    pub kind: DeviceKind,
    pub name: String,
    pub keyboard: Option<Keyboard>,
    _listeners: Vec<Subscription>,
}

/// Capabilities implied by a set of live devices
pub fn capabilities_of<'a>(inputs: impl IntoIterator<Item = &'a Input>) -> SeatCapabilities {
    inputs
        .into_iter()
        .fold(SeatCapabilities::empty(), |caps, input| match input.kind {
            DeviceKind::Keyboard => caps | SeatCapabilities::KEYBOARD,
            DeviceKind::Pointer => caps | SeatCapabilities::POINTER,
            _ => caps,
        })
}

/// Things a key binding can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorAction {
    Quit,
    Spawn(String),
    /// Show a single tag (zero-based) on the current output
    View(u32),
    ViewAll,
    ToggleView(u32),
    /// Move the focused client to a tag
    Tag(u32),
    ToggleTag(u32),
    KillClient,
    FocusNext,
    FocusPrev,
    FocusOutputNext,
    PrintInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionParseError {
    #[error("unknown action `{0}`")]
    Unknown(String),
    #[error("action `{0}` needs an argument")]
    MissingArgument(String),
    #[error("invalid tag `{0}`: tags are numbered from 1")]
    InvalidTag(String),
}

impl CompositorAction {
    /// Tag index the action refers to, if any
    pub fn tag(&self) -> Option<u32> {
        match self {
            CompositorAction::View(tag)
            | CompositorAction::ToggleView(tag)
            | CompositorAction::Tag(tag)
            | CompositorAction::ToggleTag(tag) => Some(*tag),
            _ => None,
        }
    }
}

impl FromStr for CompositorAction {
    type Err = ActionParseError;

    /// Parse "view 3", "spawn foot --server", "quit", ...
    /// Tags in action strings are 1-based.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, arg) = match s.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (s, ""),
        };

        let tag = || -> Result<u32, ActionParseError> {
            if arg.is_empty() {
                return Err(ActionParseError::MissingArgument(name.to_string()));
            }
            match arg.parse::<u32>() {
                Ok(n) if n >= 1 => Ok(n - 1),
                _ => Err(ActionParseError::InvalidTag(arg.to_string())),
            }
        };

        let action = match name {
            "quit" => CompositorAction::Quit,
            "spawn" | "exec" => {
                if arg.is_empty() {
                    return Err(ActionParseError::MissingArgument(name.to_string()));
                }
                CompositorAction::Spawn(arg.to_string())
            }
            "view" => CompositorAction::View(tag()?),
            "view_all" => CompositorAction::ViewAll,
            "toggle_view" => CompositorAction::ToggleView(tag()?),
            "tag" => CompositorAction::Tag(tag()?),
            "toggle_tag" => CompositorAction::ToggleTag(tag()?),
            "kill_client" | "close" => CompositorAction::KillClient,
            "focus_next" => CompositorAction::FocusNext,
            "focus_prev" => CompositorAction::FocusPrev,
            "focus_output_next" => CompositorAction::FocusOutputNext,
            "print_info" => CompositorAction::PrintInfo,
            other => return Err(ActionParseError::Unknown(other.to_string())),
        };
        Ok(action)
    }
}

/// Record `device` as the seat keyboard and tell the seat
pub(crate) fn set_seat_keyboard<B: Backend>(server: &mut Server<B>, device: DeviceHandle) {
    server.seat_keyboard = Some(device);
    server.backend.seat_set_keyboard(device);
}

/// Modifiers of the seat keyboard, empty if there is none
pub(crate) fn seat_modifiers<B: Backend>(server: &Server<B>) -> Modifiers {
    server
        .seat_keyboard
        .and_then(|device| server.registry.find_by_device(device))
        .and_then(|input| input.keyboard.as_ref())
        .map(|keyboard| keyboard.modifiers.effective())
        .unwrap_or_default()
}

/// Give keyboard focus to `surface`, or clear it
pub(crate) fn focus_surface<B: Backend>(server: &mut Server<B>, surface: Option<SurfaceHandle>) {
    let Some(surface) = surface else {
        server.backend.seat_keyboard_clear_focus();
        return;
    };

    let (pressed, modifiers) = match server.seat_keyboard {
        Some(device) => {
            let modifiers = server
                .registry
                .find_by_device(device)
                .and_then(|input| input.keyboard.as_ref())
                .map(|keyboard| keyboard.modifiers)
                .unwrap_or_default();
            (server.backend.keyboard_pressed_keys(device), modifiers)
        }
        None => (Vec::new(), KeyboardModifiers::default()),
    };
    server
        .backend
        .seat_keyboard_enter(surface, &pressed, &modifiers);
}

/// Rebuild the seat capability mask from every live device
pub(crate) fn update_capabilities<B: Backend>(server: &mut Server<B>) {
    let caps = capabilities_of(server.registry.inputs.iter());
    if caps != server.capabilities {
        debug!("seat capabilities {:?} -> {:?}", server.capabilities, caps);
    }
    server.capabilities = caps;
    server.backend.seat_set_capabilities(caps);
}

pub(crate) fn new_input_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::NewInput { device, kind, name } = event else {
        return Ok(());
    };
    let (device, kind) = (*device, *kind);
    if server.registry.find_by_device(device).is_some() {
        warn!("device {:?} reported twice, ignoring", device);
        return Ok(());
    }

    let source = EventSource::Device(device);
    let mut listeners = vec![server
        .bus
        .subscribe(source, EventKind::InputDestroy, input_destroy_notify::<B>)];

    let keyboard = match kind {
        DeviceKind::Pointer => {
            server.backend.cursor_attach_device(device);
            None
        }
        DeviceKind::Keyboard => {
            let layout = match server
                .backend
                .keyboard_set_keymap(device, &server.config.keyboard)
            {
                Ok(layout) => Some(layout),
                Err(err) => {
                    warn!("keyboard {:?}: {}; bindings disabled on it", name, err);
                    None
                }
            };
            server.backend.keyboard_set_repeat_info(
                device,
                server.config.keyboard.repeat_rate,
                server.config.keyboard.repeat_delay,
            );
            listeners.push(
                server
                    .bus
                    .subscribe(source, EventKind::KeyboardKey, keyboard_key_notify::<B>),
            );
            listeners.push(server.bus.subscribe(
                source,
                EventKind::KeyboardModifiers,
                keyboard_modifiers_notify::<B>,
            ));
            set_seat_keyboard(server, device);
            Some(Keyboard {
                layout,
                modifiers: KeyboardModifiers::default(),
            })
        }
        _ => None,
    };

    let id = server.registry.inputs.reserve_id();
    server.registry.inputs.push_back(
        id,
        Input {
            id,
            device,
            kind,
            name: name.clone(),
            keyboard,
            _listeners: listeners,
        },
    );
    info!("new input {:?} ({:?}) as {:?}", name, kind, id);

    update_capabilities(server);
    Ok(())
}

pub(crate) fn input_destroy_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::InputDestroy { device } = event else {
        return Ok(());
    };
    let Some(id) = server.registry.find_by_device(*device).map(|input| input.id) else {
        return Ok(());
    };

    if let Some(input) = server.registry.inputs.remove(id) {
        info!("input {:?} ({:?}) removed", input.name, input.kind);
    }
    if server.seat_keyboard == Some(*device) {
        server.seat_keyboard = None;
    }
    update_capabilities(server);
    Ok(())
}

pub(crate) fn keyboard_key_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::KeyboardKey {
        device,
        time_msec,
        keycode,
        state,
    } = event
    else {
        return Ok(());
    };

    let (syms, mods) = match server
        .registry
        .find_by_device(*device)
        .and_then(|input| input.keyboard.as_ref())
    {
        Some(keyboard) => (
            keyboard
                .layout
                .as_ref()
                .map(|layout| layout.key_syms(keycode + XKB_KEYCODE_OFFSET))
                .unwrap_or_default(),
            keyboard.modifiers.effective(),
        ),
        None => return Ok(()),
    };

    let mut handled = false;
    if *state == KeyState::Pressed {
        for sym in syms {
            let action = find_binding(&server.bindings, mods, sym).map(|binding| binding.action.clone());
            if let Some(action) = action {
                debug!("binding {:?}+{} -> {:?}", mods, sym, action);
                handled = true;
                server.execute(action)?;
            }
        }
    }

    if !handled {
        set_seat_keyboard(server, *device);
        server
            .backend
            .seat_keyboard_key(*time_msec, *keycode, *state);
    }
    Ok(())
}

pub(crate) fn keyboard_modifiers_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    let Event::KeyboardModifiers { device, modifiers } = event else {
        return Ok(());
    };
    let Some(keyboard) = server
        .registry
        .find_by_device_mut(*device)
        .and_then(|input| input.keyboard.as_mut())
    else {
        return Ok(());
    };

    keyboard.modifiers = *modifiers;
    if let Some(layout) = keyboard.layout.as_mut() {
        layout.update_modifiers(modifiers);
    }

    set_seat_keyboard(server, *device);
    server.backend.seat_keyboard_modifiers(modifiers);
    Ok(())
}
