//! Pointer interaction
//!
//! The cursor is either passing events through to whatever is under it, or
//! dragging a client around (move) or one of its corners (resize). A grab
//! only exists inside [`CursorMode::Move`] / [`CursorMode::Resize`], so there
//! is no way to hold a grabbed client while in passthrough.

use bitflags::bitflags;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, ButtonState};
use crate::client::{self, Rectangle};
use crate::error::CoreResult;
use crate::events::Event;
use crate::input;
use crate::registry::{ClientId, Found};
use crate::server::Server;

/// Linux evdev button codes
pub const BTN_LEFT: u32 = 0x110;
pub const BTN_RIGHT: u32 = 0x111;
pub const BTN_MIDDLE: u32 = 0x112;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Edges: u32 {
        const TOP = 1;
        const BOTTOM = 2;
        const LEFT = 4;
        const RIGHT = 8;
    }
}

impl Edges {
    /// xcursor image name for dragging these edges
    pub fn cursor_name(self) -> &'static str {
        let top = self.contains(Edges::TOP);
        let bottom = self.contains(Edges::BOTTOM);
        let left = self.contains(Edges::LEFT);
        let right = self.contains(Edges::RIGHT);
        match (top, bottom, left, right) {
            (true, _, true, _) => "top_left_corner",
            (true, _, _, true) => "top_right_corner",
            (_, true, true, _) => "bottom_left_corner",
            (_, true, _, true) => "bottom_right_corner",
            (true, ..) => "top_side",
            (_, true, ..) => "bottom_side",
            (_, _, true, _) => "left_side",
            (_, _, _, true) => "right_side",
            _ => "left_ptr",
        }
    }
}

/// Button names accepted in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn code(self) -> u32 {
        match self {
            MouseButton::Left => BTN_LEFT,
            MouseButton::Right => BTN_RIGHT,
            MouseButton::Middle => BTN_MIDDLE,
        }
    }
}

/// An interactive move or resize in progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grab {
    pub client: ClientId,
    /// Move: cursor minus client origin. Resize: cursor at grab start.
    pub anchor: (f64, f64),
    /// Client box when the grab started
    pub original: Rectangle,
    pub edges: Edges,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CursorMode {
    #[default]
    Passthrough,
    Move(Grab),
    Resize(Grab),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabKind {
    Move,
    Resize,
}

#[derive(Debug, Default)]
pub struct CursorState {
    mode: CursorMode,
}

impl CursorState {
    pub fn mode(&self) -> &CursorMode {
        &self.mode
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.mode, CursorMode::Passthrough)
    }

    pub fn grabbed_client(&self) -> Option<ClientId> {
        match &self.mode {
            CursorMode::Move(grab) | CursorMode::Resize(grab) => Some(grab.client),
            CursorMode::Passthrough => None,
        }
    }

    /// Drop any grab and go back to passthrough
    pub fn reset(&mut self) {
        self.mode = CursorMode::Passthrough;
    }

    fn begin(&mut self, kind: GrabKind, grab: Grab) {
        self.mode = match kind {
            GrabKind::Move => CursorMode::Move(grab),
            GrabKind::Resize => CursorMode::Resize(grab),
        };
    }
}

/// Edges to drag when resizing `geom` from a pointer at `(x, y)`
pub fn resize_edges(geom: &Rectangle, x: f64, y: f64) -> Edges {
    let horizontal = if x < geom.x as f64 + (geom.width / 2) as f64 {
        Edges::LEFT
    } else {
        Edges::RIGHT
    };
    let vertical = if y < geom.y as f64 + (geom.height / 2) as f64 {
        Edges::TOP
    } else {
        Edges::BOTTOM
    };
    horizontal | vertical
}

/// Client origin for a move grab
pub fn move_origin(cursor: (f64, f64), anchor: (f64, f64)) -> (i32, i32) {
    ((cursor.0 - anchor.0) as i32, (cursor.1 - anchor.1) as i32)
}

/// Box resulting from dragging `edges` of `original` by `delta`.
/// A dragged edge never reaches its opposite edge; the other edges stay put.
pub fn resize_box(original: &Rectangle, edges: Edges, delta: (f64, f64)) -> Rectangle {
    let mut left = original.x;
    let mut right = original.right();
    let mut top = original.y;
    let mut bottom = original.bottom();

    if edges.contains(Edges::TOP) {
        top = (top as f64 + delta.1) as i32;
        if top >= bottom {
            top = bottom.saturating_sub(1);
        }
    } else if edges.contains(Edges::BOTTOM) {
        bottom = (bottom as f64 + delta.1) as i32;
        if bottom <= top {
            bottom = top.saturating_add(1);
        }
    }

    if edges.contains(Edges::LEFT) {
        left = (left as f64 + delta.0) as i32;
        if left >= right {
            left = right.saturating_sub(1);
        }
    } else if edges.contains(Edges::RIGHT) {
        right = (right as f64 + delta.0) as i32;
        if right <= left {
            right = left.saturating_add(1);
        }
    }

    Rectangle::new(
        left,
        top,
        right.saturating_sub(left).max(1),
        bottom.saturating_sub(top).max(1),
    )
}

/// Start moving or resizing `client` from the current cursor position
pub(crate) fn begin_interactive<B: Backend>(server: &mut Server<B>, id: ClientId, kind: GrabKind) {
    let Some(geom) = server.registry.clients.get(id).map(|client| client.geom) else {
        return;
    };
    let (x, y) = server.backend.cursor_position();
    let (grab, image) = match kind {
        GrabKind::Move => (
            Grab {
                client: id,
                anchor: (x - geom.x as f64, y - geom.y as f64),
                original: geom,
                edges: Edges::empty(),
            },
            "fleur",
        ),
        GrabKind::Resize => {
            let edges = resize_edges(&geom, x, y);
            (
                Grab {
                    client: id,
                    anchor: (x, y),
                    original: geom,
                    edges,
                },
                edges.cursor_name(),
            )
        }
    };
    debug!("begin {:?} of {:?} at ({:.1}, {:.1}) edges {:?}", kind, id, x, y, grab.edges);
    server.cursor.begin(kind, grab);
    server.backend.cursor_set_image(image);
}

fn process_motion<B: Backend>(server: &mut Server<B>, time_msec: u32) {
    let cursor = server.backend.cursor_position();
    match *server.cursor.mode() {
        CursorMode::Move(grab) => {
            let (x, y) = move_origin(cursor, grab.anchor);
            match server.registry.clients.get_mut(grab.client) {
                Some(client) => {
                    client.geom.x = x;
                    client.geom.y = y;
                    server.backend.scene_set_position(client.node, x, y);
                }
                None => server.cursor.reset(),
            }
            return;
        }
        CursorMode::Resize(grab) => {
            if !server.registry.clients.contains(grab.client) {
                server.cursor.reset();
                return;
            }
            let delta = (cursor.0 - grab.anchor.0, cursor.1 - grab.anchor.1);
            let geom = resize_box(&grab.original, grab.edges, delta);
            client::set_size_position(server, grab.client, geom);
            return;
        }
        CursorMode::Passthrough => {}
    }

    let (client, hit) = match server.registry.find_at(&server.backend, cursor.0, cursor.1) {
        Some(Found::Client(client, hit)) => (Some(client), Some(hit)),
        Some(Found::Surface(hit)) => (None, Some(hit)),
        Some(Found::Output(_)) | None => (None, None),
    };

    if client.is_none() {
        server.backend.cursor_set_image("left_ptr");
    }

    if let (Some(client), Some(hit)) = (client, hit) {
        if server.config.general.sloppy_focus {
            client::focus_client(server, client, hit.surface, false);
        }
    }

    match hit {
        Some(hit) => {
            trace!("pointer over {:?} at ({:.1}, {:.1})", hit.surface, hit.sx, hit.sy);
            server.backend.seat_pointer_enter(hit.surface, hit.sx, hit.sy);
            server.backend.seat_pointer_motion(time_msec, hit.sx, hit.sy);
        }
        None => server.backend.seat_pointer_clear_focus(),
    }
}

pub(crate) fn motion_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::PointerMotion {
        device,
        time_msec,
        dx,
        dy,
    } = event
    else {
        return Ok(());
    };
    server.backend.cursor_move(*device, *dx, *dy);
    process_motion(server, *time_msec);
    Ok(())
}

pub(crate) fn motion_absolute_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    let Event::PointerMotionAbsolute {
        device,
        time_msec,
        x,
        y,
    } = event
    else {
        return Ok(());
    };
    server.backend.cursor_warp_absolute(*device, *x, *y);
    process_motion(server, *time_msec);
    Ok(())
}

pub(crate) fn button_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::PointerButton {
        time_msec,
        button,
        state,
        ..
    } = event
    else {
        return Ok(());
    };

    server
        .backend
        .seat_pointer_button(*time_msec, *button, *state);

    if *state == ButtonState::Released {
        if !server.cursor.is_passthrough() {
            debug!("grab ended by button {:#x}", button);
        }
        server.cursor.reset();
        return Ok(());
    }

    let (x, y) = server.backend.cursor_position();
    let Some((client, hit)) = server.registry.client_at(&server.backend, x, y) else {
        info!("press on desktop at ({:.1}, {:.1})", x, y);
        return Ok(());
    };

    let mods = input::seat_modifiers(server);
    let grab_held = !server.grab_modifier.is_empty() && mods.contains(server.grab_modifier);
    let move_button = server.config.pointer.move_button.code();
    let resize_button = server.config.pointer.resize_button.code();
    if grab_held && *button == move_button {
        begin_interactive(server, client, GrabKind::Move);
    } else if grab_held && *button == resize_button {
        begin_interactive(server, client, GrabKind::Resize);
    } else {
        client::focus_client(server, client, hit.surface, true);
    }
    Ok(())
}

pub(crate) fn axis_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    if let Event::PointerAxis { axis, .. } = event {
        server.backend.seat_pointer_axis(axis);
    }
    Ok(())
}

pub(crate) fn frame_notify<B: Backend>(server: &mut Server<B>, _event: &Event) -> CoreResult<()> {
    server.backend.seat_pointer_frame();
    Ok(())
}

pub(crate) fn request_set_cursor_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    let Event::RequestSetCursor {
        seat_client,
        surface,
        hotspot,
    } = event
    else {
        return Ok(());
    };
    // only the client under the pointer may change its image
    if server.backend.seat_pointer_focused_client() == Some(*seat_client) {
        server.backend.cursor_set_surface(*surface, *hotspot);
    } else {
        trace!("ignoring cursor request from unfocused {:?}", seat_client);
    }
    Ok(())
}

pub(crate) fn request_set_selection_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    if let Event::RequestSetSelection { source, serial } = event {
        server.backend.seat_set_selection(*source, *serial);
    }
    Ok(())
}
