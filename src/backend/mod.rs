//! Boundary to the external collaborators
//!
//! The compositor core never renders, allocates buffers or speaks the Wayland
//! wire protocol itself. Everything it needs from the outside world is
//! expressed by the traits in this module; the handles they exchange are
//! opaque integers minted by the implementation.
//!
//! `headless` provides an in-memory implementation used by the binary and
//! the test-suite.

pub mod headless;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::client::Rectangle;
use crate::config::{DecorationMode, KeyboardConfig};
use crate::error::BackendError;
use crate::input::keyboard::{KeyState, KeyboardLayout, KeyboardModifiers};
use crate::input::SeatCapabilities;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);
    };
}

handle_type!(
    /// A physical display as known to the backend
    OutputHandle
);
handle_type!(
    /// An input device as known to the backend
    DeviceHandle
);
handle_type!(
    /// A client surface (toplevel, X11 window or layer surface)
    SurfaceHandle
);
handle_type!(
    /// A node in the backend scene graph
    SceneNode
);
handle_type!(
    /// A client connection bound to the seat
    SeatClient
);
handle_type!(
    /// A clipboard data source offered by a client
    DataSource
);
handle_type!(
    /// A toplevel decoration negotiation object
    DecorationHandle
);

/// Display mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub width: i32,
    pub height: i32,
    /// Refresh rate in millihertz
    pub refresh_mhz: i32,
}

impl Mode {
    pub fn new(width: i32, height: i32, refresh_mhz: i32) -> Self {
        Self { width, height, refresh_mhz }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Pending output state; unset fields are left unchanged on commit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputState {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub position: Option<(i32, i32)>,
    #[serde(default)]
    pub scale: Option<f32>,
}

impl OutputState {
    pub fn enable(mode: Option<Mode>) -> Self {
        Self {
            enabled: Some(true),
            mode,
            ..Default::default()
        }
    }
}

/// Static description of a display reported by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    pub name: String,
    pub make: String,
    pub model: String,
    /// VR headsets and similar; never configured as desktop outputs
    pub non_desktop: bool,
    pub preferred_mode: Option<Mode>,
    pub current_mode: Option<Mode>,
    pub enabled: bool,
    pub position: (i32, i32),
    pub scale: f32,
}

/// Head description published to the output-management protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadState {
    pub output: OutputHandle,
    pub name: String,
    pub enabled: bool,
    pub x: i32,
    pub y: i32,
    pub mode: Option<Mode>,
}

/// Scene sub-trees, bottom to top
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneLayer {
    Background,
    Bottom,
    Tile,
    Top,
    Overlay,
}

/// Result of a scene-graph hit test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneHit {
    pub node: SceneNode,
    pub surface: SurfaceHandle,
    /// Surface-local coordinates
    pub sx: f64,
    pub sy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonState {
    Pressed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisOrientation {
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisSource {
    Wheel,
    Finger,
    Continuous,
    WheelTilt,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisEvent {
    pub time_msec: u32,
    pub orientation: AxisOrientation,
    pub delta: f64,
    pub delta_discrete: i32,
    pub source: AxisSource,
}

/// Display hardware: rendering setup, state commits and frame pacing
pub trait OutputBackend {
    fn output_info(&self, output: OutputHandle) -> Option<OutputInfo>;

    /// Bind the output to the renderer and allocator. Must precede the first commit.
    fn init_output_render(&mut self, output: OutputHandle) -> BackendResult<()>;

    /// Check a state without applying it
    fn test_output_state(&self, output: OutputHandle, state: &OutputState) -> BackendResult<()>;

    fn commit_output_state(&mut self, output: OutputHandle, state: &OutputState)
        -> BackendResult<()>;

    /// Render the scene for this output and commit the result
    fn render_output(&mut self, output: OutputHandle) -> BackendResult<()>;

    /// Tell surfaces on this output that a frame was presented at `now` (monotonic)
    fn send_frame_done(&mut self, output: OutputHandle, now: Duration);
}

/// Arrangement of outputs in the global coordinate space
pub trait OutputLayout {
    /// Place the output automatically (to the right of existing ones)
    fn layout_add_auto(&mut self, output: OutputHandle) -> Rectangle;

    fn layout_move(&mut self, output: OutputHandle, x: i32, y: i32);

    fn layout_remove(&mut self, output: OutputHandle);

    fn layout_output_at(&self, x: f64, y: f64) -> Option<OutputHandle>;

    /// Box of the output in layout coordinates; empty if it has no place
    fn layout_box(&self, output: OutputHandle) -> Rectangle;
}

/// Scene graph holding one node per client
pub trait SceneGraph {
    fn scene_create_node(&mut self, surface: SurfaceHandle, layer: SceneLayer) -> SceneNode;

    fn scene_destroy_node(&mut self, node: SceneNode);

    fn scene_set_enabled(&mut self, node: SceneNode, enabled: bool);

    fn scene_set_position(&mut self, node: SceneNode, x: i32, y: i32);

    fn scene_raise_to_top(&mut self, node: SceneNode);

    /// Lower background/bottom trees, raise top/overlay trees
    fn scene_restack_layers(&mut self);

    /// Topmost enabled surface at a layout position
    fn scene_surface_at(&self, x: f64, y: f64) -> Option<SceneHit>;
}

/// Shell protocols (xdg-shell, XWayland, decorations)
pub trait Shell {
    /// Ask the client to adopt a new size
    fn toplevel_set_size(&mut self, surface: SurfaceHandle, width: i32, height: i32);

    fn toplevel_set_activated(&mut self, surface: SurfaceHandle, activated: bool);

    fn toplevel_close(&mut self, surface: SurfaceHandle);

    fn decoration_set_mode(&mut self, decoration: DecorationHandle, mode: DecorationMode);
}

/// The seat: focus and event forwarding to clients
pub trait Seat {
    fn seat_set_capabilities(&mut self, caps: SeatCapabilities);

    fn seat_set_keyboard(&mut self, device: DeviceHandle);

    fn seat_keyboard_enter(
        &mut self,
        surface: SurfaceHandle,
        pressed: &[u32],
        modifiers: &KeyboardModifiers,
    );

    fn seat_keyboard_clear_focus(&mut self);

    fn seat_keyboard_key(&mut self, time_msec: u32, keycode: u32, state: KeyState);

    fn seat_keyboard_modifiers(&mut self, modifiers: &KeyboardModifiers);

    fn seat_pointer_enter(&mut self, surface: SurfaceHandle, sx: f64, sy: f64);

    fn seat_pointer_motion(&mut self, time_msec: u32, sx: f64, sy: f64);

    fn seat_pointer_clear_focus(&mut self);

    fn seat_pointer_button(&mut self, time_msec: u32, button: u32, state: ButtonState);

    fn seat_pointer_axis(&mut self, event: &AxisEvent);

    fn seat_pointer_frame(&mut self);

    /// Client currently holding pointer focus
    fn seat_pointer_focused_client(&self) -> Option<SeatClient>;

    fn seat_set_selection(&mut self, source: Option<DataSource>, serial: u32);
}

/// The on-screen cursor, its motion and image
pub trait Cursor {
    /// Apply relative motion; returns the new, layout-clamped position
    fn cursor_move(&mut self, device: DeviceHandle, dx: f64, dy: f64) -> (f64, f64);

    /// Warp to a normalized [0, 1] position; returns the new position
    fn cursor_warp_absolute(&mut self, device: DeviceHandle, x: f64, y: f64) -> (f64, f64);

    fn cursor_position(&self) -> (f64, f64);

    fn cursor_attach_device(&mut self, device: DeviceHandle);

    /// Load the xcursor theme images are taken from; `None` is the default theme
    fn cursor_set_theme(&mut self, theme: Option<&str>, size: u32);

    fn cursor_set_image(&mut self, name: &str);

    fn cursor_set_surface(&mut self, surface: Option<SurfaceHandle>, hotspot: (i32, i32));
}

/// Keyboard hardware configuration
pub trait Keyboards {
    /// Compile and install a keymap; returns the layout used to resolve keysyms
    fn keyboard_set_keymap(
        &mut self,
        device: DeviceHandle,
        config: &KeyboardConfig,
    ) -> BackendResult<Box<dyn KeyboardLayout>>;

    fn keyboard_set_repeat_info(&mut self, device: DeviceHandle, rate: i32, delay: i32);

    /// Keycodes currently held down on a device
    fn keyboard_pressed_keys(&self, device: DeviceHandle) -> Vec<u32>;
}

/// wlr-output-management protocol
pub trait OutputManagement {
    fn output_manager_set_configuration(&mut self, heads: &[HeadState]);

    fn output_manager_send_result(&mut self, serial: u32, succeeded: bool);
}

/// Display lifetime
pub trait Display {
    fn display_terminate(&mut self);
}

/// Everything the core needs from the outside world
pub trait Backend:
    OutputBackend
    + OutputLayout
    + SceneGraph
    + Shell
    + Seat
    + Cursor
    + Keyboards
    + OutputManagement
    + Display
    + 'static
{
}

impl<T> Backend for T where
    T: OutputBackend
        + OutputLayout
        + SceneGraph
        + Shell
        + Seat
        + Cursor
        + Keyboards
        + OutputManagement
        + Display
        + 'static
{
}
