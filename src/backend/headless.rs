//! In-memory backend
//!
//! Keeps just enough state to answer the core's queries (layout, hit tests,
//! pressed keys) and records every command it receives so callers can
//! inspect what the core did.

use log::{debug, trace};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use super::{
    AxisEvent, BackendResult, ButtonState, Cursor, DataSource, DecorationHandle, DeviceHandle,
    Display, HeadState, Keyboards, Mode, OutputBackend, OutputHandle, OutputInfo, OutputLayout,
    OutputManagement, OutputState, SceneGraph, SceneHit, SceneLayer, SceneNode, Seat, SeatClient,
    Shell, SurfaceHandle,
};
use crate::client::Rectangle;
use crate::config::{DecorationMode, KeyboardConfig};
use crate::error::BackendError;
use crate::input::keyboard::{KeyState, KeyboardLayout, KeyboardModifiers, XkbLayout};
use crate::input::SeatCapabilities;

/// Builds the layout used to resolve keysyms for a new keyboard
pub type LayoutFactory = Box<dyn Fn(&KeyboardConfig) -> BackendResult<Box<dyn KeyboardLayout>>>;

#[derive(Debug, Clone)]
pub struct HeadlessOutput {
    pub info: OutputInfo,
    pub render_ready: bool,
    pub commits: Vec<OutputState>,
    pub renders: u32,
    pub last_frame_done: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadlessNode {
    pub surface: SurfaceHandle,
    pub layer: SceneLayer,
    pub enabled: bool,
    pub position: (i32, i32),
}

/// What the shell has been told about a toplevel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToplevelState {
    pub size: Option<(i32, i32)>,
    pub activated: bool,
    pub close_requested: bool,
}

/// Everything sent to the seat
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeatLog {
    pub capabilities: SeatCapabilities,
    pub keyboard: Option<DeviceHandle>,
    pub keyboard_focus: Option<SurfaceHandle>,
    /// Pressed keys and modifiers sent with the last keyboard enter
    pub last_enter: Option<(Vec<u32>, KeyboardModifiers)>,
    pub keys: Vec<(u32, u32, KeyState)>,
    pub modifiers: Vec<KeyboardModifiers>,
    pub pointer_focus: Option<SurfaceHandle>,
    pub pointer_motions: Vec<(u32, f64, f64)>,
    pub buttons: Vec<(u32, u32, ButtonState)>,
    pub axis: Vec<AxisEvent>,
    pub frames: u32,
    pub selection: Option<(Option<DataSource>, u32)>,
}

#[derive(Debug, Clone, Default)]
pub struct HeadlessKeyboard {
    pub repeat: Option<(i32, i32)>,
    pub pressed: Vec<u32>,
}

pub struct HeadlessBackend {
    next_handle: u64,
    outputs: BTreeMap<OutputHandle, HeadlessOutput>,
    layout: Vec<(OutputHandle, (i32, i32))>,
    unplaceable: HashSet<OutputHandle>,
    failing_commits: HashSet<OutputHandle>,
    rejected_states: HashSet<OutputHandle>,
    failing_render: HashSet<OutputHandle>,

    nodes: HashMap<SceneNode, HeadlessNode>,
    /// Per scene layer, bottom to top
    stacking: HashMap<SceneLayer, Vec<SceneNode>>,
    surface_sizes: HashMap<SurfaceHandle, (i32, i32)>,
    surface_clients: HashMap<SurfaceHandle, SeatClient>,
    restacks: u32,

    toplevels: HashMap<SurfaceHandle, ToplevelState>,
    decorations: HashMap<DecorationHandle, DecorationMode>,

    seat: SeatLog,

    cursor: (f64, f64),
    cursor_theme: Option<(Option<String>, u32)>,
    cursor_image: Option<String>,
    cursor_surface: Option<(Option<SurfaceHandle>, (i32, i32))>,
    cursor_devices: Vec<DeviceHandle>,

    keyboards: HashMap<DeviceHandle, HeadlessKeyboard>,
    layout_factory: LayoutFactory,

    published_heads: Vec<Vec<HeadState>>,
    config_results: Vec<(u32, bool)>,
    terminated: bool,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            outputs: BTreeMap::new(),
            layout: Vec::new(),
            unplaceable: HashSet::new(),
            failing_commits: HashSet::new(),
            rejected_states: HashSet::new(),
            failing_render: HashSet::new(),
            nodes: HashMap::new(),
            stacking: HashMap::new(),
            surface_sizes: HashMap::new(),
            surface_clients: HashMap::new(),
            restacks: 0,
            toplevels: HashMap::new(),
            decorations: HashMap::new(),
            seat: SeatLog::default(),
            cursor: (0.0, 0.0),
            cursor_theme: None,
            cursor_image: None,
            cursor_surface: None,
            cursor_devices: Vec::new(),
            keyboards: HashMap::new(),
            layout_factory: Box::new(|config: &KeyboardConfig| {
                XkbLayout::from_config(config).map(|layout| Box::new(layout) as Box<dyn KeyboardLayout>)
            }),
            published_heads: Vec::new(),
            config_results: Vec::new(),
            terminated: false,
        }
    }

    /// Replace the keymap compiler used for new keyboards
    pub fn with_layout_factory(
        mut self,
        factory: impl Fn(&KeyboardConfig) -> BackendResult<Box<dyn KeyboardLayout>> + 'static,
    ) -> Self {
        self.layout_factory = Box::new(factory);
        self
    }

    fn mint(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    /// Plug in a desktop display with a single preferred mode
    pub fn add_output(&mut self, name: &str, mode: Mode) -> OutputHandle {
        self.insert_output(name, Some(mode), false)
    }

    /// Plug in a display that must not be used as a desktop (VR headset)
    pub fn add_non_desktop_output(&mut self, name: &str, mode: Mode) -> OutputHandle {
        self.insert_output(name, Some(mode), true)
    }

    fn insert_output(&mut self, name: &str, mode: Option<Mode>, non_desktop: bool) -> OutputHandle {
        let handle = OutputHandle(self.mint());
        self.outputs.insert(
            handle,
            HeadlessOutput {
                info: OutputInfo {
                    name: name.to_string(),
                    make: "headless".to_string(),
                    model: "virtual".to_string(),
                    non_desktop,
                    preferred_mode: mode,
                    current_mode: None,
                    enabled: false,
                    position: (0, 0),
                    scale: 1.0,
                },
                render_ready: false,
                commits: Vec::new(),
                renders: 0,
                last_frame_done: None,
            },
        );
        handle
    }

    /// Unplug a display; the caller raises the destroy event
    pub fn remove_output(&mut self, handle: OutputHandle) {
        self.outputs.remove(&handle);
        self.layout.retain(|(other, _)| *other != handle);
    }

    /// Make the layout report an empty box for this output
    pub fn make_unplaceable(&mut self, handle: OutputHandle) {
        self.unplaceable.insert(handle);
    }

    /// Make every commit to this output fail
    pub fn fail_commits(&mut self, handle: OutputHandle) {
        self.failing_commits.insert(handle);
    }

    /// Make state tests for this output fail
    pub fn reject_states(&mut self, handle: OutputHandle) {
        self.rejected_states.insert(handle);
    }

    pub fn fail_render_init(&mut self, handle: OutputHandle) {
        self.failing_render.insert(handle);
    }

    pub fn new_device(&mut self) -> DeviceHandle {
        DeviceHandle(self.mint())
    }

    pub fn new_surface(&mut self) -> SurfaceHandle {
        SurfaceHandle(self.mint())
    }

    /// Size used for hit testing surfaces the core never resizes (layer surfaces)
    pub fn set_surface_size(&mut self, surface: SurfaceHandle, width: i32, height: i32) {
        self.surface_sizes.insert(surface, (width, height));
    }

    /// Associate a surface with the seat client that owns it
    pub fn set_surface_client(&mut self, surface: SurfaceHandle, client: SeatClient) {
        self.surface_clients.insert(surface, client);
    }

    pub fn set_pressed_keys(&mut self, device: DeviceHandle, keys: Vec<u32>) {
        self.keyboards.entry(device).or_default().pressed = keys;
    }

    pub fn output(&self, handle: OutputHandle) -> Option<&HeadlessOutput> {
        self.outputs.get(&handle)
    }

    pub fn node(&self, node: SceneNode) -> Option<&HeadlessNode> {
        self.nodes.get(&node)
    }

    pub fn node_of(&self, surface: SurfaceHandle) -> Option<SceneNode> {
        self.nodes
            .iter()
            .find(|(_, node)| node.surface == surface)
            .map(|(id, _)| *id)
    }

    pub fn is_surface_shown(&self, surface: SurfaceHandle) -> bool {
        self.node_of(surface)
            .and_then(|node| self.nodes.get(&node))
            .is_some_and(|node| node.enabled)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn restack_count(&self) -> u32 {
        self.restacks
    }

    pub fn toplevel(&self, surface: SurfaceHandle) -> Option<&ToplevelState> {
        self.toplevels.get(&surface)
    }

    pub fn decoration_mode(&self, decoration: DecorationHandle) -> Option<DecorationMode> {
        self.decorations.get(&decoration).copied()
    }

    pub fn seat(&self) -> &SeatLog {
        &self.seat
    }

    /// Theme name and size last loaded
    pub fn cursor_theme(&self) -> Option<(Option<&str>, u32)> {
        self.cursor_theme
            .as_ref()
            .map(|(name, size)| (name.as_deref(), *size))
    }

    pub fn cursor_image(&self) -> Option<&str> {
        self.cursor_image.as_deref()
    }

    pub fn cursor_surface(&self) -> Option<(Option<SurfaceHandle>, (i32, i32))> {
        self.cursor_surface
    }

    pub fn cursor_devices(&self) -> &[DeviceHandle] {
        &self.cursor_devices
    }

    pub fn keyboard(&self, device: DeviceHandle) -> Option<&HeadlessKeyboard> {
        self.keyboards.get(&device)
    }

    /// Every configuration published to output-management clients, oldest first
    pub fn published_heads(&self) -> &[Vec<HeadState>] {
        &self.published_heads
    }

    pub fn config_results(&self) -> &[(u32, bool)] {
        &self.config_results
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn output_mut(&mut self, handle: OutputHandle) -> BackendResult<&mut HeadlessOutput> {
        self.outputs
            .get_mut(&handle)
            .ok_or(BackendError::UnknownHandle(handle.0))
    }

    fn placed_box(&self, handle: OutputHandle, position: (i32, i32)) -> Rectangle {
        if self.unplaceable.contains(&handle) {
            return Rectangle::default();
        }
        let Some(output) = self.outputs.get(&handle) else {
            return Rectangle::default();
        };
        match output.info.current_mode.filter(|_| output.info.enabled) {
            Some(mode) => Rectangle::new(position.0, position.1, mode.width, mode.height),
            None => Rectangle::default(),
        }
    }

    fn boxes(&self) -> impl Iterator<Item = (OutputHandle, Rectangle)> + '_ {
        self.layout
            .iter()
            .map(|(handle, position)| (*handle, self.placed_box(*handle, *position)))
            .filter(|(_, rect)| !rect.is_empty())
    }

    /// Closest point to `(x, y)` inside the layout
    fn clamp_to_layout(&self, x: f64, y: f64) -> (f64, f64) {
        self.boxes()
            .map(|(_, rect)| {
                let cx = x.clamp(rect.x as f64, (rect.right() - 1) as f64);
                let cy = y.clamp(rect.y as f64, (rect.bottom() - 1) as f64);
                ((cx, cy), (cx - x).powi(2) + (cy - y).powi(2))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map_or((x, y), |(point, _)| point)
    }

    fn node_rect(&self, node: &HeadlessNode) -> Rectangle {
        let (width, height) = self
            .toplevels
            .get(&node.surface)
            .and_then(|toplevel| toplevel.size)
            .or_else(|| self.surface_sizes.get(&node.surface).copied())
            .unwrap_or((0, 0));
        Rectangle::new(node.position.0, node.position.1, width, height)
    }
}

impl OutputBackend for HeadlessBackend {
    fn output_info(&self, output: OutputHandle) -> Option<OutputInfo> {
        self.outputs.get(&output).map(|output| output.info.clone())
    }

    fn init_output_render(&mut self, output: OutputHandle) -> BackendResult<()> {
        let failing = self.failing_render.contains(&output);
        let entry = self.output_mut(output)?;
        if failing {
            return Err(BackendError::RenderInit(entry.info.name.clone()));
        }
        entry.render_ready = true;
        Ok(())
    }

    fn test_output_state(&self, output: OutputHandle, state: &OutputState) -> BackendResult<()> {
        let entry = self
            .outputs
            .get(&output)
            .ok_or(BackendError::UnknownHandle(output.0))?;
        if self.rejected_states.contains(&output) {
            return Err(BackendError::Commit {
                output: entry.info.name.clone(),
                reason: "state not supported".to_string(),
            });
        }
        let enabled = state.enabled.unwrap_or(entry.info.enabled);
        let mode = state.mode.or(entry.info.current_mode);
        if enabled && mode.map_or(true, |mode| mode.is_empty()) {
            return Err(BackendError::Commit {
                output: entry.info.name.clone(),
                reason: "enabled without a mode".to_string(),
            });
        }
        Ok(())
    }

    fn commit_output_state(&mut self, output: OutputHandle, state: &OutputState) -> BackendResult<()> {
        let failing = self.failing_commits.contains(&output);
        let entry = self.output_mut(output)?;
        if !entry.render_ready || failing {
            return Err(BackendError::Commit {
                output: entry.info.name.clone(),
                reason: if failing {
                    "rejected by backend".to_string()
                } else {
                    "renderer not initialized".to_string()
                },
            });
        }
        if let Some(enabled) = state.enabled {
            entry.info.enabled = enabled;
        }
        if let Some(mode) = state.mode {
            entry.info.current_mode = Some(mode);
        }
        if let Some(position) = state.position {
            entry.info.position = position;
        }
        if let Some(scale) = state.scale {
            entry.info.scale = scale;
        }
        entry.commits.push(state.clone());
        debug!("committed {:?} to {}", state, entry.info.name);
        Ok(())
    }

    fn render_output(&mut self, output: OutputHandle) -> BackendResult<()> {
        self.output_mut(output)?.renders += 1;
        Ok(())
    }

    fn send_frame_done(&mut self, output: OutputHandle, now: Duration) {
        if let Some(entry) = self.outputs.get_mut(&output) {
            entry.last_frame_done = Some(now);
        }
    }
}

impl OutputLayout for HeadlessBackend {
    fn layout_add_auto(&mut self, output: OutputHandle) -> Rectangle {
        let x = self
            .boxes()
            .filter(|(handle, _)| *handle != output)
            .map(|(_, rect)| rect.right())
            .max()
            .unwrap_or(0);
        self.layout.retain(|(other, _)| *other != output);
        self.layout.push((output, (x, 0)));
        if let Some(entry) = self.outputs.get_mut(&output) {
            entry.info.position = (x, 0);
        }
        self.placed_box(output, (x, 0))
    }

    fn layout_move(&mut self, output: OutputHandle, x: i32, y: i32) {
        match self.layout.iter_mut().find(|(other, _)| *other == output) {
            Some((_, position)) => *position = (x, y),
            None => self.layout.push((output, (x, y))),
        }
        if let Some(entry) = self.outputs.get_mut(&output) {
            entry.info.position = (x, y);
        }
    }

    fn layout_remove(&mut self, output: OutputHandle) {
        self.layout.retain(|(other, _)| *other != output);
    }

    fn layout_output_at(&self, x: f64, y: f64) -> Option<OutputHandle> {
        self.boxes()
            .find(|(_, rect)| rect.contains(x, y))
            .map(|(handle, _)| handle)
    }

    fn layout_box(&self, output: OutputHandle) -> Rectangle {
        self.layout
            .iter()
            .find(|(other, _)| *other == output)
            .map_or(Rectangle::default(), |(_, position)| {
                self.placed_box(output, *position)
            })
    }
}

impl SceneGraph for HeadlessBackend {
    fn scene_create_node(&mut self, surface: SurfaceHandle, layer: SceneLayer) -> SceneNode {
        let node = SceneNode(self.mint());
        self.nodes.insert(
            node,
            HeadlessNode {
                surface,
                layer,
                enabled: true,
                position: (0, 0),
            },
        );
        self.stacking.entry(layer).or_default().push(node);
        node
    }

    fn scene_destroy_node(&mut self, node: SceneNode) {
        if let Some(removed) = self.nodes.remove(&node) {
            if let Some(stack) = self.stacking.get_mut(&removed.layer) {
                stack.retain(|other| *other != node);
            }
        }
    }

    fn scene_set_enabled(&mut self, node: SceneNode, enabled: bool) {
        if let Some(entry) = self.nodes.get_mut(&node) {
            entry.enabled = enabled;
        }
    }

    fn scene_set_position(&mut self, node: SceneNode, x: i32, y: i32) {
        if let Some(entry) = self.nodes.get_mut(&node) {
            entry.position = (x, y);
        }
    }

    fn scene_raise_to_top(&mut self, node: SceneNode) {
        let Some(layer) = self.nodes.get(&node).map(|entry| entry.layer) else {
            return;
        };
        if let Some(stack) = self.stacking.get_mut(&layer) {
            stack.retain(|other| *other != node);
            stack.push(node);
        }
    }

    fn scene_restack_layers(&mut self) {
        self.restacks += 1;
    }

    fn scene_surface_at(&self, x: f64, y: f64) -> Option<SceneHit> {
        const TOP_DOWN: [SceneLayer; 5] = [
            SceneLayer::Overlay,
            SceneLayer::Top,
            SceneLayer::Tile,
            SceneLayer::Bottom,
            SceneLayer::Background,
        ];
        TOP_DOWN
            .iter()
            .filter_map(|layer| self.stacking.get(layer))
            .flat_map(|stack| stack.iter().rev())
            .filter_map(|id| self.nodes.get(id).map(|node| (*id, node)))
            .filter(|(_, node)| node.enabled)
            .find(|(_, node)| self.node_rect(node).contains(x, y))
            .map(|(id, node)| SceneHit {
                node: id,
                surface: node.surface,
                sx: x - node.position.0 as f64,
                sy: y - node.position.1 as f64,
            })
    }
}

impl Shell for HeadlessBackend {
    fn toplevel_set_size(&mut self, surface: SurfaceHandle, width: i32, height: i32) {
        self.toplevels.entry(surface).or_default().size = Some((width, height));
    }

    fn toplevel_set_activated(&mut self, surface: SurfaceHandle, activated: bool) {
        self.toplevels.entry(surface).or_default().activated = activated;
    }

    fn toplevel_close(&mut self, surface: SurfaceHandle) {
        self.toplevels.entry(surface).or_default().close_requested = true;
    }

    fn decoration_set_mode(&mut self, decoration: DecorationHandle, mode: DecorationMode) {
        self.decorations.insert(decoration, mode);
    }
}

impl Seat for HeadlessBackend {
    fn seat_set_capabilities(&mut self, caps: SeatCapabilities) {
        self.seat.capabilities = caps;
    }

    fn seat_set_keyboard(&mut self, device: DeviceHandle) {
        self.seat.keyboard = Some(device);
    }

    fn seat_keyboard_enter(
        &mut self,
        surface: SurfaceHandle,
        pressed: &[u32],
        modifiers: &KeyboardModifiers,
    ) {
        self.seat.keyboard_focus = Some(surface);
        self.seat.last_enter = Some((pressed.to_vec(), *modifiers));
    }

    fn seat_keyboard_clear_focus(&mut self) {
        self.seat.keyboard_focus = None;
    }

    fn seat_keyboard_key(&mut self, time_msec: u32, keycode: u32, state: KeyState) {
        self.seat.keys.push((time_msec, keycode, state));
    }

    fn seat_keyboard_modifiers(&mut self, modifiers: &KeyboardModifiers) {
        self.seat.modifiers.push(*modifiers);
    }

    fn seat_pointer_enter(&mut self, surface: SurfaceHandle, _sx: f64, _sy: f64) {
        self.seat.pointer_focus = Some(surface);
    }

    fn seat_pointer_motion(&mut self, time_msec: u32, sx: f64, sy: f64) {
        self.seat.pointer_motions.push((time_msec, sx, sy));
    }

    fn seat_pointer_clear_focus(&mut self) {
        self.seat.pointer_focus = None;
    }

    fn seat_pointer_button(&mut self, time_msec: u32, button: u32, state: ButtonState) {
        self.seat.buttons.push((time_msec, button, state));
    }

    fn seat_pointer_axis(&mut self, event: &AxisEvent) {
        self.seat.axis.push(*event);
    }

    fn seat_pointer_frame(&mut self) {
        self.seat.frames += 1;
    }

    fn seat_pointer_focused_client(&self) -> Option<SeatClient> {
        self.seat
            .pointer_focus
            .and_then(|surface| self.surface_clients.get(&surface).copied())
    }

    fn seat_set_selection(&mut self, source: Option<DataSource>, serial: u32) {
        self.seat.selection = Some((source, serial));
    }
}

impl Cursor for HeadlessBackend {
    fn cursor_move(&mut self, _device: DeviceHandle, dx: f64, dy: f64) -> (f64, f64) {
        self.cursor = self.clamp_to_layout(self.cursor.0 + dx, self.cursor.1 + dy);
        trace!("cursor at {:?}", self.cursor);
        self.cursor
    }

    fn cursor_warp_absolute(&mut self, _device: DeviceHandle, x: f64, y: f64) -> (f64, f64) {
        let extents = self.boxes().map(|(_, rect)| rect).fold(None, |acc: Option<Rectangle>, rect| {
            Some(match acc {
                None => rect,
                Some(acc) => {
                    let left = acc.x.min(rect.x);
                    let top = acc.y.min(rect.y);
                    let right = acc.right().max(rect.right());
                    let bottom = acc.bottom().max(rect.bottom());
                    Rectangle::new(left, top, right - left, bottom - top)
                }
            })
        });
        if let Some(extents) = extents {
            let target = (
                extents.x as f64 + x.clamp(0.0, 1.0) * extents.width as f64,
                extents.y as f64 + y.clamp(0.0, 1.0) * extents.height as f64,
            );
            self.cursor = self.clamp_to_layout(target.0, target.1);
        }
        self.cursor
    }

    fn cursor_position(&self) -> (f64, f64) {
        self.cursor
    }

    fn cursor_attach_device(&mut self, device: DeviceHandle) {
        self.cursor_devices.push(device);
    }

    fn cursor_set_theme(&mut self, theme: Option<&str>, size: u32) {
        debug!("cursor theme {:?} at size {}", theme, size);
        self.cursor_theme = Some((theme.map(str::to_string), size));
    }

    fn cursor_set_image(&mut self, name: &str) {
        self.cursor_image = Some(name.to_string());
    }

    fn cursor_set_surface(&mut self, surface: Option<SurfaceHandle>, hotspot: (i32, i32)) {
        self.cursor_surface = Some((surface, hotspot));
    }
}

impl Keyboards for HeadlessBackend {
    fn keyboard_set_keymap(
        &mut self,
        device: DeviceHandle,
        config: &KeyboardConfig,
    ) -> BackendResult<Box<dyn KeyboardLayout>> {
        self.keyboards.entry(device).or_default();
        (self.layout_factory)(config)
    }

    fn keyboard_set_repeat_info(&mut self, device: DeviceHandle, rate: i32, delay: i32) {
        self.keyboards.entry(device).or_default().repeat = Some((rate, delay));
    }

    fn keyboard_pressed_keys(&self, device: DeviceHandle) -> Vec<u32> {
        self.keyboards
            .get(&device)
            .map(|keyboard| keyboard.pressed.clone())
            .unwrap_or_default()
    }
}

impl OutputManagement for HeadlessBackend {
    fn output_manager_set_configuration(&mut self, heads: &[HeadState]) {
        self.published_heads.push(heads.to_vec());
    }

    fn output_manager_send_result(&mut self, serial: u32, succeeded: bool) {
        self.config_results.push((serial, succeeded));
    }
}

impl Display for HeadlessBackend {
    fn display_terminate(&mut self) {
        self.terminated = true;
    }
}
