//! The compositor core
//!
//! [`Server`] owns every piece of state: the entity registry, the event bus,
//! the cursor state machine and the backend it drives. Events enter through
//! [`Server::dispatch`] and are routed to the listeners attached to their
//! source.

use anyhow::{Context, Result};
use log::{debug, error, info, log, trace, warn, Level};
use std::process::{Command, Stdio};
use std::time::Instant;

use crate::backend::Backend;
use crate::client;
use crate::config::StrataConfig;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventBus, EventKind, EventSource, Subscription};
use crate::input::cursor::{self, CursorState};
use crate::input::keyboard::{KeyBinding, Modifiers};
use crate::input::{self, CompositorAction, SeatCapabilities};
use crate::ipc::{self, OutputStatus, StatusRegistry};
use crate::output;
use crate::registry::{ClientId, OutputId, Registry};
use crate::tags::TagMask;
use crate::workspace;

pub struct Server<B: Backend> {
    pub(crate) backend: B,
    pub(crate) config: StrataConfig,
    pub(crate) bindings: Vec<KeyBinding>,
    pub(crate) grab_modifier: Modifiers,

    pub(crate) registry: Registry,
    pub(crate) bus: EventBus<Server<B>>,
    pub(crate) cursor: CursorState,
    pub(crate) capabilities: SeatCapabilities,
    pub(crate) seat_keyboard: Option<crate::backend::DeviceHandle>,
    pub(crate) cur_output: Option<OutputId>,
    pub(crate) status: StatusRegistry,

    pub(crate) running: bool,
    pub(crate) epoch: Instant,

    /// Listeners on the global sources; dropped last
    globals: Vec<Subscription>,
}

impl<B: Backend> Server<B> {
    /// Create the core and attach it to the backend's global event sources
    pub fn new(config: StrataConfig, backend: B) -> Result<Self> {
        info!("🏗️ Initializing compositor core...");

        config.validate().context("Invalid configuration")?;
        let bindings = config.compile_bindings()?;
        let grab_modifier = config.grab_modifier()?;
        debug!("{} key bindings, grab modifier {:?}", bindings.len(), grab_modifier);

        let mut server = Self {
            backend,
            config,
            bindings,
            grab_modifier,
            registry: Registry::new(),
            bus: EventBus::new(),
            cursor: CursorState::default(),
            capabilities: SeatCapabilities::empty(),
            seat_keyboard: None,
            cur_output: None,
            status: StatusRegistry::new(),
            running: true,
            epoch: Instant::now(),
            globals: Vec::new(),
        };
        let pointer = &server.config.pointer;
        let theme = Some(pointer.cursor_theme.as_str()).filter(|name| !name.is_empty());
        server.backend.cursor_set_theme(theme, pointer.cursor_size);
        server.attach_globals();

        info!("✅ Core ready ({} global listeners)", server.globals.len());
        Ok(server)
    }

    fn attach_globals(&mut self) {
        use EventKind as K;
        use EventSource as S;

        let table: [(EventSource, EventKind, crate::events::Handler<Self>); 16] = [
            (S::Backend, K::NewOutput, output::new_output_notify::<B>),
            (S::Backend, K::NewInput, input::new_input_notify::<B>),
            (S::Cursor, K::PointerMotion, cursor::motion_notify::<B>),
            (S::Cursor, K::PointerMotionAbsolute, cursor::motion_absolute_notify::<B>),
            (S::Cursor, K::PointerButton, cursor::button_notify::<B>),
            (S::Cursor, K::PointerAxis, cursor::axis_notify::<B>),
            (S::Cursor, K::PointerFrame, cursor::frame_notify::<B>),
            (S::Seat, K::RequestSetCursor, cursor::request_set_cursor_notify::<B>),
            (S::Seat, K::RequestSetSelection, cursor::request_set_selection_notify::<B>),
            (S::OutputLayout, K::LayoutChange, output::layout_change_notify::<B>),
            (S::OutputManager, K::OutputManagerApply, output::output_manager_apply_notify::<B>),
            (S::OutputManager, K::OutputManagerTest, output::output_manager_test_notify::<B>),
            (S::XdgShell, K::NewToplevel, client::new_toplevel_notify::<B>),
            (S::Xwayland, K::NewToplevel, client::new_toplevel_notify::<B>),
            (S::LayerShell, K::NewLayerSurface, client::new_layer_surface_notify::<B>),
            (S::DecorationManager, K::NewDecoration, client::new_decoration_notify::<B>),
        ];

        self.globals = table
            .into_iter()
            .map(|(source, kind, handler)| self.bus.subscribe(source, kind, handler))
            .collect();
    }

    /// Run every listener attached to the event's source. All listeners run
    /// even if one fails; the first failure is returned.
    pub fn dispatch(&mut self, event: Event) -> CoreResult<()> {
        let handlers = self.bus.handlers_for(&event);
        if handlers.is_empty() {
            trace!("no listener for {:?} from {:?}", event.kind(), event.source());
            return Ok(());
        }

        let mut first_error = None;
        for handler in handlers {
            if let Err(err) = handler(self, &event) {
                error!("{:?} handler failed: {}", event.kind(), err);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Pick the starting output once the backend has reported its devices
    pub fn start(&mut self) {
        self.cur_output = output::pick_current(self);
        info!(
            "🎬 Starting with {} outputs, current {:?}",
            self.registry.outputs.len(),
            self.cur_output
        );
        ipc::publish_all(self);
    }

    pub fn quit(&mut self) {
        info!("🛑 Quit requested");
        self.running = false;
        self.backend.display_terminate();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Tear everything down in dependency order: clients and surfaces,
    /// then outputs, then input devices, then the global listeners.
    pub fn cleanup(&mut self) {
        self.cursor.reset();
        for id in self.registry.clients.ids() {
            if let Some(client) = self.registry.remove_client(id) {
                self.backend.scene_destroy_node(client.node);
            }
        }
        self.registry.set_focused(None);
        for (_, record) in self.registry.surfaces.drain() {
            if let client::SurfaceRole::Layer { node: Some(node), .. } = record.role {
                self.backend.scene_destroy_node(node);
            }
        }

        for id in self.registry.outputs.ids() {
            self.status.release(id);
            if let Some(output) = self.registry.outputs.remove(id) {
                self.backend.layout_remove(output.handle);
                debug!("released output {}", output.name);
            }
        }
        self.cur_output = None;

        for id in self.registry.inputs.ids() {
            self.registry.inputs.remove(id);
        }
        self.seat_keyboard = None;
        self.capabilities = SeatCapabilities::empty();

        self.globals.clear();

        let leaked = self.bus.total_listeners();
        if leaked > 0 {
            warn!("{} listeners still attached after cleanup", leaked);
        }
        info!("🧹 Cleanup complete");
    }

    /// Log outputs and their clients
    pub fn dump_state(&self, level: Level) {
        if !log::log_enabled!(level) {
            return;
        }
        for output in self.registry.outputs.iter() {
            log!(level, "output {}", output.name);
            log!(
                level,
                " -> cur_output = {}",
                self.cur_output == Some(output.id)
            );
            log!(level, " -> tag = {}", output.cur_tag);
            for client in self.registry.clients_on(output.id) {
                log!(
                    level,
                    "   -> client {:?} {} tags={} visible={} focused={}",
                    client.id,
                    client.app_id,
                    client.tags,
                    client.visible_on(output.id, output.cur_tag),
                    self.registry.focused() == Some(client.id)
                );
            }
        }
    }

    pub fn print_server_info(&mut self) {
        self.dump_state(Level::Info);
        ipc::publish_all(self);
    }

    /// Run a bound action
    pub fn execute(&mut self, action: CompositorAction) -> CoreResult<()> {
        debug!("executing {:?}", action);
        match action {
            CompositorAction::Quit => self.quit(),
            CompositorAction::Spawn(command) => spawn(&command)?,
            CompositorAction::View(tag) => {
                if let Some(output) = self.cur_output {
                    workspace::set_current_tag(self, output, tag);
                }
            }
            CompositorAction::ViewAll => {
                if let Some(output) = self.cur_output {
                    workspace::view(self, output, TagMask::ALL);
                }
            }
            CompositorAction::ToggleView(tag) => {
                if let Some(output) = self.cur_output {
                    workspace::toggle_view(self, output, tag);
                }
            }
            CompositorAction::Tag(tag) => workspace::tag_focused(self, tag),
            CompositorAction::ToggleTag(tag) => workspace::toggle_tag_focused(self, tag),
            CompositorAction::KillClient => client::kill_focused(self),
            CompositorAction::FocusNext => workspace::focus_cycle(self, true),
            CompositorAction::FocusPrev => workspace::focus_cycle(self, false),
            CompositorAction::FocusOutputNext => workspace::focus_output_next(self),
            CompositorAction::PrintInfo => self.print_server_info(),
        }
        Ok(())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cursor(&self) -> &CursorState {
        &self.cursor
    }

    pub fn capabilities(&self) -> SeatCapabilities {
        self.capabilities
    }

    pub fn current_output(&self) -> Option<OutputId> {
        self.cur_output
    }

    pub fn focused_client(&self) -> Option<ClientId> {
        self.registry.focused()
    }

    pub fn status_mut(&mut self) -> &mut StatusRegistry {
        &mut self.status
    }

    pub fn listener_count(&self, source: EventSource) -> usize {
        self.bus.listener_count(source)
    }

    pub fn total_listeners(&self) -> usize {
        self.bus.total_listeners()
    }

    /// Show a single tag (zero-based) on `output`
    pub fn set_current_tag(&mut self, output: OutputId, tag: u32) -> bool {
        workspace::set_current_tag(self, output, tag)
    }

    /// Show `mask` on `output`; only single tags and all tags are accepted
    pub fn view(&mut self, output: OutputId, mask: TagMask) -> bool {
        workspace::view(self, output, mask)
    }

    pub fn arrange(&mut self, output: OutputId) {
        workspace::arrange(self, output);
    }

    pub fn snapshot(&self, output: OutputId) -> Option<OutputStatus> {
        ipc::snapshot(self, output)
    }
}

fn spawn(command: &str) -> CoreResult<()> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .spawn()
        .map_err(|source| CoreError::Spawn {
            command: command.to_string(),
            source,
        })?;
    info!("spawned `{}` as pid {}", command, child.id());

    // reap it so it does not linger as a zombie
    std::thread::spawn(move || {
        if let Err(err) = child.wait() {
            warn!("waiting for child failed: {}", err);
        }
    });
    Ok(())
}
