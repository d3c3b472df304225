//! Outputs and the output layout
//!
//! An [`Output`] exists for every desktop display the backend reports. Each
//! shows one tag (or all of them), owns the layer-shell surfaces bound to it
//! and carries the usable area computed on the last layout change.

use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, HeadState, Mode, OutputHandle, OutputState, SceneLayer, SurfaceHandle};
use crate::client::{self, Rectangle};
use crate::error::{BackendError, CoreResult, LayoutError, OutputConfigError};
use crate::events::{Event, EventKind, EventSource, Subscription};
use crate::registry::OutputId;
use crate::server::Server;
use crate::tags::TagMask;
use crate::workspace;

/// Layer-shell layers, bottom to top
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerShellLayer {
    Background,
    Bottom,
    Top,
    Overlay,
}

impl LayerShellLayer {
    pub const COUNT: usize = 4;

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn scene_layer(self) -> SceneLayer {
        match self {
            LayerShellLayer::Background => SceneLayer::Background,
            LayerShellLayer::Bottom => SceneLayer::Bottom,
            LayerShellLayer::Top => SceneLayer::Top,
            LayerShellLayer::Overlay => SceneLayer::Overlay,
        }
    }
}

/// A desktop display
#[derive(Debug)]
pub struct Output {
    pub id: OutputId,
    pub handle: OutputHandle,
    pub name: String,
    /// Tags shown; a single tag or `TagMask::ALL`
    pub cur_tag: TagMask,
    /// Mask shown before the last switch
    pub prev_tag: TagMask,
    /// Layout box of the output; empty while the layout could not place it
    pub usable_area: Rectangle,
    /// Mapped layer surfaces, indexed by [`LayerShellLayer::index`]
    pub layers: [Vec<SurfaceHandle>; LayerShellLayer::COUNT],
    _listeners: Vec<Subscription>,
}

impl Output {
    pub fn is_usable(&self) -> bool {
        !self.usable_area.is_empty()
    }

    pub fn layer_surfaces(&self, layer: LayerShellLayer) -> &[SurfaceHandle] {
        &self.layers[layer.index()]
    }
}

/// Requested state for one head of an output-management configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadConfig {
    pub output: OutputHandle,
    pub enabled: bool,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub position: Option<(i32, i32)>,
    #[serde(default)]
    pub scale: Option<f32>,
}

/// A configuration submitted by an output-management client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfiguration {
    pub serial: u32,
    pub heads: Vec<HeadConfig>,
}

pub(crate) fn new_output_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::NewOutput { output: handle } = event else {
        return Ok(());
    };
    let handle = *handle;
    if server.registry.output_by_handle(handle).is_some() {
        warn!("output {:?} reported twice", handle);
        return Ok(());
    }
    let info = server
        .backend
        .output_info(handle)
        .ok_or(BackendError::UnknownHandle(handle.0))?;

    if info.non_desktop {
        debug!("not configuring non-desktop output {}", info.name);
        return Ok(());
    }

    server.backend.init_output_render(handle)?;
    server
        .backend
        .commit_output_state(handle, &OutputState::enable(info.preferred_mode))?;

    let source = EventSource::Output(handle);
    let listeners = vec![
        server
            .bus
            .subscribe(source, EventKind::OutputFrame, output_frame_notify::<B>),
        server.bus.subscribe(
            source,
            EventKind::OutputRequestState,
            output_request_state_notify::<B>,
        ),
        server
            .bus
            .subscribe(source, EventKind::OutputDestroy, output_destroy_notify::<B>),
    ];

    server.backend.scene_restack_layers();

    let area = server.backend.layout_add_auto(handle);
    let id = server.registry.outputs.reserve_id();
    server.registry.outputs.push_back(
        id,
        Output {
            id,
            handle,
            name: info.name.clone(),
            cur_tag: TagMask::mask_of(0),
            prev_tag: TagMask::mask_of(0),
            usable_area: area,
            layers: Default::default(),
            _listeners: listeners,
        },
    );
    info!(
        " -> Output {} : {}x{}+{}+{}",
        info.name, area.width, area.height, area.x, area.y
    );

    if server.cur_output.is_none() && !area.is_empty() {
        server.cur_output = Some(id);
    }
    server.status.bind_default(id);
    if !area.is_empty() {
        client::adopt_orphans(server, id);
    }
    workspace::arrange(server, id);

    update_layout(server)?;
    Ok(())
}

pub(crate) fn output_destroy_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::OutputDestroy { output: handle } = event else {
        return Ok(());
    };
    let Some(id) = server.registry.output_by_handle(*handle) else {
        return Ok(());
    };

    let released = server.status.release(id);
    trace!("released {} status subscribers of {:?}", released, id);

    client::evacuate_output(server, id);
    if let Some(output) = server.registry.outputs.remove(id) {
        info!("output {} removed", output.name);
    }
    server.backend.layout_remove(*handle);

    if server.cur_output == Some(id) {
        server.cur_output = pick_current(server);
    }
    if let Some(target) = server.cur_output {
        client::adopt_orphans(server, target);
        workspace::arrange(server, target);
    }

    update_layout(server)?;
    Ok(())
}

pub(crate) fn output_frame_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::OutputFrame { output } = event else {
        return Ok(());
    };
    server.backend.render_output(*output)?;
    let now = server.epoch.elapsed();
    server.backend.send_frame_done(*output, now);
    Ok(())
}

pub(crate) fn output_request_state_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    let Event::OutputRequestState { output, state } = event else {
        return Ok(());
    };
    debug!("backend requested state for {:?}: {:?}", output, state);
    server.backend.commit_output_state(*output, state)?;
    Ok(())
}

pub(crate) fn layout_change_notify<B: Backend>(server: &mut Server<B>, _event: &Event) -> CoreResult<()> {
    update_layout(server)?;
    Ok(())
}

/// Refresh every enabled output's usable area from the layout and publish
/// the resulting configuration. Outputs the layout cannot place are left
/// unusable and reported together once the rest is done.
pub(crate) fn update_layout<B: Backend>(server: &mut Server<B>) -> Result<(), LayoutError> {
    let mut heads = Vec::new();
    let mut failed = Vec::new();
    let mut failed_names = Vec::new();

    for id in server.registry.outputs.ids() {
        let Some(handle) = server.registry.outputs.get(id).map(|output| output.handle) else {
            continue;
        };
        let Some(info) = server.backend.output_info(handle) else {
            continue;
        };
        if !info.enabled {
            if let Some(output) = server.registry.outputs.get_mut(id) {
                output.usable_area = Rectangle::default();
            }
            continue;
        }

        let area = server.backend.layout_box(handle);
        if let Some(output) = server.registry.outputs.get_mut(id) {
            output.usable_area = area;
        }
        if area.is_empty() {
            error!("failed to get output layout box for {}", info.name);
            failed.push(id);
            failed_names.push(info.name);
            continue;
        }
        info!(
            " box x={} / y={} / w={} / h={}",
            area.x, area.y, area.width, area.height
        );

        heads.push(HeadState {
            output: handle,
            name: info.name,
            enabled: true,
            x: area.x,
            y: area.y,
            mode: info.current_mode,
        });
    }

    server.backend.output_manager_set_configuration(&heads);
    rehome_clients(server);

    if failed.is_empty() {
        Ok(())
    } else {
        Err(LayoutError::EmptyBox {
            outputs: failed,
            names: failed_names,
        })
    }
}

fn is_usable<B: Backend>(server: &Server<B>, id: OutputId) -> bool {
    server.registry.outputs.get(id).is_some_and(Output::is_usable)
}

/// The usable output under the cursor, else the first usable one
pub(crate) fn pick_current<B: Backend>(server: &Server<B>) -> Option<OutputId> {
    let (x, y) = server.backend.cursor_position();
    server
        .registry
        .output_at(&server.backend, x, y)
        .filter(|id| is_usable(server, *id))
        .or_else(|| {
            server
                .registry
                .outputs
                .ids()
                .into_iter()
                .find(|id| is_usable(server, *id))
        })
}

/// The current output if it can show clients, else the best replacement
pub(crate) fn usable_current<B: Backend>(server: &Server<B>) -> Option<OutputId> {
    server
        .cur_output
        .filter(|id| is_usable(server, *id))
        .or_else(|| pick_current(server))
}

/// Move clients off outputs that have no layout box or are disabled, and
/// keep the current output on one that can show them.
fn rehome_clients<B: Backend>(server: &mut Server<B>) {
    let unusable: Vec<OutputId> = server
        .registry
        .outputs
        .iter()
        .filter(|output| !output.is_usable())
        .map(|output| output.id)
        .collect();
    for id in unusable {
        client::evacuate_clients(server, id);
    }

    server.cur_output = usable_current(server);
    let has_orphans = server.registry.clients.iter().any(|client| client.output.is_none());
    match server.cur_output {
        Some(target) if has_orphans => {
            client::adopt_orphans(server, target);
            workspace::arrange(server, target);
        }
        Some(_) => {}
        None => {
            // nothing can show the focused client any more
            let focus_hidden = server
                .registry
                .focused()
                .and_then(|id| server.registry.clients.get(id))
                .is_some_and(|client| client.output.is_none());
            if focus_hidden {
                client::refocus(server, None);
            }
        }
    }
}

/// Check a configuration against the live outputs without touching them.
/// Returns the state each head would be committed with.
pub(crate) fn validate_configuration<B: Backend>(
    server: &Server<B>,
    config: &OutputConfiguration,
) -> Result<Vec<(OutputHandle, OutputState)>, OutputConfigError> {
    config
        .heads
        .iter()
        .map(|head| {
            server
                .registry
                .output_by_handle(head.output)
                .ok_or(OutputConfigError::UnknownOutput(head.output))?;
            let info = server
                .backend
                .output_info(head.output)
                .ok_or(BackendError::UnknownHandle(head.output.0))?;

            let mode = if head.enabled {
                let mode = head
                    .mode
                    .or(info.current_mode)
                    .or(info.preferred_mode)
                    .filter(|mode| !mode.is_empty())
                    .ok_or_else(|| OutputConfigError::NoMode(info.name.clone()))?;
                Some(mode)
            } else {
                None
            };

            if let Some(scale) = head.scale {
                if !(scale > 0.0) || !scale.is_finite() {
                    return Err(OutputConfigError::InvalidScale {
                        output: info.name,
                        scale,
                    });
                }
            }

            let state = OutputState {
                enabled: Some(head.enabled),
                mode,
                position: head.position,
                scale: head.scale,
            };
            server.backend.test_output_state(head.output, &state)?;
            Ok((head.output, state))
        })
        .collect()
}

fn current_state<B: Backend>(server: &Server<B>, handle: OutputHandle) -> Option<OutputState> {
    server.backend.output_info(handle).map(|info| OutputState {
        enabled: Some(info.enabled),
        mode: info.current_mode,
        position: Some(info.position),
        scale: Some(info.scale),
    })
}

fn commit_head<B: Backend>(
    server: &mut Server<B>,
    handle: OutputHandle,
    state: &OutputState,
) -> Result<(), BackendError> {
    let was_enabled = server.backend.output_info(handle).map_or(false, |info| info.enabled);
    server.backend.commit_output_state(handle, state)?;
    match (state.enabled, state.position) {
        (Some(false), _) => server.backend.layout_remove(handle),
        (_, Some((x, y))) => server.backend.layout_move(handle, x, y),
        // re-enabled without a position: back at the right end of the layout
        (Some(true), None) if !was_enabled => {
            server.backend.layout_add_auto(handle);
        }
        _ => {}
    }
    Ok(())
}

fn roll_back<B: Backend>(server: &mut Server<B>, committed: &[(OutputHandle, OutputState)]) {
    for (done, previous) in committed.iter().rev() {
        if let Err(err) = commit_head(server, *done, previous) {
            error!("rollback of {:?} failed: {}", done, err);
        }
    }
}

/// Validate and commit every head, or none of them. Every head left
/// enabled must end up with a non-empty layout box.
pub(crate) fn apply_configuration<B: Backend>(
    server: &mut Server<B>,
    config: &OutputConfiguration,
) -> Result<(), OutputConfigError> {
    let planned = validate_configuration(server, config)?;

    let mut committed: Vec<(OutputHandle, OutputState)> = Vec::new();
    for (handle, state) in &planned {
        let previous = current_state(server, *handle);
        if let Err(err) = commit_head(server, *handle, state) {
            warn!("commit of {:?} failed ({}), rolling back {} heads", handle, err, committed.len());
            roll_back(server, &committed);
            return Err(err.into());
        }
        if let Some(previous) = previous {
            committed.push((*handle, previous));
        }
    }

    let unplaced = planned
        .iter()
        .filter(|(_, state)| state.enabled == Some(true))
        .find(|(handle, _)| server.backend.layout_box(*handle).is_empty())
        .map(|(handle, _)| *handle);
    if let Some(handle) = unplaced {
        let name = server
            .backend
            .output_info(handle)
            .map_or_else(|| format!("{:?}", handle), |info| info.name);
        warn!("{} has no layout box after commit, rolling back", name);
        roll_back(server, &committed);
        return Err(OutputConfigError::Unplaced(name));
    }
    Ok(())
}

pub(crate) fn output_manager_test_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    let Event::OutputManagerTest { config } = event else {
        return Ok(());
    };
    let result = validate_configuration(server, config);
    server
        .backend
        .output_manager_send_result(config.serial, result.is_ok());
    if let Err(err) = &result {
        debug!("output configuration {} would fail: {}", config.serial, err);
    }
    Ok(())
}

pub(crate) fn output_manager_apply_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    let Event::OutputManagerApply { config } = event else {
        return Ok(());
    };
    match apply_configuration(server, config) {
        Ok(()) => {
            info!("applied output configuration {}", config.serial);
            server.backend.output_manager_send_result(config.serial, true);
            update_layout(server)?;
            Ok(())
        }
        Err(err) => {
            server
                .backend
                .output_manager_send_result(config.serial, false);
            Err(err.into())
        }
    }
}
