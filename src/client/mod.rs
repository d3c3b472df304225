//! Toplevel clients and shell surfaces
//!
//! Shells announce surfaces first; a [`Client`] only exists while its
//! toplevel surface is mapped. Layer surfaces never become clients, they are
//! filed into the per-layer lists of their output.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, SceneNode, SurfaceHandle};
use crate::error::CoreResult;
use crate::events::{Event, EventKind, EventSource, ShellKind};
use crate::input;
use crate::ipc;
use crate::output::{self, LayerShellLayer};
use crate::registry::{ClientId, OutputId, SurfaceRecord};
use crate::server::Server;
use crate::tags::{visible_on, TagMask};
use crate::workspace;

/// Axis-aligned box in layout coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        !self.is_empty()
            && x >= self.x as f64
            && y >= self.y as f64
            && x < self.x as f64 + self.width as f64
            && y < self.y as f64 + self.height as f64
    }

    /// Right edge, saturating for boxes reaching past `i32::MAX`
    pub const fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub const fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }
}

/// What a known surface is
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceRole {
    Toplevel {
        shell: ShellKind,
    },
    Layer {
        output: Option<OutputId>,
        layer: LayerShellLayer,
        namespace: String,
        /// Set while mapped
        node: Option<SceneNode>,
    },
}

/// A mapped toplevel window
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: ClientId,
    pub surface: SurfaceHandle,
    pub shell: ShellKind,
    pub node: SceneNode,
    pub geom: Rectangle,
    pub tags: TagMask,
    pub output: Option<OutputId>,
    pub title: String,
    pub app_id: String,
}

impl Client {
    /// Whether this client shows on an output displaying `output_tags`
    pub fn visible_on(&self, output: OutputId, output_tags: TagMask) -> bool {
        self.output == Some(output) && visible_on(self.tags, output_tags)
    }
}

/// Commit a new box: move the scene node and ask the client to resize
pub(crate) fn set_size_position<B: Backend>(server: &mut Server<B>, id: ClientId, geom: Rectangle) {
    let Some(client) = server.registry.clients.get_mut(id) else {
        return;
    };
    client.geom = geom;
    server.backend.scene_set_position(client.node, geom.x, geom.y);
    server
        .backend
        .toplevel_set_size(client.surface, geom.width, geom.height);
}

/// Give a client keyboard focus, optionally raising it above its siblings
pub(crate) fn focus_client<B: Backend>(
    server: &mut Server<B>,
    id: ClientId,
    surface: SurfaceHandle,
    raise: bool,
) {
    let Some(client) = server.registry.clients.get(id) else {
        return;
    };
    let (node, own_surface, output) = (client.node, client.surface, client.output);

    if raise {
        server.backend.scene_raise_to_top(node);
    }

    let previous = server.registry.focused();
    if previous == Some(id) {
        return;
    }
    if let Some(prev) = previous.and_then(|prev| server.registry.clients.get(prev)) {
        server.backend.toplevel_set_activated(prev.surface, false);
    }
    server.backend.toplevel_set_activated(own_surface, true);
    server.registry.set_focused(Some(id));
    if output.is_some() {
        server.cur_output = output;
    }
    input::focus_surface(server, Some(surface));
    debug!("focused {:?}", id);

    if let Some(output) = output {
        ipc::publish_status(server, output);
    }
}

/// Focus the most recently focused client visible on `output`, or nothing
pub(crate) fn refocus<B: Backend>(server: &mut Server<B>, output: Option<OutputId>) {
    let target = output.and_then(|output| {
        let tags = server.registry.outputs.get(output)?.cur_tag;
        server
            .registry
            .focus_top(|client| client.visible_on(output, tags))
    });
    match target.and_then(|id| server.registry.clients.get(id).map(|c| (id, c.surface))) {
        Some((id, surface)) => focus_client(server, id, surface, false),
        None => {
            if let Some(prev) = server
                .registry
                .focused()
                .and_then(|prev| server.registry.clients.get(prev))
            {
                server.backend.toplevel_set_activated(prev.surface, false);
            }
            server.registry.set_focused(None);
            input::focus_surface(server, None);
            ipc::publish_all(server);
        }
    }
}

/// Ask the focused client to close
pub(crate) fn kill_focused<B: Backend>(server: &mut Server<B>) {
    if let Some(client) = server
        .registry
        .focused()
        .and_then(|id| server.registry.clients.get(id))
    {
        info!("closing {:?} ({})", client.id, client.title);
        server.backend.toplevel_close(client.surface);
    }
}

fn subscribe_surface<B: Backend>(server: &mut Server<B>, surface: SurfaceHandle, role: SurfaceRole) {
    let source = EventSource::Surface(surface);
    let mut listeners = vec![
        server
            .bus
            .subscribe(source, EventKind::SurfaceMap, surface_map_notify::<B>),
        server
            .bus
            .subscribe(source, EventKind::SurfaceUnmap, surface_unmap_notify::<B>),
        server
            .bus
            .subscribe(source, EventKind::SurfaceDestroy, surface_destroy_notify::<B>),
    ];
    if matches!(role, SurfaceRole::Toplevel { .. }) {
        listeners.push(server.bus.subscribe(
            source,
            EventKind::SurfaceSetTitle,
            surface_set_title_notify::<B>,
        ));
    }
    server.registry.surfaces.insert(
        surface,
        SurfaceRecord {
            role,
            _listeners: listeners,
        },
    );
}

pub(crate) fn new_toplevel_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::NewToplevel { surface, shell } = event else {
        return Ok(());
    };
    if server.registry.surfaces.contains_key(surface) {
        warn!("surface {:?} announced twice", surface);
        return Ok(());
    }
    debug!("new {:?} toplevel {:?}", shell, surface);
    subscribe_surface(server, *surface, SurfaceRole::Toplevel { shell: *shell });
    Ok(())
}

pub(crate) fn new_layer_surface_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    let Event::NewLayerSurface {
        surface,
        output,
        layer,
        namespace,
    } = event
    else {
        return Ok(());
    };
    if server.registry.surfaces.contains_key(surface) {
        warn!("surface {:?} announced twice", surface);
        return Ok(());
    }
    // unbound layer surfaces go to the current output
    let output = output
        .and_then(|handle| server.registry.output_by_handle(handle))
        .or(server.cur_output);
    debug!("new layer surface {:?} ({}) on {:?}", surface, namespace, output);
    subscribe_surface(
        server,
        *surface,
        SurfaceRole::Layer {
            output,
            layer: *layer,
            namespace: namespace.clone(),
            node: None,
        },
    );
    Ok(())
}

pub(crate) fn new_decoration_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    let Event::NewDecoration { decoration, surface } = event else {
        return Ok(());
    };
    let mode = server.config.decoration.mode;
    debug!("decoration for {:?}: {:?}", surface, mode);
    server.backend.decoration_set_mode(*decoration, mode);
    Ok(())
}

fn map_toplevel<B: Backend>(
    server: &mut Server<B>,
    surface: SurfaceHandle,
    shell: ShellKind,
    geometry: Rectangle,
    title: &str,
    app_id: &str,
) {
    if server.registry.client_by_surface(surface).is_some() {
        return;
    }
    let output = output::usable_current(server);
    let tags = output
        .and_then(|output| server.registry.outputs.get(output))
        .map_or(TagMask::mask_of(0), |output| output.cur_tag);

    let geom = Rectangle {
        width: geometry.width.max(1),
        height: geometry.height.max(1),
        ..geometry
    };
    let node = server
        .backend
        .scene_create_node(surface, crate::backend::SceneLayer::Tile);

    let id = server.registry.clients.reserve_id();
    server.registry.clients.push_front(
        id,
        Client {
            id,
            surface,
            shell,
            node,
            geom,
            tags,
            output,
            title: title.to_string(),
            app_id: app_id.to_string(),
        },
    );
    info!("mapped {:?} {:?} ({}) on {:?} tags {}", id, shell, app_id, output, tags);

    set_size_position(server, id, geom);
    focus_client(server, id, surface, true);
    match output {
        Some(output) => workspace::arrange(server, output),
        // no output yet: stay hidden until one adopts us
        None => server.backend.scene_set_enabled(node, false),
    }
}

fn unmap_toplevel<B: Backend>(server: &mut Server<B>, surface: SurfaceHandle) {
    let Some(id) = server.registry.client_by_surface(surface) else {
        return;
    };
    if server.cursor.grabbed_client() == Some(id) {
        server.cursor.reset();
    }
    let was_focused = server.registry.focused() == Some(id);
    let Some(client) = server.registry.remove_client(id) else {
        return;
    };
    server.backend.scene_destroy_node(client.node);
    info!("unmapped {:?} ({})", id, client.app_id);

    if was_focused {
        refocus(server, client.output.or(server.cur_output));
    }
    if let Some(output) = client.output {
        workspace::arrange(server, output);
    }
}

fn map_layer<B: Backend>(server: &mut Server<B>, surface: SurfaceHandle) {
    let Some(SurfaceRole::Layer {
        output, layer, node, ..
    }) = server
        .registry
        .surfaces
        .get(&surface)
        .map(|record| record.role.clone())
    else {
        return;
    };
    if node.is_some() {
        return;
    }
    let new_node = server
        .backend
        .scene_create_node(surface, layer.scene_layer());
    if let Some(SurfaceRole::Layer { node, .. }) = server
        .registry
        .surfaces
        .get_mut(&surface)
        .map(|record| &mut record.role)
    {
        *node = Some(new_node);
    }
    if let Some(output) = output.and_then(|id| server.registry.outputs.get_mut(id)) {
        output.layers[layer.index()].push(surface);
        debug!("layer surface {:?} mapped on {} ({:?})", surface, output.name, layer);
    }
}

fn unmap_layer<B: Backend>(server: &mut Server<B>, surface: SurfaceHandle) {
    let Some(record) = server.registry.surfaces.get_mut(&surface) else {
        return;
    };
    let SurfaceRole::Layer {
        output, layer, node, ..
    } = &mut record.role
    else {
        return;
    };
    let (output, layer, node) = (*output, *layer, node.take());
    if let Some(node) = node {
        server.backend.scene_destroy_node(node);
    }
    if let Some(output) = output.and_then(|id| server.registry.outputs.get_mut(id)) {
        output.layers[layer.index()].retain(|other| *other != surface);
    }
}

pub(crate) fn surface_map_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::SurfaceMap {
        surface,
        geometry,
        title,
        app_id,
    } = event
    else {
        return Ok(());
    };
    match server
        .registry
        .surfaces
        .get(surface)
        .map(|record| record.role.clone())
    {
        Some(SurfaceRole::Toplevel { shell }) => {
            map_toplevel(server, *surface, shell, *geometry, title, app_id)
        }
        Some(SurfaceRole::Layer { .. }) => map_layer(server, *surface),
        None => {}
    }
    Ok(())
}

pub(crate) fn surface_unmap_notify<B: Backend>(server: &mut Server<B>, event: &Event) -> CoreResult<()> {
    let Event::SurfaceUnmap { surface } = event else {
        return Ok(());
    };
    unmap_surface(server, *surface);
    Ok(())
}

fn unmap_surface<B: Backend>(server: &mut Server<B>, surface: SurfaceHandle) {
    match server.registry.surfaces.get(&surface).map(|record| &record.role) {
        Some(SurfaceRole::Toplevel { .. }) => unmap_toplevel(server, surface),
        Some(SurfaceRole::Layer { .. }) => unmap_layer(server, surface),
        None => {}
    }
}

pub(crate) fn surface_set_title_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    let Event::SurfaceSetTitle { surface, title } = event else {
        return Ok(());
    };
    let Some(id) = server.registry.client_by_surface(*surface) else {
        return Ok(());
    };
    let output = server.registry.clients.get_mut(id).and_then(|client| {
        client.title = title.clone();
        client.output
    });
    if let (Some(output), true) = (output, server.registry.focused() == Some(id)) {
        ipc::publish_status(server, output);
    }
    Ok(())
}

pub(crate) fn surface_destroy_notify<B: Backend>(
    server: &mut Server<B>,
    event: &Event,
) -> CoreResult<()> {
    let Event::SurfaceDestroy { surface } = event else {
        return Ok(());
    };
    unmap_surface(server, *surface);
    // drops the surface listeners
    server.registry.surfaces.remove(surface);
    debug!("surface {:?} destroyed", surface);
    Ok(())
}

/// Detach and hide every client shown by `output`
pub(crate) fn evacuate_clients<B: Backend>(server: &mut Server<B>, output: OutputId) {
    for id in server.registry.clients.ids() {
        if let Some(client) = server.registry.clients.get_mut(id) {
            if client.output == Some(output) {
                client.output = None;
                server.backend.scene_set_enabled(client.node, false);
            }
        }
    }
}

/// Detach every client and layer surface from a vanishing output
pub(crate) fn evacuate_output<B: Backend>(server: &mut Server<B>, output: OutputId) {
    evacuate_clients(server, output);
    for record in server.registry.surfaces.values_mut() {
        if let SurfaceRole::Layer { output: bound, .. } = &mut record.role {
            if *bound == Some(output) {
                *bound = None;
            }
        }
    }
}

/// Hand clients without an output to `output`, taking its current tags
pub(crate) fn adopt_orphans<B: Backend>(server: &mut Server<B>, output: OutputId) {
    let Some(tags) = server.registry.outputs.get(output).map(|o| o.cur_tag) else {
        return;
    };
    for id in server.registry.clients.ids() {
        if let Some(client) = server.registry.clients.get_mut(id) {
            if client.output.is_none() {
                client.output = Some(output);
                client.tags = tags;
                debug!("{:?} adopted by {:?}", id, output);
            }
        }
    }
}
