//! Tag-based visibility
//!
//! Each output shows one tag, or every tag at once. Arranging an output
//! enables the scene node of each of its clients whose tags intersect the
//! output's, and disables the rest. Nothing is laid out here: clients keep
//! the geometry they were given or dragged to.

use log::{debug, warn};

use crate::backend::Backend;
use crate::client;
use crate::ipc;
use crate::registry::{ClientId, OutputId, Registry};
use crate::server::Server;
use crate::tags::{visible_on, TagMask, MAX_TAGS};

/// Visibility each client owned by `output` should have, in display order
pub fn visibility(registry: &Registry, output: OutputId) -> Vec<(ClientId, bool)> {
    let Some(tags) = registry.outputs.get(output).map(|o| o.cur_tag) else {
        return Vec::new();
    };
    registry
        .clients_on(output)
        .map(|client| (client.id, visible_on(client.tags, tags)))
        .collect()
}

/// Push the visibility of every client on `output` to the scene
pub(crate) fn arrange<B: Backend>(server: &mut Server<B>, output: OutputId) {
    for (id, visible) in visibility(&server.registry, output) {
        if let Some(client) = server.registry.clients.get(id) {
            debug!(">>> {:?} visible={}", id, visible);
            server.backend.scene_set_enabled(client.node, visible);
        }
    }
    server.dump_state(log::Level::Debug);
    ipc::publish_all(server);
}

/// Show `mask` on `output`. Only single tags and `TagMask::ALL` are accepted.
pub(crate) fn view<B: Backend>(server: &mut Server<B>, output: OutputId, mask: TagMask) -> bool {
    if !mask.is_output_mask() {
        warn!("refusing to show tag mask {} on {:?}", mask, output);
        return false;
    }
    let Some(out) = server.registry.outputs.get_mut(output) else {
        return false;
    };
    if out.cur_tag != mask {
        out.prev_tag = out.cur_tag;
        out.cur_tag = mask;
    }
    debug!("{} now shows {}", out.name, mask);

    arrange(server, output);
    if server.cur_output == Some(output) {
        refocus_if_hidden(server, output);
    }
    true
}

/// Show a single tag on `output`
pub(crate) fn set_current_tag<B: Backend>(server: &mut Server<B>, output: OutputId, tag: u32) -> bool {
    if tag >= MAX_TAGS {
        warn!("tag index {} out of range", tag);
        return false;
    }
    view(server, output, TagMask::mask_of(tag))
}

/// Show `tag`, or go back to the previous view if it is already shown
pub(crate) fn toggle_view<B: Backend>(server: &mut Server<B>, output: OutputId, tag: u32) -> bool {
    let Some(out) = server.registry.outputs.get(output) else {
        return false;
    };
    if out.cur_tag.single_tag() == Some(tag) {
        let previous = out.prev_tag;
        view(server, output, previous)
    } else {
        set_current_tag(server, output, tag)
    }
}

/// Move the focused client to a single tag
pub(crate) fn tag_focused<B: Backend>(server: &mut Server<B>, tag: u32) {
    retag_focused(server, |_| TagMask::mask_of(tag));
}

/// Add or remove a tag from the focused client; the last tag is never removed
pub(crate) fn toggle_tag_focused<B: Backend>(server: &mut Server<B>, tag: u32) {
    retag_focused(server, |tags| tags ^ TagMask::mask_of(tag));
}

fn retag_focused<B: Backend>(server: &mut Server<B>, retag: impl FnOnce(TagMask) -> TagMask) {
    let Some(id) = server.registry.focused() else {
        return;
    };
    let Some(client) = server.registry.clients.get_mut(id) else {
        return;
    };
    let tags = retag(client.tags);
    if tags.is_empty() {
        return;
    }
    client.tags = tags;
    let output = client.output;
    debug!("{:?} tags -> {}", id, tags);

    if let Some(output) = output {
        arrange(server, output);
        refocus_if_hidden(server, output);
    }
}

fn refocus_if_hidden<B: Backend>(server: &mut Server<B>, output: OutputId) {
    let Some(tags) = server.registry.outputs.get(output).map(|o| o.cur_tag) else {
        return;
    };
    let focused_visible = server
        .registry
        .focused()
        .and_then(|id| server.registry.clients.get(id))
        .is_some_and(|client| client.visible_on(output, tags));
    if !focused_visible {
        client::refocus(server, Some(output));
    }
}

/// Focus the next (or previous) visible client on the current output
pub(crate) fn focus_cycle<B: Backend>(server: &mut Server<B>, forward: bool) {
    let Some(output) = server.cur_output else {
        return;
    };
    let visible: Vec<ClientId> = visibility(&server.registry, output)
        .into_iter()
        .filter_map(|(id, visible)| visible.then_some(id))
        .collect();
    if visible.is_empty() {
        return;
    }

    let current = server
        .registry
        .focused()
        .and_then(|id| visible.iter().position(|other| *other == id));
    let next = match (current, forward) {
        (Some(pos), true) => (pos + 1) % visible.len(),
        (Some(pos), false) => (pos + visible.len() - 1) % visible.len(),
        (None, _) => 0,
    };
    let id = visible[next];
    if let Some(surface) = server.registry.clients.get(id).map(|client| client.surface) {
        client::focus_client(server, id, surface, true);
    }
}

/// Make the next output current and focus its top client
pub(crate) fn focus_output_next<B: Backend>(server: &mut Server<B>) {
    let usable = |id: OutputId| {
        server
            .registry
            .outputs
            .get(id)
            .is_some_and(|output| output.is_usable())
    };
    let mut candidate = match server.cur_output {
        Some(current) => server.registry.outputs.next_after(current),
        None => server.registry.outputs.first_id(),
    };
    // skip outputs that cannot show anything, at most one full turn
    for _ in 0..server.registry.outputs.len() {
        match candidate {
            Some(id) if !usable(id) => candidate = server.registry.outputs.next_after(id),
            _ => break,
        }
    }
    let Some(next) = candidate.filter(|id| usable(*id)) else {
        return;
    };
    if server.cur_output == Some(next) {
        return;
    }
    server.cur_output = Some(next);
    client::refocus(server, Some(next));
    ipc::publish_all(server);
}
