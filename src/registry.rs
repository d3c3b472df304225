//! Entity registry
//!
//! Outputs, clients and inputs live in [`Collection`]s keyed by ids that are
//! never reused, so a stale id simply finds nothing. Each collection keeps
//! its own display order next to the storage; removing an entity unlinks it
//! from the order, from the focus stack and from the focused slot in one call.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::backend::{DeviceHandle, OutputHandle, OutputLayout, SceneGraph, SceneHit, SceneNode, SurfaceHandle};
use crate::client::{Client, SurfaceRole};
use crate::events::Subscription;
use crate::input::Input;
use crate::output::Output;

/// Stable identifier of a registry entity
pub trait EntityId: Copy + Eq + Hash + Debug + From<u64> {}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                $name(raw)
            }
        }

        impl $name {
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl EntityId for $name {}
    };
}

entity_id!(OutputId);
entity_id!(ClientId);
entity_id!(InputId);

/// Ordered storage for one kind of entity
#[derive(Debug)]
pub struct Collection<I, T> {
    next_id: u64,
    items: HashMap<I, T>,
    order: Vec<I>,
}

impl<I: EntityId, T> Default for Collection<I, T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            items: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<I: EntityId, T> Collection<I, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh id; it is never handed out again
    pub fn reserve_id(&mut self) -> I {
        let id = I::from(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn push_back(&mut self, id: I, item: T) {
        if self.items.insert(id, item).is_none() {
            self.order.push(id);
        }
    }

    pub fn push_front(&mut self, id: I, item: T) {
        if self.items.insert(id, item).is_none() {
            self.order.insert(0, id);
        }
    }

    /// Unlink and return the entity; `None` if it was already gone
    pub fn remove(&mut self, id: I) -> Option<T> {
        let item = self.items.remove(&id)?;
        self.order.retain(|other| *other != id);
        Some(item)
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    pub fn contains(&self, id: I) -> bool {
        self.items.contains_key(&id)
    }

    /// Entities in display order
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    /// Snapshot of the ids in display order, safe to hold across mutation
    pub fn ids(&self) -> Vec<I> {
        self.order.clone()
    }

    pub fn first_id(&self) -> Option<I> {
        self.order.first().copied()
    }

    /// Id following `id` in display order, wrapping around
    pub fn next_after(&self, id: I) -> Option<I> {
        let pos = self.order.iter().position(|other| *other == id)?;
        self.order.get((pos + 1) % self.order.len()).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A surface the shells told us about, mapped or not
#[derive(Debug)]
pub struct SurfaceRecord {
    pub role: SurfaceRole,
    pub(crate) _listeners: Vec<Subscription>,
}

/// What a layout position resolves to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Found {
    Client(ClientId, SceneHit),
    /// A surface that is not a managed client (layer surfaces)
    Surface(SceneHit),
    Output(OutputId),
}

#[derive(Debug, Default)]
pub struct Registry {
    pub outputs: Collection<OutputId, Output>,
    pub clients: Collection<ClientId, Client>,
    pub inputs: Collection<InputId, Input>,
    pub(crate) surfaces: HashMap<SurfaceHandle, SurfaceRecord>,
    /// Most recently focused first
    focus_stack: Vec<ClientId>,
    focused: Option<ClientId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_by_device(&self, device: DeviceHandle) -> Option<&Input> {
        self.inputs.iter().find(|input| input.device == device)
    }

    pub fn find_by_device_mut(&mut self, device: DeviceHandle) -> Option<&mut Input> {
        let id = self.find_by_device(device)?.id;
        self.inputs.get_mut(id)
    }

    pub fn output_by_handle(&self, handle: OutputHandle) -> Option<OutputId> {
        self.outputs
            .iter()
            .find(|output| output.handle == handle)
            .map(|output| output.id)
    }

    pub fn client_by_surface(&self, surface: SurfaceHandle) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|client| client.surface == surface)
            .map(|client| client.id)
    }

    pub fn client_by_node(&self, node: SceneNode) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|client| client.node == node)
            .map(|client| client.id)
    }

    /// Output whose layout box contains the point
    pub fn output_at(&self, layout: &impl OutputLayout, x: f64, y: f64) -> Option<OutputId> {
        layout
            .layout_output_at(x, y)
            .and_then(|handle| self.output_by_handle(handle))
    }

    /// Managed client under the point, with the surface that was hit
    pub fn client_at(&self, scene: &impl SceneGraph, x: f64, y: f64) -> Option<(ClientId, SceneHit)> {
        let hit = scene.scene_surface_at(x, y)?;
        let client = self
            .client_by_node(hit.node)
            .or_else(|| self.client_by_surface(hit.surface))?;
        Some((client, hit))
    }

    /// Topmost thing at a layout position: a client, another surface, or the bare output
    pub fn find_at<B: OutputLayout + SceneGraph>(&self, backend: &B, x: f64, y: f64) -> Option<Found> {
        if let Some(hit) = backend.scene_surface_at(x, y) {
            let client = self
                .client_by_node(hit.node)
                .or_else(|| self.client_by_surface(hit.surface));
            return Some(match client {
                Some(client) => Found::Client(client, hit),
                None => Found::Surface(hit),
            });
        }
        self.output_at(backend, x, y).map(Found::Output)
    }

    /// Clients owned by `output`, in display order
    pub fn clients_on(&self, output: OutputId) -> impl Iterator<Item = &Client> + '_ {
        self.clients
            .iter()
            .filter(move |client| client.output == Some(output))
    }

    /// Unlink a client from every list it is part of
    pub fn remove_client(&mut self, id: ClientId) -> Option<Client> {
        self.focus_stack.retain(|other| *other != id);
        if self.focused == Some(id) {
            self.focused = None;
        }
        self.clients.remove(id)
    }

    pub fn focused(&self) -> Option<ClientId> {
        self.focused
    }

    /// Mark `id` focused and move it to the top of the focus stack
    pub fn set_focused(&mut self, id: Option<ClientId>) {
        if let Some(id) = id {
            self.focus_stack.retain(|other| *other != id);
            self.focus_stack.insert(0, id);
        }
        self.focused = id;
    }

    pub fn focus_stack(&self) -> &[ClientId] {
        &self.focus_stack
    }

    /// Most recently focused client matching `pred`
    pub fn focus_top(&self, pred: impl Fn(&Client) -> bool) -> Option<ClientId> {
        self.focus_stack
            .iter()
            .filter_map(|id| self.clients.get(*id))
            .find(|client| pred(client))
            .map(|client| client.id)
    }
}
