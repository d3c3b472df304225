//! Event delivery
//!
//! The backend and protocol layers raise [`Event`]s; each event names the
//! object that raised it (its [`EventSource`]). Handlers subscribe to a
//! `(source, kind)` pair on the [`EventBus`] and receive the event
//! synchronously, one at a time, in the order events are raised.
//!
//! A subscription is an owned [`Subscription`] value. Dropping it detaches the
//! handler, so an entity that stores its subscriptions cannot outlive them:
//! freeing the entity is what unsubscribes it.

use log::{trace, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::backend::{
    AxisEvent, ButtonState, DataSource, DecorationHandle, DeviceHandle, OutputHandle,
    OutputState, SeatClient, SurfaceHandle,
};
use crate::client::Rectangle;
use crate::error::CoreResult;
use crate::input::keyboard::{KeyState, KeyboardModifiers};
use crate::input::DeviceKind;
use crate::output::{LayerShellLayer, OutputConfiguration};

/// Which kind of shell a toplevel surface belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellKind {
    Xdg,
    X11,
}

/// Everything the external layer can tell the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // backend
    NewOutput {
        output: OutputHandle,
    },
    NewInput {
        device: DeviceHandle,
        kind: DeviceKind,
        #[serde(default)]
        name: String,
    },

    // per output
    OutputFrame {
        output: OutputHandle,
    },
    OutputRequestState {
        output: OutputHandle,
        state: OutputState,
    },
    OutputDestroy {
        output: OutputHandle,
    },

    // per input device
    KeyboardKey {
        device: DeviceHandle,
        time_msec: u32,
        keycode: u32,
        state: KeyState,
    },
    KeyboardModifiers {
        device: DeviceHandle,
        modifiers: KeyboardModifiers,
    },
    InputDestroy {
        device: DeviceHandle,
    },

    // cursor
    PointerMotion {
        device: DeviceHandle,
        time_msec: u32,
        dx: f64,
        dy: f64,
    },
    PointerMotionAbsolute {
        device: DeviceHandle,
        time_msec: u32,
        x: f64,
        y: f64,
    },
    PointerButton {
        device: DeviceHandle,
        time_msec: u32,
        button: u32,
        state: ButtonState,
    },
    PointerAxis {
        device: DeviceHandle,
        axis: AxisEvent,
    },
    PointerFrame,

    // seat requests
    RequestSetCursor {
        seat_client: SeatClient,
        surface: Option<SurfaceHandle>,
        #[serde(default)]
        hotspot: (i32, i32),
    },
    RequestSetSelection {
        source: Option<DataSource>,
        serial: u32,
    },

    // output layout and management
    LayoutChange,
    OutputManagerApply {
        config: OutputConfiguration,
    },
    OutputManagerTest {
        config: OutputConfiguration,
    },

    // shells
    NewToplevel {
        surface: SurfaceHandle,
        shell: ShellKind,
    },
    NewLayerSurface {
        surface: SurfaceHandle,
        output: Option<OutputHandle>,
        layer: LayerShellLayer,
        #[serde(default)]
        namespace: String,
    },
    NewDecoration {
        decoration: DecorationHandle,
        surface: SurfaceHandle,
    },

    // per surface
    SurfaceMap {
        surface: SurfaceHandle,
        geometry: Rectangle,
        #[serde(default)]
        title: String,
        #[serde(default)]
        app_id: String,
    },
    SurfaceUnmap {
        surface: SurfaceHandle,
    },
    SurfaceSetTitle {
        surface: SurfaceHandle,
        title: String,
    },
    SurfaceDestroy {
        surface: SurfaceHandle,
    },
}

/// Object that raised an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    Backend,
    Output(OutputHandle),
    Device(DeviceHandle),
    Cursor,
    Seat,
    OutputLayout,
    OutputManager,
    XdgShell,
    Xwayland,
    LayerShell,
    DecorationManager,
    Surface(SurfaceHandle),
}

/// Discriminant of [`Event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewOutput,
    NewInput,
    OutputFrame,
    OutputRequestState,
    OutputDestroy,
    KeyboardKey,
    KeyboardModifiers,
    InputDestroy,
    PointerMotion,
    PointerMotionAbsolute,
    PointerButton,
    PointerAxis,
    PointerFrame,
    RequestSetCursor,
    RequestSetSelection,
    LayoutChange,
    OutputManagerApply,
    OutputManagerTest,
    NewToplevel,
    NewLayerSurface,
    NewDecoration,
    SurfaceMap,
    SurfaceUnmap,
    SurfaceSetTitle,
    SurfaceDestroy,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NewOutput { .. } => EventKind::NewOutput,
            Event::NewInput { .. } => EventKind::NewInput,
            Event::OutputFrame { .. } => EventKind::OutputFrame,
            Event::OutputRequestState { .. } => EventKind::OutputRequestState,
            Event::OutputDestroy { .. } => EventKind::OutputDestroy,
            Event::KeyboardKey { .. } => EventKind::KeyboardKey,
            Event::KeyboardModifiers { .. } => EventKind::KeyboardModifiers,
            Event::InputDestroy { .. } => EventKind::InputDestroy,
            Event::PointerMotion { .. } => EventKind::PointerMotion,
            Event::PointerMotionAbsolute { .. } => EventKind::PointerMotionAbsolute,
            Event::PointerButton { .. } => EventKind::PointerButton,
            Event::PointerAxis { .. } => EventKind::PointerAxis,
            Event::PointerFrame => EventKind::PointerFrame,
            Event::RequestSetCursor { .. } => EventKind::RequestSetCursor,
            Event::RequestSetSelection { .. } => EventKind::RequestSetSelection,
            Event::LayoutChange => EventKind::LayoutChange,
            Event::OutputManagerApply { .. } => EventKind::OutputManagerApply,
            Event::OutputManagerTest { .. } => EventKind::OutputManagerTest,
            Event::NewToplevel { .. } => EventKind::NewToplevel,
            Event::NewLayerSurface { .. } => EventKind::NewLayerSurface,
            Event::NewDecoration { .. } => EventKind::NewDecoration,
            Event::SurfaceMap { .. } => EventKind::SurfaceMap,
            Event::SurfaceUnmap { .. } => EventKind::SurfaceUnmap,
            Event::SurfaceSetTitle { .. } => EventKind::SurfaceSetTitle,
            Event::SurfaceDestroy { .. } => EventKind::SurfaceDestroy,
        }
    }

    pub fn source(&self) -> EventSource {
        match self {
            Event::NewOutput { .. } | Event::NewInput { .. } => EventSource::Backend,
            Event::OutputFrame { output }
            | Event::OutputRequestState { output, .. }
            | Event::OutputDestroy { output } => EventSource::Output(*output),
            Event::KeyboardKey { device, .. }
            | Event::KeyboardModifiers { device, .. }
            | Event::InputDestroy { device } => EventSource::Device(*device),
            Event::PointerMotion { .. }
            | Event::PointerMotionAbsolute { .. }
            | Event::PointerButton { .. }
            | Event::PointerAxis { .. }
            | Event::PointerFrame => EventSource::Cursor,
            Event::RequestSetCursor { .. } | Event::RequestSetSelection { .. } => {
                EventSource::Seat
            }
            Event::LayoutChange => EventSource::OutputLayout,
            Event::OutputManagerApply { .. } | Event::OutputManagerTest { .. } => {
                EventSource::OutputManager
            }
            Event::NewToplevel { shell, .. } => match shell {
                ShellKind::Xdg => EventSource::XdgShell,
                ShellKind::X11 => EventSource::Xwayland,
            },
            Event::NewLayerSurface { .. } => EventSource::LayerShell,
            Event::NewDecoration { .. } => EventSource::DecorationManager,
            Event::SurfaceMap { surface, .. }
            | Event::SurfaceUnmap { surface }
            | Event::SurfaceSetTitle { surface, .. }
            | Event::SurfaceDestroy { surface } => EventSource::Surface(*surface),
        }
    }
}

/// Callback invoked with the compositor context and the raised event
pub type Handler<S> = fn(&mut S, &Event) -> CoreResult<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Listener<S> {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler<S>,
}

struct BusInner<S> {
    next_id: u64,
    listeners: HashMap<EventSource, Vec<Listener<S>>>,
    sources: HashMap<SubscriptionId, EventSource>,
}

impl<S> BusInner<S> {
    fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(source) = self.sources.remove(&id) else {
            return false;
        };
        if let Some(list) = self.listeners.get_mut(&source) {
            list.retain(|listener| listener.id != id);
            if list.is_empty() {
                self.listeners.remove(&source);
            }
        }
        true
    }
}

trait Detach {
    fn detach(&self, id: SubscriptionId);
}

impl<S> Detach for RefCell<BusInner<S>> {
    fn detach(&self, id: SubscriptionId) {
        match self.try_borrow_mut() {
            Ok(mut inner) => {
                inner.remove(id);
            }
            Err(_) => warn!("event bus busy, listener {:?} not detached", id),
        }
    }
}

/// Handle to an attached listener; detaches on drop
pub struct Subscription {
    id: SubscriptionId,
    bus: Weak<dyn Detach>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Subscription").field(&self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.detach(self.id);
        }
    }
}

/// Listener registry keyed by event source
pub struct EventBus<S> {
    inner: Rc<RefCell<BusInner<S>>>,
}

impl<S: 'static> Default for EventBus<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> EventBus<S> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(BusInner {
                next_id: 1,
                listeners: HashMap::new(),
                sources: HashMap::new(),
            })),
        }
    }

    /// Attach `handler` to events of `kind` raised by `source`
    pub fn subscribe(&self, source: EventSource, kind: EventKind, handler: Handler<S>) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner
            .listeners
            .entry(source)
            .or_default()
            .push(Listener { id, kind, handler });
        inner.sources.insert(id, source);
        trace!("subscribed {:?} to {:?}/{:?}", id, source, kind);

        let bus: Rc<dyn Detach> = self.inner.clone();
        Subscription {
            id,
            bus: Rc::downgrade(&bus),
        }
    }

    /// Detach a listener explicitly; returns false if it was already gone
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let removed = self.inner.borrow_mut().remove(subscription.id);
        drop(subscription);
        removed
    }

    /// Handlers to run for `event`, in subscription order
    pub fn handlers_for(&self, event: &Event) -> Vec<Handler<S>> {
        let kind = event.kind();
        self.inner
            .borrow()
            .listeners
            .get(&event.source())
            .map(|list| {
                list.iter()
                    .filter(|listener| listener.kind == kind)
                    .map(|listener| listener.handler)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of live listeners attached to `source`
    pub fn listener_count(&self, source: EventSource) -> usize {
        self.inner
            .borrow()
            .listeners
            .get(&source)
            .map_or(0, Vec::len)
    }

    /// Number of live listeners overall
    pub fn total_listeners(&self) -> usize {
        self.inner.borrow().sources.len()
    }
}
