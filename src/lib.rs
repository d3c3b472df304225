//! # Strata compositor core
//!
//! The event-driven control core of a tag-based tiling Wayland compositor.
//! Protocol handling, rendering and device access live behind the
//! [`backend::Backend`] traits; this crate decides what happens when the
//! backend reports something.
//!
//! ## Architecture
//!
//! - `events`: listener registration and dispatch, keyed by event source
//! - `registry`: outputs, clients and input devices with stable ids
//! - `output`: output lifecycle, layout refresh and output management
//! - `workspace`: tag visibility and focus cycling
//! - `client`: toplevel and layer surfaces
//! - `input`: devices, keyboard bindings and the cursor state machine
//! - `ipc`: status snapshots for bars
//! - `config`: TOML configuration
//! - `event_loop`: calloop driver
//!
//! ## Usage
//!
//! ```rust,no_run
//! use strata::backend::headless::HeadlessBackend;
//! use strata::backend::Mode;
//! use strata::events::Event;
//! use strata::{Server, StrataConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut backend = HeadlessBackend::new();
//!     let output = backend.add_output("HEADLESS-1", Mode::new(1920, 1080, 60_000));
//!     let mut server = Server::new(StrataConfig::default(), backend)?;
//!     server.dispatch(Event::NewOutput { output })?;
//!     server.start();
//!     server.cleanup();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod events;
pub mod input;
pub mod ipc;
pub mod output;
pub mod registry;
pub mod server;
pub mod tags;
pub mod workspace;

// Re-export main types for easy access
pub use config::StrataConfig;
pub use error::{BackendError, CoreError, CoreResult, LayoutError, OutputConfigError};
pub use event_loop::CompositorLoop;
pub use events::{Event, EventKind, EventSource};
pub use registry::{ClientId, InputId, OutputId};
pub use server::Server;
pub use tags::TagMask;

/// Version information for Strata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
