//! calloop driver
//!
//! Backend threads push [`Event`]s into a channel; the loop hands each one
//! to [`Server::dispatch`] and stops once the server quits or every sender
//! is gone.

use anyhow::{anyhow, Context, Result};
use calloop::channel::{self, Sender};
use calloop::{EventLoop, LoopSignal};
use log::{debug, error, info};
use std::time::Duration;

use crate::backend::Backend;
use crate::events::Event;
use crate::server::Server;

pub struct CompositorLoop<B: Backend> {
    event_loop: EventLoop<'static, Server<B>>,
    sender: Sender<Event>,
    signal: LoopSignal,
}

impl<B: Backend> CompositorLoop<B> {
    pub fn new() -> Result<Self> {
        let event_loop: EventLoop<Server<B>> =
            EventLoop::try_new().context("Failed to create event loop")?;
        let (sender, events) = channel::channel::<Event>();

        event_loop
            .handle()
            .insert_source(events, |event, _, server: &mut Server<B>| match event {
                channel::Event::Msg(event) => {
                    if let Err(err) = server.dispatch(event) {
                        if err.is_fatal() {
                            error!("fatal: {}", err);
                            server.quit();
                        }
                    }
                }
                channel::Event::Closed => {
                    debug!("event channel closed");
                    server.quit();
                }
            })
            .map_err(|err| anyhow!("Failed to insert event channel: {}", err.error))?;

        let signal = event_loop.get_signal();
        Ok(Self {
            event_loop,
            sender,
            signal,
        })
    }

    /// Handle for feeding events from other threads
    pub fn sender(&self) -> Sender<Event> {
        self.sender.clone()
    }

    /// Dispatch until the server stops running. The loop's own sender is
    /// dropped first so the loop ends once all external senders are gone.
    pub fn run(self, server: &mut Server<B>) -> Result<()> {
        let Self {
            mut event_loop,
            sender,
            signal,
        } = self;
        drop(sender);

        server.start();
        info!("🔄 Entering event loop");
        event_loop
            .run(None::<Duration>, server, |server| {
                if !server.is_running() {
                    signal.stop();
                }
            })
            .context("Event loop failed")?;
        info!("🛑 Event loop finished");
        Ok(())
    }
}
