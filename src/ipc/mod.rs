//! Status-bar snapshots
//!
//! Status bars subscribe to one output and receive an [`OutputStatus`]
//! whenever the core re-arranges or changes focus. Subscribers are owned by
//! the [`StatusRegistry`] and die with their output.

use log::{trace, warn};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::backend::Backend;
use crate::error::CoreResult;
use crate::registry::OutputId;
use crate::server::Server;
use crate::tags::{visible_on, TagMask};

/// State of one tag on one output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagStatus {
    /// 1-based, as shown to users
    pub tag: u32,
    pub active: bool,
    pub clients: usize,
    pub focused: bool,
}

/// Everything a bar needs to draw one output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputStatus {
    pub output: String,
    pub selected: bool,
    pub tags: Vec<TagStatus>,
    pub title: String,
    pub app_id: String,
}

/// Receiver of status snapshots
pub trait StatusSink {
    fn send(&mut self, status: &OutputStatus) -> CoreResult<()>;
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> StatusSink for JsonLinesSink<W> {
    fn send(&mut self, status: &OutputStatus) -> CoreResult<()> {
        serde_json::to_writer(&mut self.writer, status)?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(serde_json::Error::io)?;
        Ok(())
    }
}

/// Keeps every snapshot it receives; shares its buffer with clones
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    received: Rc<RefCell<Vec<OutputStatus>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<OutputStatus> {
        self.received.borrow().clone()
    }

    pub fn last(&self) -> Option<OutputStatus> {
        self.received.borrow().last().cloned()
    }
}

impl StatusSink for CollectingSink {
    fn send(&mut self, status: &OutputStatus) -> CoreResult<()> {
        self.received.borrow_mut().push(status.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type SinkFactory = Box<dyn FnMut() -> Box<dyn StatusSink>>;

/// Status subscribers, grouped by the output they watch
#[derive(Default)]
pub struct StatusRegistry {
    next_id: u64,
    subscribers: HashMap<OutputId, Vec<(SubscriberId, Box<dyn StatusSink>)>>,
    factory: Option<SinkFactory>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `sink` to the status of `output`
    pub fn bind(&mut self, output: OutputId, sink: Box<dyn StatusSink>) -> SubscriberId {
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        self.subscribers.entry(output).or_default().push((id, sink));
        id
    }

    /// Create a subscriber for every output that appears from now on
    pub fn set_default_sink(&mut self, factory: impl FnMut() -> Box<dyn StatusSink> + 'static) {
        self.factory = Some(Box::new(factory));
    }

    pub(crate) fn bind_default(&mut self, output: OutputId) -> Option<SubscriberId> {
        let sink = self.factory.as_mut().map(|factory| factory())?;
        Some(self.bind(output, sink))
    }

    pub fn unbind(&mut self, id: SubscriberId) -> bool {
        let mut found = false;
        for sinks in self.subscribers.values_mut() {
            let before = sinks.len();
            sinks.retain(|(other, _)| *other != id);
            found |= sinks.len() != before;
        }
        self.subscribers.retain(|_, sinks| !sinks.is_empty());
        found
    }

    /// Destroy every subscriber of `output`; returns how many there were
    pub fn release(&mut self, output: OutputId) -> usize {
        self.subscribers.remove(&output).map_or(0, |sinks| sinks.len())
    }

    pub fn subscriber_count(&self, output: OutputId) -> usize {
        self.subscribers.get(&output).map_or(0, Vec::len)
    }

    pub fn has_subscribers(&self, output: OutputId) -> bool {
        self.subscriber_count(output) > 0
    }

    /// Deliver a snapshot; subscribers that fail are dropped
    pub fn publish(&mut self, output: OutputId, status: &OutputStatus) {
        let Some(sinks) = self.subscribers.get_mut(&output) else {
            return;
        };
        sinks.retain_mut(|(id, sink)| match sink.send(status) {
            Ok(()) => true,
            Err(err) => {
                warn!("dropping status subscriber {:?}: {}", id, err);
                false
            }
        });
        if sinks.is_empty() {
            self.subscribers.remove(&output);
        }
    }
}

/// Snapshot of `output` as a status bar sees it
pub fn snapshot<B: Backend>(server: &Server<B>, output: OutputId) -> Option<OutputStatus> {
    let out = server.registry.outputs.get(output)?;
    let focused = server
        .registry
        .focused()
        .and_then(|id| server.registry.clients.get(id))
        .filter(|client| client.output == Some(output));

    let tags = TagMask::ALL
        .iter_tags(server.config.tags.count)
        .map(|tag| {
            let mask = TagMask::mask_of(tag);
            TagStatus {
                tag: tag + 1,
                active: visible_on(out.cur_tag, mask),
                clients: server
                    .registry
                    .clients_on(output)
                    .filter(|client| visible_on(client.tags, mask))
                    .count(),
                focused: focused.is_some_and(|client| visible_on(client.tags, mask)),
            }
        })
        .collect();

    Some(OutputStatus {
        output: out.name.clone(),
        selected: server.cur_output == Some(output),
        tags,
        title: focused.map(|c| c.title.clone()).unwrap_or_default(),
        app_id: focused.map(|c| c.app_id.clone()).unwrap_or_default(),
    })
}

/// Send the status of `output` to its subscribers
pub(crate) fn publish_status<B: Backend>(server: &mut Server<B>, output: OutputId) {
    if !server.status.has_subscribers(output) {
        return;
    }
    if let Some(status) = snapshot(server, output) {
        trace!("status for {} ({} subscribers)", status.output, server.status.subscriber_count(output));
        server.status.publish(output, &status);
    }
}

/// Send the status of every output
pub(crate) fn publish_all<B: Backend>(server: &mut Server<B>) {
    for output in server.registry.outputs.ids() {
        publish_status(server, output);
    }
}
