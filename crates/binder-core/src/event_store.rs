//! Broadcast + history store for export progress events.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::event::ExportEvent;

/// Events kept for late subscribers.
const HISTORY_LIMIT: usize = 4096;

/// Live channel capacity. Slow receivers lag rather than block the emitter.
const CHANNEL_CAPACITY: usize = 1024;

/// Event store with broadcast and history support.
///
/// Late subscribers (a UI that connects mid-export) receive the history,
/// then live updates.
pub struct EventStore {
    history: RwLock<VecDeque<ExportEvent>>,
    sender: broadcast::Sender<ExportEvent>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: RwLock::new(VecDeque::with_capacity(64)),
            sender,
        }
    }

    /// Push an event to both live listeners and history.
    pub fn push(&self, event: ExportEvent) {
        let _ = self.sender.send(event.clone()); // live listeners

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Drop history, e.g. when a new export starts.
    pub fn clear(&self) {
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<ExportEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn get_history(&self) -> Vec<ExportEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live updates.
    ///
    /// Lagged receivers silently skip the events they missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, ExportEvent> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| future::ready(res.ok()));

        Box::pin(hist.chain(live))
    }

    /// Live events up to and including the next terminal event.
    #[must_use]
    pub fn until_finished(&self) -> futures::stream::BoxStream<'static, ExportEvent> {
        let mut done = false;
        BroadcastStream::new(self.get_receiver())
            .filter_map(|res| future::ready(res.ok()))
            .take_while(move |event| {
                let keep = !done;
                done = event.is_terminal();
                future::ready(keep)
            })
            .boxed()
    }
}
