//! In-memory controller link for tests.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use binder_core::{ConnectionError, Connector, LinkError, RobotEndpoint, RobotLink};
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Recorder {
    attempts: Mutex<Vec<String>>,
    delivered: Mutex<Vec<String>>,
    send_times: Mutex<Vec<Instant>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// Connector whose links record every command instead of transmitting it.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    recorder: Arc<Recorder>,
    refuse: bool,
    fail_after: Option<usize>,
    send_delay: Option<Duration>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection attempt is refused.
    #[must_use]
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// The first `count` sends succeed; every later send fails.
    #[must_use]
    pub fn failing_after(count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::default()
        }
    }

    /// Each send takes `delay` before completing.
    #[must_use]
    pub const fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    /// Every command handed to a link, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> Vec<String> {
        lock(&self.recorder.attempts).clone()
    }

    /// Commands that were accepted.
    #[must_use]
    pub fn delivered(&self) -> Vec<String> {
        lock(&self.recorder.delivered).clone()
    }

    /// When each attempt started.
    #[must_use]
    pub fn send_times(&self) -> Vec<Instant> {
        lock(&self.recorder.send_times).clone()
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.recorder.connects.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.recorder.closes.load(Ordering::Acquire)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        endpoint: &RobotEndpoint,
    ) -> Result<Box<dyn RobotLink>, ConnectionError> {
        if self.refuse {
            return Err(ConnectionError::Refused(endpoint.to_string()));
        }
        self.recorder.connects.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MockLink {
            recorder: Arc::clone(&self.recorder),
            fail_after: self.fail_after,
            send_delay: self.send_delay,
            sent: 0,
            closed: false,
        }))
    }
}

struct MockLink {
    recorder: Arc<Recorder>,
    fail_after: Option<usize>,
    send_delay: Option<Duration>,
    sent: usize,
    closed: bool,
}

#[async_trait]
impl RobotLink for MockLink {
    async fn send(&mut self, command: &str) -> Result<(), LinkError> {
        lock(&self.recorder.send_times).push(Instant::now());
        lock(&self.recorder.attempts).push(command.to_string());
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed {
            return Err(LinkError::Closed);
        }
        if self.fail_after.is_some_and(|limit| self.sent >= limit) {
            return Err(LinkError::Rejected("mock write failure".to_string()));
        }
        self.sent += 1;
        lock(&self.recorder.delivered).push(command.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.closed = true;
        self.recorder.closes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
