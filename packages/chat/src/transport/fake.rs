//! Recording in-memory transport for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::TransportError;

use super::{Connection, EventCallback, SubscriptionId, Transport, TransportEvent};

/// Everything the fake transport was asked to do, in order
#[derive(Default)]
pub(crate) struct Recorder {
    pub(crate) operations: Vec<String>,
    pub(crate) published: Vec<(String, String)>,
    pub(crate) callbacks: Vec<EventCallback>,
}

impl Recorder {
    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.operations
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    pub(crate) fn position(&self, op: &str) -> Option<usize> {
        self.operations.iter().position(|o| o == op)
    }
}

pub(crate) struct FakeTransport {
    pub(crate) recorder: Arc<Mutex<Recorder>>,
    fail_with: Option<TransportError>,
}

impl FakeTransport {
    /// Transport whose `connect` succeeds, or fails with `fail_with`
    pub(crate) fn new(fail_with: Option<TransportError>) -> Self {
        Self {
            recorder: Arc::new(Mutex::new(Recorder::default())),
            fail_with,
        }
    }
}

/// Fire `event` through the callback handed to the `connection`-th connect
pub(crate) fn emit(recorder: &Arc<Mutex<Recorder>>, connection: usize, event: TransportEvent) {
    let callback = Arc::clone(&recorder.lock().unwrap().callbacks[connection]);
    callback(event);
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        on_event: EventCallback,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let mut recorder = self.recorder.lock().unwrap();
        recorder.operations.push("connect".to_string());
        recorder.callbacks.push(on_event);
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        Ok(Box::new(FakeConnection {
            recorder: Arc::clone(&self.recorder),
            next_subscription: 0,
            active: true,
        }))
    }
}

struct FakeConnection {
    recorder: Arc<Mutex<Recorder>>,
    next_subscription: u64,
    active: bool,
}

impl Connection for FakeConnection {
    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId, TransportError> {
        let id = SubscriptionId::new(self.next_subscription);
        self.next_subscription += 1;
        self.recorder
            .lock()
            .unwrap()
            .operations
            .push(format!("subscribe {}", topic));
        Ok(id)
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId) -> Result<(), TransportError> {
        self.recorder
            .lock()
            .unwrap()
            .operations
            .push(format!("unsubscribe {}", subscription));
        Ok(())
    }

    fn publish(&mut self, destination: &str, body: &str) -> Result<(), TransportError> {
        let mut recorder = self.recorder.lock().unwrap();
        recorder.operations.push(format!("publish {}", destination));
        recorder
            .published
            .push((destination.to_string(), body.to_string()));
        Ok(())
    }

    fn deactivate(&mut self) {
        if self.active {
            self.active = false;
            self.recorder
                .lock()
                .unwrap()
                .operations
                .push("deactivate".to_string());
        }
    }
}
