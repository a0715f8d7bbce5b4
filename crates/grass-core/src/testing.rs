//! In-memory transport and sink helpers for unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::error::TransportError;
use crate::events::{StatusEvent, StatusKind};
use crate::route::Route;
use crate::transport::{Binding, Connector, TransportEvent, ABNORMAL_CLOSE};

/// Server side of a [`MockBinding`]
pub struct Remote {
    inbound: mpsc::UnboundedSender<TransportEvent>,
    pub outbound: mpsc::UnboundedReceiver<String>,
}

impl Remote {
    pub fn push_text(&self, text: &str) {
        let _ = self
            .inbound
            .send(TransportEvent::Message(text.as_bytes().to_vec()));
    }

    pub fn push_bytes(&self, bytes: Vec<u8>) {
        let _ = self.inbound.send(TransportEvent::Message(bytes));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.inbound.send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .inbound
            .send(TransportEvent::Error(TransportError::Receive(message.to_string())));
    }

    /// Everything the client has sent so far
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            sent.push(text);
        }
        sent
    }
}

pub struct MockBinding {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<String>,
    live: Arc<AtomicUsize>,
    open: bool,
}

#[async_trait]
impl Binding for MockBinding {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Send("remote dropped".to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        if !self.open {
            return TransportEvent::Closed {
                code: ABNORMAL_CLOSE,
                reason: String::new(),
            };
        }
        match self.inbound.recv().await {
            Some(event) => {
                if !matches!(event, TransportEvent::Message(_)) {
                    self.open = false;
                }
                event
            }
            None => {
                self.open = false;
                TransportEvent::Closed {
                    code: ABNORMAL_CLOSE,
                    reason: String::new(),
                }
            }
        }
    }

    async fn terminate(&mut self) {
        self.open = false;
    }
}

impl Drop for MockBinding {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockState {
    opens: Vec<(Route, Instant)>,
    remotes: Vec<Option<Remote>>,
    failures_left: usize,
}

/// Connector whose bindings are driven from the test through [`Remote`]s
#[derive(Default)]
pub struct MockConnector {
    state: Mutex<MockState>,
    live: Arc<AtomicUsize>,
    max_live: AtomicUsize,
    opened: Notify,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` open attempts fail
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().failures_left = count;
    }

    /// Number of open attempts, failed ones included
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    pub fn opens(&self) -> Vec<(Route, Instant)> {
        self.state.lock().unwrap().opens.clone()
    }

    /// Remote end of the binding created by the `index`-th successful open
    pub fn take_remote(&self, index: usize) -> Remote {
        self.state.lock().unwrap().remotes[index]
            .take()
            .expect("remote already taken")
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub async fn wait_for_opens(&self, count: usize) {
        loop {
            let notified = self.opened.notified();
            if self.open_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Binding = MockBinding;

    async fn open(&self, route: &Route) -> Result<MockBinding, TransportError> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.opens.push((route.clone(), Instant::now()));
            if state.failures_left > 0 {
                state.failures_left -= 1;
                Err(TransportError::Connect("scripted failure".to_string()))
            } else {
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                state.remotes.push(Some(Remote {
                    inbound: in_tx,
                    outbound: out_rx,
                }));
                let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_live.fetch_max(live, Ordering::SeqCst);
                Ok(MockBinding {
                    inbound: in_rx,
                    outbound: out_tx,
                    live: self.live.clone(),
                    open: true,
                })
            }
        };
        self.opened.notify_waiters();
        result
    }
}

/// Receive events until one matches `pred`, returning it and everything skipped
pub async fn next_matching<F>(
    rx: &mut mpsc::UnboundedReceiver<StatusEvent>,
    pred: F,
) -> (StatusEvent, Vec<StatusEvent>)
where
    F: Fn(&StatusKind) -> bool,
{
    let mut skipped = Vec::new();
    loop {
        let event = rx.recv().await.expect("event sink closed");
        if pred(&event.kind) {
            return (event, skipped);
        }
        skipped.push(event);
    }
}
