//! In-memory log used by the ingestion tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::event::{Event, Position};
use crate::error::SourceError;
use crate::ingestors::source::{CommittedPositions, LogConnector, LogSession, SourceSettings};

const TOPIC: &str = "data-lake";

/// How one session behaves once opened.
#[derive(Debug, Clone)]
pub(crate) enum SessionScript {
    Unlimited,
    DropAfter(usize),
    FailAfter(usize, SourceError),
}

struct Shared {
    events: Vec<Bytes>,
    connect_failures: Mutex<VecDeque<SourceError>>,
    scripts: Mutex<VecDeque<SessionScript>>,
    connects: AtomicUsize,
    closed: AtomicUsize,
}

/// Single-partition log; sessions start right after the committed offset.
#[derive(Clone)]
pub(crate) struct MemoryLog {
    shared: Arc<Shared>,
}

impl MemoryLog {
    pub(crate) fn new(len: usize) -> Self {
        let payloads: Vec<String> = (0..len).map(|seq| format!(r#"{{"seq":{}}}"#, seq)).collect();
        Self::with_payloads(payloads)
    }

    pub(crate) fn with_payloads<S: Into<String>>(payloads: Vec<S>) -> Self {
        Self {
            shared: Arc::new(Shared {
                events: payloads
                    .into_iter()
                    .map(|p| Bytes::from(Into::<String>::into(p)))
                    .collect(),
                connect_failures: Mutex::new(VecDeque::new()),
                scripts: Mutex::new(VecDeque::new()),
                connects: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn fail_connects(self, failures: Vec<SourceError>) -> Self {
        self.shared.connect_failures.lock().extend(failures);
        self
    }

    pub(crate) fn script(self, scripts: Vec<SessionScript>) -> Self {
        self.shared.scripts.lock().extend(scripts);
        self
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_sessions(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct MemorySession {
    shared: Arc<Shared>,
    next: usize,
    delivered: usize,
    script: SessionScript,
}

#[async_trait]
impl LogConnector for MemoryLog {
    type Session = MemorySession;

    async fn connect(
        &self,
        _settings: &SourceSettings,
        committed: &CommittedPositions,
    ) -> Result<MemorySession, SourceError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.shared.connect_failures.lock().pop_front() {
            return Err(failure);
        }
        let next = committed
            .get(TOPIC, 0)
            .map_or(0, |offset| offset as usize + 1);
        let script = self
            .shared
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(SessionScript::Unlimited);
        Ok(MemorySession {
            shared: Arc::clone(&self.shared),
            next,
            delivered: 0,
            script,
        })
    }
}

#[async_trait]
impl LogSession for MemorySession {
    async fn recv(&mut self) -> Result<Event, SourceError> {
        match &self.script {
            SessionScript::DropAfter(n) if self.delivered >= *n => {
                return Err(SourceError::Transient("connection reset".into()))
            }
            SessionScript::FailAfter(n, e) if self.delivered >= *n => return Err(e.clone()),
            _ => {}
        }

        let Some(payload) = self.shared.events.get(self.next).cloned() else {
            return std::future::pending().await;
        };
        let event = Event::new(payload, Position::new(TOPIC, 0, self.next as i64));
        self.next += 1;
        self.delivered += 1;
        Ok(event)
    }

    fn commit(&mut self, _position: &Position) -> Result<(), SourceError> {
        Ok(())
    }

    async fn close(&mut self) {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}
