//! The media engine as seen by the controller: an opaque handle with
//! transport commands and an asynchronous event stream.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    EndReached,
    Playing,
    Paused,
    Stopped,
    Error(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("media engine unavailable: {0}")]
    Spawn(String),
    #[error("media engine IPC failure: {0}")]
    Ipc(String),
    #[error("media engine rejected command: {0}")]
    Engine(String),
    #[error("media engine connection closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// A transport event tagged with the generation of the transport that
/// produced it, so the controller can drop events from a torn-down one.
#[derive(Debug, Clone)]
pub struct TransportNotice {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Non-owning way back into the controller: a channel sender plus the
/// generation id. Holding one does not keep the controller alive.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TransportNotice>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TransportNotice>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the controller is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TransportNotice {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

#[async_trait]
pub trait MediaTransport: Send {
    async fn load(&mut self, source: &str) -> Result<(), TransportError>;
    async fn play(&mut self) -> Result<(), TransportError>;
    async fn pause(&mut self) -> Result<(), TransportError>;
    async fn stop(&mut self) -> Result<(), TransportError>;
    /// `fraction` is in `0.0..=1.0`.
    async fn seek(&mut self, fraction: f64) -> Result<(), TransportError>;
    /// Milliseconds.
    async fn duration(&mut self) -> Result<i64, TransportError>;
    /// Milliseconds.
    async fn position(&mut self) -> Result<i64, TransportError>;
    /// Tear the engine down. The handle is dropped right after.
    async fn release(&mut self) -> Result<(), TransportError>;
}

/// Creates a fresh transport per load.
#[async_trait]
pub trait TransportFactory: Send {
    async fn create(&mut self, events: EventSink) -> Result<Box<dyn MediaTransport>, TransportError>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory transport recording every call into a shared journal.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct Shared {
        pub journal: Mutex<Vec<String>>,
        pub sinks: Mutex<Vec<EventSink>>,
        pub live: AtomicUsize,
        pub max_live: AtomicUsize,
        pub created: AtomicUsize,
        pub duration_ms: AtomicI64,
        pub position_ms: AtomicI64,
        pub fail_play: AtomicBool,
        pub fail_create: AtomicBool,
    }

    impl Shared {
        pub fn log(&self) -> Vec<String> {
            self.journal.lock().unwrap().clone()
        }

        pub fn sink(&self, idx: usize) -> EventSink {
            self.sinks.lock().unwrap()[idx].clone()
        }

        fn push(&self, line: String) {
            self.journal.lock().unwrap().push(line);
        }
    }

    #[derive(Clone, Default)]
    pub struct FakeFactory {
        pub shared: Arc<Shared>,
    }

    pub struct FakeTransport {
        id: usize,
        shared: Arc<Shared>,
    }

    #[async_trait]
    impl TransportFactory for FakeFactory {
        async fn create(
            &mut self,
            events: EventSink,
        ) -> Result<Box<dyn MediaTransport>, TransportError> {
            if self.shared.fail_create.load(Ordering::SeqCst) {
                return Err(TransportError::Spawn("no engine".into()));
            }
            let id = self.shared.created.fetch_add(1, Ordering::SeqCst) + 1;
            let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.max_live.fetch_max(live, Ordering::SeqCst);
            self.shared.sinks.lock().unwrap().push(events);
            self.shared.push(format!("create#{}", id));
            Ok(Box::new(FakeTransport {
                id,
                shared: self.shared.clone(),
            }))
        }
    }

    #[async_trait]
    impl MediaTransport for FakeTransport {
        async fn load(&mut self, source: &str) -> Result<(), TransportError> {
            self.shared.push(format!("load#{} {}", self.id, source));
            Ok(())
        }

        async fn play(&mut self) -> Result<(), TransportError> {
            self.shared.push(format!("play#{}", self.id));
            if self.shared.fail_play.load(Ordering::SeqCst) {
                return Err(TransportError::Engine("decode failure".into()));
            }
            Ok(())
        }

        async fn pause(&mut self) -> Result<(), TransportError> {
            self.shared.push(format!("pause#{}", self.id));
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), TransportError> {
            self.shared.push(format!("stop#{}", self.id));
            Ok(())
        }

        async fn seek(&mut self, fraction: f64) -> Result<(), TransportError> {
            self.shared.push(format!("seek#{} {}", self.id, fraction));
            Ok(())
        }

        async fn duration(&mut self) -> Result<i64, TransportError> {
            Ok(self.shared.duration_ms.load(Ordering::SeqCst))
        }

        async fn position(&mut self) -> Result<i64, TransportError> {
            Ok(self.shared.position_ms.load(Ordering::SeqCst))
        }

        async fn release(&mut self) -> Result<(), TransportError> {
            self.shared.push(format!("release#{}", self.id));
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
