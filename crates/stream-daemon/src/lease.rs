//! Keep-alive leases held while audio is flowing.
//!
//! Two independent leases: `network` (keep the link up) and `cpu` (keep the
//! machine awake). `acquire`/`release` are idempotent and never fail: a
//! backend error is logged and the logical lease still changes state, because
//! command-driven and interruption-driven transitions may both touch a lease
//! around the same state change.

use std::path::PathBuf;
use std::process::Stdio;

use stream_proto::config::LeaseBackendKind;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("systemd-inhibit not found on PATH")]
    NotFound,
    #[error("lease primitive failed: {0}")]
    Io(#[from] std::io::Error),
}

/// OS primitive behind one lease.
pub trait LeaseBackend: Send {
    fn acquire(&mut self) -> Result<(), LeaseError>;
    fn release(&mut self) -> Result<(), LeaseError>;
}

/// Bookkeeping only.
#[derive(Debug, Default)]
pub struct NoopBackend;

impl LeaseBackend for NoopBackend {
    fn acquire(&mut self) -> Result<(), LeaseError> {
        Ok(())
    }

    fn release(&mut self) -> Result<(), LeaseError> {
        Ok(())
    }
}

/// Holds a `systemd-inhibit ... sleep infinity` child for the lifetime of the
/// lease. Spawning needs a tokio runtime; release signals the child and lets
/// the runtime reap it, so the controller task never blocks on a wait.
pub struct InhibitBackend {
    what: &'static str,
    binary: Option<PathBuf>,
    child: Option<Child>,
}

impl InhibitBackend {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            binary: stream_proto::platform::find_inhibit_binary(),
            child: None,
        }
    }
}

impl LeaseBackend for InhibitBackend {
    fn acquire(&mut self) -> Result<(), LeaseError> {
        if self.child.is_some() {
            return Ok(());
        }
        let binary = self.binary.as_ref().ok_or(LeaseError::NotFound)?;
        let child = Command::new(binary)
            .arg(format!("--what={}", self.what))
            .arg("--who=publicstream")
            .arg("--why=audio playback")
            .arg("--mode=block")
            .arg("sleep")
            .arg("infinity")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        debug!(
            "lease: systemd-inhibit --what={} pid={:?}",
            self.what,
            child.id()
        );
        self.child = Some(child);
        Ok(())
    }

    fn release(&mut self) -> Result<(), LeaseError> {
        if let Some(mut child) = self.child.take() {
            if let Some(status) = child.try_wait()? {
                debug!("lease: systemd-inhibit --what={} already exited ({})", self.what, status);
                return Ok(());
            }
            child.start_kill()?;
        }
        Ok(())
    }
}

impl Drop for InhibitBackend {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

pub struct Lease {
    name: &'static str,
    held: bool,
    backend: Box<dyn LeaseBackend>,
}

impl Lease {
    pub fn new(name: &'static str, backend: Box<dyn LeaseBackend>) -> Self {
        Self {
            name,
            held: false,
            backend,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn acquire(&mut self) {
        if self.held {
            debug!("lease {}: already held", self.name);
            return;
        }
        if let Err(e) = self.backend.acquire() {
            warn!("lease {}: acquire failed, continuing without it: {}", self.name, e);
        }
        self.held = true;
    }

    pub fn release(&mut self) {
        if !self.held {
            debug!("lease {}: not held", self.name);
            return;
        }
        if let Err(e) = self.backend.release() {
            warn!("lease {}: release failed: {}", self.name, e);
        }
        self.held = false;
    }
}

pub struct LeaseManager {
    network: Lease,
    cpu: Lease,
}

impl LeaseManager {
    pub fn new(network: Box<dyn LeaseBackend>, cpu: Box<dyn LeaseBackend>) -> Self {
        Self {
            network: Lease::new("network", network),
            cpu: Lease::new("cpu", cpu),
        }
    }

    pub fn noop() -> Self {
        Self::new(Box::new(NoopBackend), Box::new(NoopBackend))
    }

    pub fn from_kind(kind: LeaseBackendKind) -> Self {
        match kind {
            LeaseBackendKind::None => Self::noop(),
            LeaseBackendKind::Inhibit => {
                info!("lease: using systemd-inhibit");
                Self::new(
                    Box::new(InhibitBackend::new("idle")),
                    Box::new(InhibitBackend::new("sleep")),
                )
            }
        }
    }

    pub fn acquire_all(&mut self) {
        self.network.acquire();
        self.cpu.acquire();
    }

    pub fn release_all(&mut self) {
        self.network.release();
        self.cpu.release();
    }

    pub fn network(&self) -> &Lease {
        &self.network
    }

    pub fn cpu(&self) -> &Lease {
        &self.cpu
    }

    pub fn both_held(&self) -> bool {
        self.network.is_held() && self.cpu.is_held()
    }

    pub fn none_held(&self) -> bool {
        !self.network.is_held() && !self.cpu.is_held()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct Counting {
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        fail: bool,
    }

    impl LeaseBackend for Counting {
        fn acquire(&mut self) -> Result<(), LeaseError> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LeaseError::NotFound);
            }
            Ok(())
        }

        fn release(&mut self) -> Result<(), LeaseError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LeaseError::NotFound);
            }
            Ok(())
        }
    }

    #[test]
    fn test_acquire_and_release_are_idempotent() {
        let backend = Counting::default();
        let mut lease = Lease::new("cpu", Box::new(backend.clone()));

        lease.acquire();
        lease.acquire();
        assert!(lease.is_held());
        assert_eq!(backend.acquired.load(Ordering::SeqCst), 1);

        lease.release();
        lease.release();
        assert!(!lease.is_held());
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_of_unheld_lease_never_touches_backend() {
        let backend = Counting::default();
        let mut lease = Lease::new("network", Box::new(backend.clone()));
        lease.release();
        assert_eq!(backend.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backend_failure_is_best_effort() {
        let backend = Counting {
            fail: true,
            ..Counting::default()
        };
        let mut lease = Lease::new("cpu", Box::new(backend));
        lease.acquire();
        assert!(lease.is_held());
        lease.release();
        assert!(!lease.is_held());
    }

    #[test]
    fn test_manager_tracks_both_leases() {
        let mut leases = LeaseManager::noop();
        assert!(leases.none_held());
        leases.acquire_all();
        assert!(leases.both_held());
        assert!(leases.network().is_held() && leases.cpu().is_held());
        leases.release_all();
        assert!(leases.none_held());
    }

    #[test]
    fn test_inhibit_without_binary_is_not_found() {
        let mut backend = InhibitBackend {
            what: "sleep",
            binary: None,
            child: None,
        };
        assert!(matches!(backend.acquire(), Err(LeaseError::NotFound)));
        assert!(backend.release().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_inhibit_release_clears_child_without_waiting() {
        let binary = PathBuf::from("/bin/sleep");
        if !binary.exists() {
            return;
        }
        let mut backend = InhibitBackend {
            what: "sleep",
            binary: Some(binary),
            child: None,
        };
        backend.acquire().unwrap();
        assert!(backend.child.is_some());
        // Already held: no second child.
        backend.acquire().unwrap();

        assert!(backend.release().is_ok());
        assert!(backend.child.is_none());
        assert!(backend.release().is_ok());
    }
}
