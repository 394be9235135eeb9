//! One-shot wait gates.
//!
//! A gate starts closed and is released at most once. Waiting on a released
//! gate returns immediately. Built on a zero-capacity channel whose only
//! sender is dropped on release, so waiters wake on disconnect.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

/// Cloneable handle to a shared one-shot latch.
#[derive(Clone)]
pub struct Gate {
    rx: Receiver<()>,
    tx: Arc<Mutex<Option<Sender<()>>>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            rx,
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// A gate that is already open.
    pub fn released() -> Self {
        let gate = Self::new();
        gate.release();
        gate
    }

    /// Open the gate. Returns `true` if this call released it.
    pub fn release(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_released(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Block until the gate is released.
    pub fn wait(&self) {
        // Nothing is ever sent; recv only returns once the sender is gone.
        let _ = self.rx.recv();
    }

    /// Block until released or `timeout` elapses. Returns `true` if released.
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        !matches!(
            self.rx.recv_timeout(timeout),
            Err(crossbeam_channel::RecvTimeoutError::Timeout)
        )
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_release_once() {
        let gate = Gate::new();
        assert!(!gate.is_released());
        assert!(gate.release());
        assert!(!gate.release());
        assert!(gate.is_released());
        gate.wait();
    }

    #[test]
    fn test_wait_blocks_until_release() {
        let gate = Gate::new();
        assert!(!gate.wait_timeout(Duration::from_millis(20)));

        let waiter = gate.clone();
        let handle = std::thread::spawn(move || {
            waiter.wait();
            true
        });
        std::thread::sleep(Duration::from_millis(20));
        gate.release();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_released_gate_is_open() {
        let gate = Gate::released();
        assert!(gate.wait_timeout(Duration::from_millis(1)));
    }
}
