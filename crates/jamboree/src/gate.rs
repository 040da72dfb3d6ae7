//! Pause gate: a boolean flag the pump blocks on, interruptible by cancellation.

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Returned when a wait was cut short by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session cancelled")]
pub struct Cancelled;

/// Blocking pause flag with wake-on-change.
///
/// Built on a watch channel, so a change made between the flag check and the
/// wait is never lost: the waiter's receiver is already marked changed.
#[derive(Debug)]
pub struct PauseGate {
    flag: watch::Sender<bool>,
}

impl PauseGate {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag }
    }

    pub fn is_paused(&self) -> bool {
        *self.flag.borrow()
    }

    /// Set the flag, waking every waiter. Returns true if the value changed.
    pub fn set_paused(&self, paused: bool) -> bool {
        self.flag.send_if_modified(|current| {
            if *current == paused {
                false
            } else {
                *current = paused;
                true
            }
        })
    }

    /// Block while paused. Each wake re-checks cancellation and then the flag.
    pub async fn wait_while_paused(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let mut rx = self.flag.subscribe();
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            if !*rx.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = rx.changed() => {}
            }
        }
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unpaused_gate_passes_immediately() {
        let gate = PauseGate::new();
        let cancel = CancellationToken::new();
        assert_eq!(gate.wait_while_paused(&cancel).await, Ok(()));
    }

    #[test]
    fn test_set_paused_is_idempotent() {
        let gate = PauseGate::new();
        assert!(gate.set_paused(true));
        assert!(!gate.set_paused(true));
        assert!(gate.is_paused());
        assert!(gate.set_paused(false));
        assert!(!gate.set_paused(false));
        assert!(!gate.is_paused());
    }

    #[tokio::test]
    async fn test_resume_wakes_waiter() {
        let gate = Arc::new(PauseGate::new());
        let cancel = CancellationToken::new();
        gate.set_paused(true);

        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.wait_while_paused(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.set_paused(false);
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake on resume")
            .unwrap();
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_paused_wait() {
        let gate = Arc::new(PauseGate::new());
        let cancel = CancellationToken::new();
        gate.set_paused(true);

        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.wait_while_paused(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel should interrupt the wait")
            .unwrap();
        assert_eq!(result, Err(Cancelled));
        assert!(gate.is_paused());
    }

    #[tokio::test]
    async fn test_pause_resume_pause_keeps_blocking() {
        let gate = Arc::new(PauseGate::new());
        let cancel = CancellationToken::new();
        gate.set_paused(true);

        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.wait_while_paused(&cancel).await })
        };

        // A flip that lands back on paused before the waiter runs must not release it.
        gate.set_paused(false);
        gate.set_paused(true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.set_paused(false);
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }
}
