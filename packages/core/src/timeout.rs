//! Deadline enforcement for blocking operations.
//!
//! Filesystem calls against a stale network mount can block in the kernel for
//! minutes. Each bounded operation runs on a helper thread and the caller waits
//! on a channel with `recv_timeout`; if the deadline passes the helper is
//! abandoned and keeps running detached until the kernel call returns.
//!
//! Operations repeated every poll go through a [`SingleFlight`], so a mount
//! that stays hung costs one stuck helper thread rather than one per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use crate::error::{Error, IoResultExt, Result};

/// Runs `op` on a helper thread and waits at most `timeout` for its result.
pub fn run_with_timeout<T, F>(operation: &str, timeout: Duration, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name(format!("bounded-{operation}"))
        .spawn(move || {
            let _ = tx.send(op());
        })
        .command_context(format!("spawn thread for {operation}"))?;

    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::Timeout {
            operation: operation.to_string(),
            timeout,
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Generic {
            message: format!("{operation} thread terminated unexpectedly"),
            source: None,
        }),
    }
}

/// Allows at most one outstanding helper thread for an operation.
///
/// The slot stays taken until the helper returns, even after the caller has
/// given up waiting on it.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a helper thread from an earlier call is still running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Like [`run_with_timeout`], but fails with [`Error::StillPending`]
    /// without spawning anything while an earlier helper is still running.
    pub fn run<T, F>(&self, operation: &str, timeout: Duration, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::StillPending {
                operation: operation.to_string(),
            });
        }

        // Released when the helper finishes or panics, or when spawning fails
        // and the closure is dropped unrun.
        let slot = Release(Arc::clone(&self.busy));
        run_with_timeout(operation, timeout, move || {
            let _slot = slot;
            op()
        })
    }
}

struct Release(Arc<AtomicBool>);

impl Drop for Release {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_value_within_deadline() {
        let value = run_with_timeout("add", Duration::from_secs(5), || 2 + 2).unwrap();
        assert_eq!(value, 4);
    }

    #[test]
    fn test_times_out_on_slow_operation() {
        let result = run_with_timeout("sleep", Duration::from_millis(20), || {
            thread::sleep(Duration::from_secs(2));
        });
        match result {
            Err(Error::Timeout { operation, .. }) => assert_eq!(operation, "sleep"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_panicking_operation_is_reported() {
        let result: Result<()> =
            run_with_timeout("boom", Duration::from_secs(5), || panic!("boom"));
        assert!(matches!(result, Err(Error::Generic { .. })));
    }

    #[test]
    fn test_single_flight_blocks_while_helper_is_stuck() {
        let flight = SingleFlight::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let first = flight.run("scan", Duration::from_millis(20), move || {
            let _ = release_rx.recv();
        });
        assert!(matches!(first, Err(Error::Timeout { .. })));
        assert!(flight.is_busy());

        let second = flight.run("scan", Duration::from_secs(5), || 1);
        assert!(matches!(second, Err(Error::StillPending { .. })));

        release_tx.send(()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while flight.is_busy() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(flight.run("scan", Duration::from_secs(5), || 2).unwrap(), 2);
    }

    #[test]
    fn test_single_flight_released_after_panic() {
        let flight = SingleFlight::new();
        let result: Result<()> = flight.run("boom", Duration::from_secs(5), || panic!("boom"));
        assert!(result.is_err());
        assert!(!flight.is_busy());
    }
}
