use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::worker::AdmissionController;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is received.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}

/// Drives an executor from "accepting" to "terminated".
///
/// Triggering stops admission immediately, waits for every in-flight
/// evaluation to release its slot, then cancels [`terminated`](Self::terminated),
/// which is what the executor's servers wait on. Health queries keep being
/// served until that point.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    admission: Arc<AdmissionController>,
    terminated: CancellationToken,
    triggered: Arc<AtomicBool>,
    poll: Duration,
}

impl ShutdownCoordinator {
    pub fn new(admission: Arc<AdmissionController>, poll: Duration) -> Self {
        Self {
            admission,
            terminated: CancellationToken::new(),
            triggered: Arc::new(AtomicBool::new(false)),
            poll,
        }
    }

    /// Cancelled once the drain has completed.
    pub fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Begin shutdown and drain in the background.
    ///
    /// Returns `false` if shutdown was already under way.
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.admission.begin_shutdown();
        tracing::info!("Server stopped accepting new requests. Waiting for ongoing operations to complete");

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.admission.drain_and_wait(coordinator.poll).await;
            tracing::info!("Server gracefully shut down");
            coordinator.terminated.cancel();
        });
        true
    }

    /// Trigger shutdown (if needed) and wait until the drain has finished.
    pub async fn shutdown(&self) {
        self.trigger();
        self.terminated.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let admission = Arc::new(AdmissionController::new(2));
        let coordinator = ShutdownCoordinator::new(admission.clone(), Duration::from_millis(10));

        assert!(coordinator.trigger());
        assert!(!coordinator.trigger());
        assert!(coordinator.is_triggered());
        assert!(!admission.is_accepting());

        tokio::time::timeout(Duration::from_secs(1), coordinator.terminated().cancelled())
            .await
            .expect("idle executor should terminate promptly");
    }

    #[tokio::test]
    async fn waits_for_in_flight_work() {
        let admission = Arc::new(AdmissionController::new(2));
        let permit = admission.try_acquire().unwrap();
        let coordinator = ShutdownCoordinator::new(admission.clone(), Duration::from_millis(10));

        coordinator.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!coordinator.terminated().is_cancelled());

        permit.release();
        tokio::time::timeout(Duration::from_secs(1), coordinator.shutdown())
            .await
            .expect("drain should finish once the slot is released");
    }
}
