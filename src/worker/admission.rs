use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

/// Reason an admission request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Server is shutting down")]
    ServerShuttingDown,

    #[error("Server max capacity reached")]
    CapacityExhausted,
}

#[derive(Debug)]
struct AdmissionState {
    load: usize,
    accepting: bool,
}

/// Bounds the number of concurrently running evaluations on one executor.
///
/// `load` never exceeds `capacity`, and once [`begin_shutdown`](Self::begin_shutdown)
/// has been called no further admission succeeds.
#[derive(Debug)]
pub struct AdmissionController {
    capacity: usize,
    state: Mutex<AdmissionState>,
    idle: Notify,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(AdmissionState {
                load: 0,
                accepting: true,
            }),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        // The guarded section never panics, but a poisoned lock still holds valid counters.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a slot if the executor is accepting work and has spare capacity.
    pub fn try_acquire(self: &Arc<Self>) -> Result<AdmissionPermit, Rejection> {
        let mut state = self.lock();
        if !state.accepting {
            return Err(Rejection::ServerShuttingDown);
        }
        if state.load >= self.capacity {
            return Err(Rejection::CapacityExhausted);
        }
        state.load += 1;
        tracing::trace!(load = state.load, capacity = self.capacity, "Slot acquired");
        Ok(AdmissionPermit {
            controller: Some(Arc::clone(self)),
        })
    }

    fn release(&self) {
        let mut state = self.lock();
        state.load = state.load.saturating_sub(1);
        tracing::trace!(load = state.load, capacity = self.capacity, "Slot released");
        if state.load == 0 {
            self.idle.notify_waiters();
        }
    }

    /// Stop admitting new work. Idempotent.
    pub fn begin_shutdown(&self) {
        let mut state = self.lock();
        if state.accepting {
            state.accepting = false;
            tracing::info!(load = state.load, "Stopped accepting new calculations");
        }
    }

    /// Wait until every admitted evaluation has released its slot.
    ///
    /// Wakes on release notifications and also re-checks every `poll` in case a
    /// notification raced with registration.
    pub async fn drain_and_wait(&self, poll: Duration) {
        loop {
            let notified = self.idle.notified();
            let load = self.load();
            if load == 0 {
                break;
            }
            tracing::info!(load, "Waiting for in-flight calculations to finish");
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
        tracing::info!("All in-flight calculations finished");
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn load(&self) -> usize {
        self.lock().load
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }
}

/// A granted slot. Dropping the permit releases the slot exactly once.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Option<Arc<AdmissionController>>,
}

impl AdmissionPermit {
    /// Release the slot now instead of at drop.
    pub fn release(mut self) {
        if let Some(controller) = self.controller.take() {
            controller.release();
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(controller) = self.controller.take() {
            controller.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_up_to_capacity_then_rejects() {
        let controller = Arc::new(AdmissionController::new(2));
        let first = controller.try_acquire().unwrap();
        let _second = controller.try_acquire().unwrap();
        assert_eq!(controller.load(), 2);
        assert_eq!(
            controller.try_acquire().unwrap_err(),
            Rejection::CapacityExhausted
        );
        assert_eq!(controller.load(), 2);

        first.release();
        assert_eq!(controller.load(), 1);
        assert!(controller.try_acquire().is_ok());
    }

    #[test]
    fn dropping_permit_releases_slot() {
        let controller = Arc::new(AdmissionController::new(1));
        {
            let _permit = controller.try_acquire().unwrap();
            assert_eq!(controller.load(), 1);
        }
        assert_eq!(controller.load(), 0);
    }

    #[test]
    fn shutdown_rejection_takes_priority() {
        let controller = Arc::new(AdmissionController::new(1));
        let _permit = controller.try_acquire().unwrap();
        controller.begin_shutdown();
        assert!(!controller.is_accepting());
        assert_eq!(
            controller.try_acquire().unwrap_err(),
            Rejection::ServerShuttingDown
        );
    }

    #[test]
    fn zero_capacity_never_admits() {
        let controller = Arc::new(AdmissionController::new(0));
        assert_eq!(
            controller.try_acquire().unwrap_err(),
            Rejection::CapacityExhausted
        );
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_idle() {
        let controller = AdmissionController::new(3);
        controller.begin_shutdown();
        tokio::time::timeout(
            Duration::from_millis(100),
            controller.drain_and_wait(Duration::from_secs(60)),
        )
        .await
        .expect("drain should not wait with zero load");
    }
}
