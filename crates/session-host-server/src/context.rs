//! Shared host context
//!
//! One lock guards the session state touched by request handlers and agent
//! callbacks. It is a `std` mutex and never held across an `.await`, so the
//! synchronous callbacks the agent invokes from its own threads can take it
//! directly.

use chrono::{DateTime, Utc};
use session_host_core::{ActivationState, Admission, PlayerId, RosterSnapshot, SessionState};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::info;

/// Session state plus the listener shutdown signal
pub struct HostContext {
    state: Mutex<SessionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new(ActivationState::default())
    }
}

impl HostContext {
    pub fn new(activation: ActivationState) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(SessionState::new(activation)),
            shutdown_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // State is plain data; a panicking holder cannot leave it torn
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit an authorized token; roster, counter and snapshot change together
    pub fn try_admit(&self, token: &str) -> Option<Admission> {
        self.lock().try_admit(token)
    }

    pub fn set_authorized(&self, ids: Vec<PlayerId>) {
        self.lock().roster.set_authorized(ids);
    }

    pub fn set_asset_text(&self, text: String) {
        self.lock().activation.asset_text = text;
    }

    pub fn set_cert_thumbprint(&self, thumbprint: String) {
        self.lock().activation.cert_thumbprint = thumbprint;
    }

    pub fn mark_activated(&self) {
        self.lock().activation.is_activated = true;
    }

    pub fn schedule_maintenance(&self, at: DateTime<Utc>) {
        self.lock().activation.schedule_maintenance(at);
    }

    pub fn activation(&self) -> ActivationState {
        self.lock().activation.clone()
    }

    pub fn roster(&self) -> RosterSnapshot {
        self.lock().roster.snapshot()
    }

    pub fn request_count(&self) -> u64 {
        self.lock().request_count
    }

    /// Ask the listener loop to stop accepting connections
    pub fn request_shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Shutdown requested");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

/// Resolve once shutdown has been requested
pub async fn stopped(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_admissions_are_not_lost() {
        let context = Arc::new(HostContext::default());
        context.set_authorized(vec!["p1".into(), "p2".into()]);

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let context = context.clone();
                std::thread::spawn(move || {
                    let token = if i % 2 == 0 { "p1" } else { "p2" };
                    for _ in 0..50 {
                        assert!(context.try_admit(token).is_some());
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(context.request_count(), 400);
        assert_eq!(context.roster().connected.len(), 400);
    }

    #[test]
    fn test_admission_snapshot_is_consistent() {
        let context = HostContext::default();
        context.set_authorized(vec!["p1".into()]);
        context.mark_activated();

        let admission = context.try_admit("p1").unwrap();
        assert_eq!(admission.request_count, 1);
        assert_eq!(admission.roster.connected.len(), 1);
        assert!(admission.activation.is_activated);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let context = HostContext::default();
        let mut signal = context.shutdown_signal();
        assert!(!context.is_shutting_down());

        context.request_shutdown();
        context.request_shutdown();
        stopped(&mut signal).await;
        assert!(context.is_shutting_down());
    }
}
