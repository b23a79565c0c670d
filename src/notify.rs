//! Notification seam for newly detected conflicts.
//!
//! The orchestrator calls the notifier after the reconcile transaction has
//! committed, so a slow or failing notifier can never hold the database or
//! lose a persisted conflict. Failures are logged and dropped.

use async_trait::async_trait;

use crate::types::{Conflict, Resolution};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one new conflict to its affected users, with the suggested
    /// resolutions attached. Errors are reported as strings because delivery
    /// transports vary; the caller only logs them.
    async fn notify(
        &self,
        conflict: &Conflict,
        users: &[String],
        resolutions: &[Resolution],
    ) -> Result<(), String>;
}

/// Discards every notification. Default when no transport is wired up.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(
        &self,
        conflict: &Conflict,
        users: &[String],
        _resolutions: &[Resolution],
    ) -> Result<(), String> {
        log::debug!(
            "dropping notification for conflict {} ({} users)",
            conflict.id,
            users.len()
        );
        Ok(())
    }
}
