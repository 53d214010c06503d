//! Decides which integrations are due for a sync pass and which failed
//! recently. Pure functions over already-loaded records.

use chrono::{DateTime, Duration, Utc};

use crate::model::integration::ProviderIntegration;

/// Used when the caller does not supply a max age.
pub const DEFAULT_MAX_AGE_MINUTES: i64 = 60;

pub fn default_max_age() -> Duration {
    Duration::minutes(DEFAULT_MAX_AGE_MINUTES)
}

/// Active integrations that never synced or whose last sync is older than
/// `max_age`, oldest first. Never-synced records come before everything else.
pub fn select_due(
    integrations: &[ProviderIntegration],
    max_age: Duration,
    now: DateTime<Utc>,
) -> Vec<ProviderIntegration> {
    let mut due: Vec<ProviderIntegration> = integrations
        .iter()
        .filter(|i| i.is_active)
        .filter(|i| match i.last_sync_at {
            None => true,
            Some(last) => now - last > max_age,
        })
        .cloned()
        .collect();
    sort_oldest_first(&mut due);
    due
}

/// Integrations whose latest failure falls inside `window` and was not
/// followed by a successful sync.
pub fn select_recently_failed(
    integrations: &[ProviderIntegration],
    window: Duration,
    now: DateTime<Utc>,
) -> Vec<ProviderIntegration> {
    let mut failed: Vec<ProviderIntegration> = integrations
        .iter()
        .filter(|i| i.failed_since_last_sync())
        .filter(|i| i.last_failure_at.is_some_and(|at| now - at <= window))
        .cloned()
        .collect();
    failed.sort_by(|a, b| b.last_failure_at.cmp(&a.last_failure_at).then(a.id.cmp(&b.id)));
    failed
}

/// `None` sorts before any timestamp, which is exactly never-synced-first.
pub fn sort_oldest_first(integrations: &mut [ProviderIntegration]) {
    integrations.sort_by(|a, b| a.last_sync_at.cmp(&b.last_sync_at).then(a.id.cmp(&b.id)));
}
