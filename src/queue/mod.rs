//! Queue-side components: the publisher, the bounded-concurrency consumer,
//! the retry/dead-letter table and the message dispatch routes.

pub mod consumer;
pub mod intake;
pub mod publisher;
pub mod retry;

pub use consumer::Consumer;
pub use intake::EventIntake;
pub use publisher::Publisher;
pub use retry::{dead_letter_queue, retry_count, tier_queue, RetryPolicy, RetryTier};

use crate::model::{
    PATTERN_BUILD_QUEUED, PATTERN_CATALOG_CHANGED, PATTERN_TENANT_FREEZE, PATTERN_TENANT_UNFREEZE,
};
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Handler routes, dispatched on the message `pattern` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    BuildQueued,
    CatalogChanged,
    TenantFreeze,
    TenantUnfreeze,
}

static ROUTES: Lazy<HashMap<&'static str, Route>> = Lazy::new(|| {
    HashMap::from([
        (PATTERN_BUILD_QUEUED, Route::BuildQueued),
        (PATTERN_CATALOG_CHANGED, Route::CatalogChanged),
        (PATTERN_TENANT_FREEZE, Route::TenantFreeze),
        (PATTERN_TENANT_UNFREEZE, Route::TenantUnfreeze),
    ])
});

pub fn route_for(pattern: &str) -> Option<Route> {
    ROUTES.get(pattern).copied()
}

/// Startup check: every known pattern must resolve to exactly one route.
pub fn validate_routes() -> Result<()> {
    for pattern in [
        PATTERN_BUILD_QUEUED,
        PATTERN_CATALOG_CHANGED,
        PATTERN_TENANT_FREEZE,
        PATTERN_TENANT_UNFREEZE,
    ] {
        if route_for(pattern).is_none() {
            bail!("no handler route registered for pattern '{pattern}'");
        }
    }
    Ok(())
}
