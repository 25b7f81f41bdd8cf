//! Build queue publisher: turns a rebuild/publish intent into one broker
//! message. Also home of the single canonical priority-resolution path.

use crate::broker::{Broker, Delivery};
use crate::model::{BuildMode, BuildRequest, QueueMessage, PATTERN_BUILD_QUEUED, TRIGGER_CATALOG_CHANGE, TRIGGER_PUBLISH};
use crate::services::{BillingService, PlanTier};
use std::sync::Arc;
use tracing::{debug, warn};

/// Lowest priority, used when nothing more specific applies.
pub const DEFAULT_PRIORITY: u8 = 1;
/// Priority of debounced automated rebuilds.
pub const AUTO_REBUILD_PRIORITY: u8 = 5;
/// Priority of publishes by paid-plan tenants.
pub const PAID_PUBLISH_PRIORITY: u8 = 10;

/// Canonical priority policy: paid publishes first, automated rebuilds in
/// the middle, everything else last.
pub fn resolve_priority(trigger: &str, plan: PlanTier) -> u8 {
    match trigger {
        TRIGGER_CATALOG_CHANGE => AUTO_REBUILD_PRIORITY,
        TRIGGER_PUBLISH => match plan {
            PlanTier::Paid => PAID_PUBLISH_PRIORITY,
            PlanTier::Free | PlanTier::Trial => DEFAULT_PRIORITY,
        },
        _ => DEFAULT_PRIORITY,
    }
}

pub struct Publisher {
    broker: Broker,
    topic: String,
    billing: Arc<dyn BillingService>,
}

impl Publisher {
    pub fn new(broker: Broker, topic: &str, billing: Arc<dyn BillingService>) -> Self {
        Self {
            broker,
            topic: topic.to_string(),
            billing,
        }
    }

    /// Enqueue one build. Returns `true` once the message reached the
    /// broker; `false` on transport failure (callers treat publishing as
    /// best-effort relative to their own transaction). Never blocks on a
    /// pipeline run.
    pub async fn queue_build(
        &self,
        tenant_id: &str,
        site_id: &str,
        build_id: Option<&str>,
        mode: BuildMode,
        priority: Option<u8>,
        trigger: &str,
        changed_products: Option<Vec<String>>,
    ) -> bool {
        let priority = match priority {
            Some(p) => p.clamp(1, 10),
            None => self.priority_for(tenant_id, trigger).await,
        };

        let request = BuildRequest {
            tenant_id: tenant_id.to_string(),
            site_id: site_id.to_string(),
            build_id: build_id.map(str::to_string),
            mode,
            trigger: trigger.to_string(),
            changed_products,
        };
        let data = match serde_json::to_value(&request) {
            Ok(data) => data,
            Err(err) => {
                warn!(?err, site_id, "failed to encode build request");
                return false;
            }
        };
        let message = QueueMessage::new(PATTERN_BUILD_QUEUED, data);

        match self.broker.publish(&self.topic, Delivery::new(message, priority)) {
            Ok(()) => {
                debug!(site_id, tenant_id, priority, trigger, "build queued");
                true
            }
            Err(err) => {
                warn!(?err, site_id, tenant_id, "failed to queue build");
                false
            }
        }
    }

    /// Resolve the priority when the caller did not pin one. Automated
    /// rebuilds never consult billing; publish triggers look up the plan
    /// tier with a free-tier fallback on any RPC failure or timeout.
    async fn priority_for(&self, tenant_id: &str, trigger: &str) -> u8 {
        if trigger == TRIGGER_CATALOG_CHANGE {
            return AUTO_REBUILD_PRIORITY;
        }
        let plan = match self.billing.get_entitlements(tenant_id).await {
            Ok(entitlements) => entitlements.plan,
            Err(err) => {
                warn!(?err, tenant_id, "entitlements lookup failed, assuming free tier");
                PlanTier::Free
            }
        };
        resolve_priority(trigger, plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_publish_outranks_everything() {
        assert_eq!(resolve_priority(TRIGGER_PUBLISH, PlanTier::Paid), 10);
        assert_eq!(resolve_priority(TRIGGER_PUBLISH, PlanTier::Free), 1);
        assert_eq!(resolve_priority(TRIGGER_PUBLISH, PlanTier::Trial), 1);
    }

    #[test]
    fn automated_rebuilds_sit_in_the_middle() {
        assert_eq!(resolve_priority(TRIGGER_CATALOG_CHANGE, PlanTier::Paid), 5);
        assert_eq!(resolve_priority(TRIGGER_CATALOG_CHANGE, PlanTier::Free), 5);
    }

    #[test]
    fn unknown_triggers_fall_back_to_default() {
        assert_eq!(resolve_priority("migration", PlanTier::Paid), 1);
    }
}
