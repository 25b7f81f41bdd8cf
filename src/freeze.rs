//! Tenant freeze controller: billing-driven bulk suspension and
//! restoration of a tenant's sites.

use crate::db::{self, Pool};
use crate::events::{Event, EventBus};
use crate::services::DeployService;
use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreezeOutcome {
    pub affected: u64,
}

pub struct FreezeController {
    pool: Pool,
    deploy: Arc<dyn DeployService>,
    events: EventBus,
}

impl FreezeController {
    pub fn new(pool: Pool, deploy: Arc<dyn DeployService>, events: EventBus) -> Self {
        Self {
            pool,
            deploy,
            events,
        }
    }

    /// Freeze every active, non-frozen site of the tenant, capturing each
    /// site's prior status. Idempotent; the event fires even for zero
    /// affected sites. Maintenance toggles are best-effort.
    #[instrument(skip_all, fields(tenant_id))]
    pub async fn freeze(&self, tenant_id: &str) -> Result<FreezeOutcome> {
        let site_ids = db::freeze_tenant_sites(&self.pool, tenant_id).await?;
        let affected = site_ids.len() as u64;
        info!(tenant_id, affected, "tenant frozen");

        self.toggle_all(&site_ids, true).await;
        self.events.emit(Event::TenantFrozen {
            tenant_id: tenant_id.to_string(),
            affected,
        });
        Ok(FreezeOutcome { affected })
    }

    /// Reverse of [`freeze`]: only currently-frozen sites are restored, to
    /// their captured status (draft when none was captured).
    #[instrument(skip_all, fields(tenant_id))]
    pub async fn unfreeze(&self, tenant_id: &str) -> Result<FreezeOutcome> {
        let site_ids = db::unfreeze_tenant_sites(&self.pool, tenant_id).await?;
        let affected = site_ids.len() as u64;
        info!(tenant_id, affected, "tenant unfrozen");

        self.toggle_all(&site_ids, false).await;
        self.events.emit(Event::TenantUnfrozen {
            tenant_id: tenant_id.to_string(),
            affected,
        });
        Ok(FreezeOutcome { affected })
    }

    async fn toggle_all(&self, site_ids: &[String], enabled: bool) {
        let results = join_all(
            site_ids
                .iter()
                .map(|id| self.deploy.toggle_maintenance(id, enabled)),
        )
        .await;
        for (site_id, result) in site_ids.iter().zip(results) {
            if let Err(err) = result {
                warn!(?err, site_id = %site_id, enabled, "maintenance toggle failed");
            }
        }
    }
}
