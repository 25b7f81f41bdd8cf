//! Events-queue intake: feeds catalog change notifications into the
//! debounce aggregator and billing-driven freeze requests into the tenant
//! freeze controller. Handler failures are logged; the loop never dies on a
//! bad message.

use super::{route_for, Route};
use crate::broker::{Broker, BrokerError, Delivery};
use crate::debounce::DebounceAggregator;
use crate::freeze::FreezeController;
use crate::model::{ChangeNotification, TenantRequest};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

pub struct EventIntake {
    broker: Broker,
    queue: String,
    aggregator: Arc<DebounceAggregator>,
    freeze: Arc<FreezeController>,
}

impl EventIntake {
    pub fn new(
        broker: Broker,
        queue: &str,
        aggregator: Arc<DebounceAggregator>,
        freeze: Arc<FreezeController>,
    ) -> Self {
        Self {
            broker,
            queue: queue.to_string(),
            aggregator,
            freeze,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                popped = self.broker.pop(&self.queue) => match popped {
                    Ok(delivery) => self.dispatch(delivery).await,
                    Err(BrokerError::Closed) => break,
                    Err(err) => {
                        error!(?err, "event intake dequeue failed");
                        break;
                    }
                },
            }
        }
        debug!("event intake stopped");
    }

    async fn dispatch(&self, delivery: Delivery) {
        let pattern = delivery.message.pattern.clone();
        match route_for(&pattern) {
            Some(Route::CatalogChanged) => {
                match serde_json::from_value::<ChangeNotification>(delivery.message.data) {
                    Ok(change) => {
                        if let Err(err) = self.aggregator.notify(change).await {
                            warn!(?err, "failed to aggregate change notification");
                        }
                    }
                    Err(err) => warn!(?err, "discarding malformed change notification"),
                }
            }
            Some(Route::TenantFreeze) => {
                match serde_json::from_value::<TenantRequest>(delivery.message.data) {
                    Ok(req) => {
                        if let Err(err) = self.freeze.freeze(&req.tenant_id).await {
                            warn!(?err, tenant_id = %req.tenant_id, "freeze request failed");
                        }
                    }
                    Err(err) => warn!(?err, "discarding malformed freeze request"),
                }
            }
            Some(Route::TenantUnfreeze) => {
                match serde_json::from_value::<TenantRequest>(delivery.message.data) {
                    Ok(req) => {
                        if let Err(err) = self.freeze.unfreeze(&req.tenant_id).await {
                            warn!(?err, tenant_id = %req.tenant_id, "unfreeze request failed");
                        }
                    }
                    Err(err) => warn!(?err, "discarding malformed unfreeze request"),
                }
            }
            Some(Route::BuildQueued) | None => {
                warn!(pattern = %pattern, "unexpected pattern on events queue, discarding");
            }
        }
    }
}
