//! Build queue consumer: bounded-concurrency dequeue loop, payload
//! validation, pipeline invocation and retry/dead-letter routing.

use super::retry::{dead_letter_queue, retry_count, tier_queue, RetryPolicy};
use super::{route_for, Route};
use crate::broker::{Broker, BrokerError, Delivery};
use crate::db::{self, Pool};
use crate::model::{BuildRequest, SiteStatus};
use crate::pipeline::{Executor, StageFailure};
use crate::services::ConfigurationError;
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

pub struct Consumer {
    broker: Broker,
    topic: String,
    prefetch: usize,
    pool: Pool,
    executor: Arc<Executor>,
    policy: RetryPolicy,
}

impl Consumer {
    pub fn new(
        broker: Broker,
        topic: &str,
        prefetch: usize,
        pool: Pool,
        executor: Arc<Executor>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            broker,
            topic: topic.to_string(),
            prefetch,
            pool,
            executor,
            policy,
        }
    }

    /// Consume until shutdown. A prefetch permit is taken before each
    /// dequeue, so at most `prefetch` pipelines are in flight; handlers for
    /// different messages run concurrently on their own tasks.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let permits = Arc::new(Semaphore::new(self.prefetch));
        loop {
            // The permit wait races the stop signal too: with every slot
            // held by an in-flight pipeline, shutdown must not sit behind
            // a build that may run for minutes.
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                acquired = permits.clone().acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            tokio::select! {
                _ = shutdown.recv() => break,
                popped = self.broker.pop(&self.topic) => match popped {
                    Ok(delivery) => {
                        let consumer = self.clone();
                        tokio::spawn(async move {
                            consumer.handle(delivery).await;
                            drop(permit);
                        });
                    }
                    Err(BrokerError::Closed) => break,
                    Err(err) => {
                        error!(?err, "consumer dequeue failed");
                        break;
                    }
                },
            }
        }
        debug!("build consumer stopped");
    }

    pub async fn handle(&self, delivery: Delivery) {
        // Malformed messages are a permanent validation error: acknowledge
        // and discard, never retry.
        if route_for(&delivery.message.pattern) != Some(Route::BuildQueued) {
            warn!(pattern = %delivery.message.pattern, "unexpected pattern on build queue, discarding");
            return;
        }
        let request: BuildRequest = match serde_json::from_value(delivery.message.data.clone()) {
            Ok(request) => request,
            Err(err) => {
                warn!(?err, "discarding malformed build message");
                return;
            }
        };
        if request.tenant_id.trim().is_empty() || request.site_id.trim().is_empty() {
            warn!("discarding build message without tenant/site id");
            return;
        }

        if let Err(err) = self.process(&request, &delivery).await {
            self.route_failure(&delivery, &request, err).await;
        }
    }

    async fn process(&self, request: &BuildRequest, delivery: &Delivery) -> Result<()> {
        let site = db::get_site(&self.pool, &request.site_id).await?;
        let Some(site) = site else {
            warn!(site_id = %request.site_id, "site missing or deleted, discarding build");
            return Ok(());
        };
        if matches!(site.status, SiteStatus::Frozen | SiteStatus::Archived) {
            info!(site_id = %site.id, status = site.status.as_str(), "site not eligible, skipping build");
            return Ok(());
        }

        let attempts = retry_count(&delivery.deaths);
        let build_id = self.resolve_build_id(request).await?;
        if !db::mark_job_running(&self.pool, &build_id).await? {
            bail!("job '{build_id}' could not transition to running");
        }
        db::set_job_retry_count(&self.pool, &build_id, attempts).await?;

        match self
            .executor
            .run(&request.tenant_id, &request.site_id, &build_id, request.mode)
            .await
        {
            Ok(outcome) => {
                info!(build_id, site_id = %request.site_id, artifact_url = %outcome.artifact_url,
                    "build succeeded");
                Ok(())
            }
            Err(failure) => {
                let stage = failure.stage;
                let text = failure.to_string();
                if let Err(err) =
                    db::mark_job_failed(&self.pool, &build_id, Some(stage), &text).await
                {
                    warn!(?err, build_id, "failed to record build failure");
                }
                Err(anyhow::Error::new(failure))
            }
        }
    }

    /// Reuse the caller-named job row only while it is still awaiting its
    /// first attempt; otherwise every attempt gets its own row.
    async fn resolve_build_id(&self, request: &BuildRequest) -> Result<String> {
        if let Some(id) = &request.build_id {
            if db::job_is_pending(&self.pool, id).await? {
                return Ok(id.clone());
            }
            debug!(build_id = %id, "named job not pending, creating a fresh attempt");
        }
        db::create_build_job(
            &self.pool,
            &request.tenant_id,
            &request.site_id,
            request.mode,
            &request.trigger,
        )
        .await
    }

    /// Failure routing: configuration errors go straight to the dead-letter
    /// queue; anything else walks the tier table until the budget runs out.
    /// The original payload is republished unchanged; the broker's TTL
    /// expiry maintains the redelivery history.
    async fn route_failure(&self, delivery: &Delivery, request: &BuildRequest, err: anyhow::Error) {
        let attempts = retry_count(&delivery.deaths);
        let tier = if is_configuration_error(&err) {
            None
        } else {
            self.policy.next_tier(attempts)
        };

        match tier {
            Some(tier) => {
                let queue = tier_queue(&self.topic, tier);
                warn!(site_id = %request.site_id, attempts, queue = %queue, %err,
                    "build failed, scheduling retry");
                if let Err(publish_err) = self.broker.publish_delayed(
                    &queue,
                    delivery.clone(),
                    tier.delay,
                    &self.topic,
                ) {
                    error!(?publish_err, site_id = %request.site_id, "failed to publish retry");
                }
            }
            None => {
                let queue = dead_letter_queue(&self.topic);
                error!(site_id = %request.site_id, attempts, %err,
                    "build failed terminally, dead-lettering");
                let mut dead = delivery.clone();
                dead.headers
                    .insert("x-final-error".to_string(), err.to_string());
                if let Err(publish_err) = self.broker.publish(&queue, dead) {
                    error!(?publish_err, site_id = %request.site_id, "failed to dead-letter message");
                }
            }
        }
    }
}

/// True when a [`ConfigurationError`] appears anywhere in the failure
/// chain, including inside a [`StageFailure`] cause.
fn is_configuration_error(err: &anyhow::Error) -> bool {
    if let Some(failure) = err.downcast_ref::<StageFailure>() {
        return failure
            .cause
            .chain()
            .any(|c| c.downcast_ref::<ConfigurationError>().is_some());
    }
    err.chain()
        .any(|c| c.downcast_ref::<ConfigurationError>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BuildStage;
    use anyhow::anyhow;

    #[test]
    fn configuration_errors_are_detected_through_stage_failures() {
        let cause = anyhow::Error::new(ConfigurationError("missing storage token".into()));
        let failure = StageFailure {
            stage: BuildStage::Upload,
            cause,
        };
        assert!(is_configuration_error(&anyhow::Error::new(failure)));

        let plain = anyhow!("network flake");
        assert!(!is_configuration_error(&plain));

        let wrapped = anyhow::Error::new(ConfigurationError("no endpoint".into()))
            .context("building client");
        assert!(is_configuration_error(&wrapped));
    }
}
