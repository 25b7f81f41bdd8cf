//! Debounce aggregator: collapses bursts of upstream change notifications
//! into one rebuild (or one fragment patch) per site.
//!
//! The registry owns its state: two mutex-guarded maps keyed by site id,
//! one per flush action, each entry holding the accumulated product ids and
//! the abort handle of its pending timer. A new event for a pending site
//! extends the set and resets the timer; the quiet window elapsing flushes
//! exactly once. Entries are generation-checked so a flush racing a reset
//! can never fire twice or drop accumulated changes. Shutdown aborts every
//! pending timer.
//!
//! Ineligible sites (frozen, draft, archived, deleted) are filtered before
//! they enter a map, not at flush time.

use crate::db::{self, Pool};
use crate::model::{BuildMode, ChangeNotification, TRIGGER_CATALOG_CHANGE};
use crate::queue::Publisher;
use crate::services::FragmentPatcher;
use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DebounceSettings {
    /// Quiet window before a full rebuild is queued.
    pub rebuild_window: Duration,
    /// Shorter quiet window for sites with fragment-patch support.
    pub patch_window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushKind {
    Rebuild,
    Patch,
}

struct PendingEntry {
    tenant_id: String,
    product_ids: BTreeSet<String>,
    generation: u64,
    timer: Option<AbortHandle>,
}

struct Inner {
    pool: Pool,
    publisher: Publisher,
    patcher: Arc<dyn FragmentPatcher>,
    settings: DebounceSettings,
    rebuilds: Mutex<HashMap<String, PendingEntry>>,
    patches: Mutex<HashMap<String, PendingEntry>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl Inner {
    fn map_for(&self, kind: FlushKind) -> &Mutex<HashMap<String, PendingEntry>> {
        match kind {
            FlushKind::Rebuild => &self.rebuilds,
            FlushKind::Patch => &self.patches,
        }
    }

    /// Remove and return the entry iff the firing timer is still current.
    fn take_if_current(&self, kind: FlushKind, site_id: &str, generation: u64)
        -> Option<PendingEntry>
    {
        let mut map = self.map_for(kind).lock().expect("debounce map lock");
        match map.get(site_id) {
            Some(entry) if entry.generation == generation => map.remove(site_id),
            _ => None,
        }
    }

    async fn flush(self: Arc<Self>, kind: FlushKind, site_id: String, generation: u64) {
        let Some(entry) = self.take_if_current(kind, &site_id, generation) else {
            return;
        };
        let product_ids: Vec<String> = entry.product_ids.into_iter().collect();
        debug!(site_id = %site_id, changes = product_ids.len(), ?kind, "debounce window closed");

        match kind {
            FlushKind::Rebuild => {
                let queued = self
                    .publisher
                    .queue_build(
                        &entry.tenant_id,
                        &site_id,
                        None,
                        BuildMode::Production,
                        None,
                        TRIGGER_CATALOG_CHANGE,
                        Some(product_ids),
                    )
                    .await;
                if !queued {
                    warn!(site_id = %site_id, "debounced rebuild could not be queued");
                }
            }
            FlushKind::Patch => {
                if let Err(err) = self
                    .patcher
                    .patch_site(&entry.tenant_id, &site_id, &product_ids)
                    .await
                {
                    warn!(?err, site_id = %site_id, "fragment patch failed");
                }
            }
        }
    }
}

pub struct DebounceAggregator {
    inner: Arc<Inner>,
}

impl DebounceAggregator {
    pub fn new(
        pool: Pool,
        publisher: Publisher,
        patcher: Arc<dyn FragmentPatcher>,
        settings: DebounceSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                publisher,
                patcher,
                settings,
                rebuilds: Mutex::new(HashMap::new()),
                patches: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Fold one change notification into the registry: every published site
    /// of the tenant accumulates the product ids and gets its window reset.
    pub async fn notify(&self, change: ChangeNotification) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let sites = db::list_published_sites(&self.inner.pool, &change.tenant_id).await?;
        for site in sites {
            let kind = if site.supports_fragment_patch {
                FlushKind::Patch
            } else {
                FlushKind::Rebuild
            };
            self.accumulate(kind, &site.id, &site.tenant_id, &change.product_ids);
        }
        Ok(())
    }

    fn accumulate(&self, kind: FlushKind, site_id: &str, tenant_id: &str, product_ids: &[String]) {
        let window = match kind {
            FlushKind::Rebuild => self.inner.settings.rebuild_window,
            FlushKind::Patch => self.inner.settings.patch_window,
        };
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        let mut map = self.inner.map_for(kind).lock().expect("debounce map lock");
        let entry = map.entry(site_id.to_string()).or_insert_with(|| PendingEntry {
            tenant_id: tenant_id.to_string(),
            product_ids: BTreeSet::new(),
            generation,
            timer: None,
        });
        entry.product_ids.extend(product_ids.iter().cloned());
        entry.generation = generation;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }

        let inner = self.inner.clone();
        let site = site_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            inner.flush(kind, site, generation).await;
        });
        entry.timer = Some(handle.abort_handle());
    }

    /// Abort every pending timer and drop all entries. Safe to call more
    /// than once; notifications arriving afterwards are ignored.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for map in [&self.inner.rebuilds, &self.inner.patches] {
            let mut map = map.lock().expect("debounce map lock");
            for (_, entry) in map.drain() {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
            }
        }
    }

    /// Number of sites currently accumulating, across both maps.
    pub fn pending(&self) -> usize {
        let rebuilds = self.inner.rebuilds.lock().expect("debounce map lock").len();
        let patches = self.inner.patches.lock().expect("debounce map lock").len();
        rebuilds + patches
    }
}

impl Drop for DebounceAggregator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
