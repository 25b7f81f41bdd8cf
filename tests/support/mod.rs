//! Shared test doubles: recording implementations of the collaborator
//! seams, in the spirit of the queue consumer's production wiring.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use siteforge::pipeline::Toolchain;
use siteforge::services::{
    BillingService, BlobStore, CatalogData, CatalogService, DeployService, Entitlements,
    FragmentPatcher, PlanTier,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub async fn setup_pool() -> sqlx::SqlitePool {
    // A single connection so every task sees the same in-memory database.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Catalog stub with one product and one collection.
#[derive(Default)]
pub struct StubCatalog;

#[async_trait]
impl CatalogService for StubCatalog {
    async fn fetch_catalog(&self, _tenant_id: &str, _site_id: &str) -> Result<CatalogData> {
        Ok(CatalogData {
            products: vec![json!({ "id": "p1", "title": "Enamel Mug" })],
            collections: vec![json!({ "id": "c1", "title": "Kitchen" })],
        })
    }
}

/// Catalog double that always fails, as if the RPC timed out.
#[derive(Default)]
pub struct FailingCatalog;

#[async_trait]
impl CatalogService for FailingCatalog {
    async fn fetch_catalog(&self, _tenant_id: &str, _site_id: &str) -> Result<CatalogData> {
        Err(anyhow!("catalog RPC timed out"))
    }
}

#[derive(Default)]
pub struct RecordingBlob {
    pub uploads: Mutex<Vec<String>>,
    pub removed_prefixes: Mutex<Vec<String>>,
    pub site_files_exist: AtomicBool,
}

impl RecordingBlob {
    pub fn with_existing_site_files() -> Self {
        let blob = Self::default();
        blob.site_files_exist.store(true, Ordering::SeqCst);
        blob
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn removed_prefixes(&self) -> Vec<String> {
        self.removed_prefixes.lock().unwrap().clone()
    }

    fn record(&self, key: &str) -> String {
        self.uploads.lock().unwrap().push(key.to_string());
        format!("http://blob.test/{key}")
    }
}

#[async_trait]
impl BlobStore for RecordingBlob {
    async fn upload_file(
        &self,
        key: &str,
        _path: &Path,
        _content_type: Option<&str>,
    ) -> Result<String> {
        Ok(self.record(key))
    }

    async fn upload_buffer(
        &self,
        key: &str,
        _bytes: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<String> {
        Ok(self.record(key))
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<()> {
        self.removed_prefixes.lock().unwrap().push(prefix.to_string());
        Ok(())
    }

    async fn remove_object(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn check_site_files(&self, _prefix: &str) -> Result<bool> {
        Ok(self.site_files_exist.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct RecordingDeploy {
    pub deploys: Mutex<Vec<String>>,
    pub toggles: Mutex<Vec<(String, bool)>>,
}

impl RecordingDeploy {
    pub fn deploys(&self) -> Vec<String> {
        self.deploys.lock().unwrap().clone()
    }

    pub fn toggles(&self) -> Vec<(String, bool)> {
        self.toggles.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeployService for RecordingDeploy {
    async fn deploy(&self, site_id: &str) -> Result<()> {
        self.deploys.lock().unwrap().push(site_id.to_string());
        Ok(())
    }

    async fn toggle_maintenance(&self, site_id: &str, enabled: bool) -> Result<()> {
        self.toggles.lock().unwrap().push((site_id.to_string(), enabled));
        Ok(())
    }
}

pub struct StaticBilling(pub PlanTier);

#[async_trait]
impl BillingService for StaticBilling {
    async fn get_entitlements(&self, _tenant_id: &str) -> Result<Entitlements> {
        Ok(Entitlements { plan: self.0 })
    }
}

/// Toolchain double that "builds" a small dist tree.
#[derive(Default)]
pub struct FakeToolchain;

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn install(&self, _project_dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn build(&self, project_dir: &Path) -> Result<PathBuf> {
        let out = project_dir.join("dist");
        tokio::fs::create_dir_all(out.join("assets")).await?;
        tokio::fs::write(out.join("index.html"), "<html></html>").await?;
        tokio::fs::write(out.join("assets/app.css"), "body{}").await?;
        Ok(out)
    }
}

/// Toolchain double whose build step always fails.
#[derive(Default)]
pub struct BrokenToolchain;

#[async_trait]
impl Toolchain for BrokenToolchain {
    async fn install(&self, _project_dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn build(&self, _project_dir: &Path) -> Result<PathBuf> {
        Err(anyhow!("toolchain exited with exit status: 1"))
    }
}

/// Toolchain double whose build step hangs far past any test window.
#[derive(Default)]
pub struct StalledToolchain;

#[async_trait]
impl Toolchain for StalledToolchain {
    async fn install(&self, _project_dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn build(&self, _project_dir: &Path) -> Result<PathBuf> {
        tokio::time::sleep(std::time::Duration::from_secs(300)).await;
        Err(anyhow!("stalled build woke up"))
    }
}

#[derive(Default)]
pub struct RecordingPatcher {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingPatcher {
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FragmentPatcher for RecordingPatcher {
    async fn patch_site(
        &self,
        _tenant_id: &str,
        site_id: &str,
        product_ids: &[String],
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((site_id.to_string(), product_ids.to_vec()));
        Ok(())
    }
}
