//! Production RPC clients. One `reqwest` client per collaborator, built at
//! startup; every call carries an explicit timeout so a slow dependency can
//! never pin a pipeline slot indefinitely.

use super::model::{CatalogData, Entitlements};
use super::{BillingService, BlobStore, CatalogService, ConfigurationError, DeployService};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

const USER_AGENT: &str = "siteforge/0.1";

fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build HTTP client")
}

fn parse_base_url(raw: &str, what: &str) -> Result<Url> {
    if raw.trim().is_empty() {
        return Err(ConfigurationError(format!("{what} endpoint is not configured")).into());
    }
    let mut normalized = raw.trim_end_matches('/').to_string();
    normalized.push('/');
    Url::parse(&normalized)
        .map_err(|e| ConfigurationError(format!("invalid {what} endpoint '{raw}': {e}")).into())
}

#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    http: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpCatalogClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            base_url: parse_base_url(base_url, "catalog")?,
            timeout,
        })
    }
}

#[async_trait]
impl CatalogService for HttpCatalogClient {
    async fn fetch_catalog(&self, tenant_id: &str, site_id: &str) -> Result<CatalogData> {
        let endpoint = self
            .base_url
            .join(&format!("tenants/{tenant_id}/sites/{site_id}/catalog"))
            .context("invalid catalog URL")?;
        let resp = self
            .http
            .get(endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .context("catalog RPC failed")?
            .error_for_status()
            .context("catalog RPC returned an error status")?;
        let data = resp
            .json::<CatalogData>()
            .await
            .context("catalog RPC returned malformed JSON")?;
        Ok(data)
    }
}

#[derive(Debug, Clone)]
pub struct HttpBillingClient {
    http: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpBillingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            base_url: parse_base_url(base_url, "billing")?,
            timeout,
        })
    }
}

#[async_trait]
impl BillingService for HttpBillingClient {
    async fn get_entitlements(&self, tenant_id: &str) -> Result<Entitlements> {
        let endpoint = self
            .base_url
            .join(&format!("tenants/{tenant_id}/entitlements"))
            .context("invalid billing URL")?;
        let resp = self
            .http
            .get(endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .context("billing RPC failed")?
            .error_for_status()
            .context("billing RPC returned an error status")?;
        Ok(resp
            .json::<Entitlements>()
            .await
            .context("billing RPC returned malformed JSON")?)
    }
}

#[derive(Debug, Clone)]
pub struct HttpDeployClient {
    http: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpDeployClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            base_url: parse_base_url(base_url, "deploy")?,
            timeout,
        })
    }
}

#[async_trait]
impl DeployService for HttpDeployClient {
    async fn deploy(&self, site_id: &str) -> Result<()> {
        let endpoint = self
            .base_url
            .join(&format!("sites/{site_id}/deploy"))
            .context("invalid deploy URL")?;
        self.http
            .post(endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .context("deploy RPC failed")?
            .error_for_status()
            .context("deploy RPC returned an error status")?;
        Ok(())
    }

    async fn toggle_maintenance(&self, site_id: &str, enabled: bool) -> Result<()> {
        let endpoint = self
            .base_url
            .join(&format!("sites/{site_id}/maintenance"))
            .context("invalid deploy URL")?;
        self.http
            .post(endpoint)
            .timeout(self.timeout)
            .json(&json!({ "enabled": enabled }))
            .send()
            .await
            .context("maintenance RPC failed")?
            .error_for_status()
            .context("maintenance RPC returned an error status")?;
        Ok(())
    }
}

/// REST gateway in front of the blob store. Objects live under
/// `{endpoint}/{bucket}/{key}` which doubles as their public URL.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    http: Client,
    base_url: Url,
    bucket: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    count: u64,
}

impl HttpBlobStore {
    pub fn new(endpoint: &str, bucket: &str, timeout: Duration) -> Result<Self> {
        if bucket.trim().is_empty() {
            return Err(ConfigurationError("storage bucket is not configured".into()).into());
        }
        Ok(Self {
            http: build_client()?,
            base_url: parse_base_url(endpoint, "storage")?,
            bucket: bucket.to_string(),
            timeout,
        })
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{}/{}", self.bucket, key))
            .context("invalid storage object URL")
    }

    async fn put_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<String> {
        let url = self.object_url(key)?;
        let mut req = self.http.put(url.clone()).timeout(self.timeout).body(bytes);
        if let Some(ct) = content_type {
            req = req.header(reqwest::header::CONTENT_TYPE, ct);
        }
        req.send()
            .await
            .with_context(|| format!("upload of '{key}' failed"))?
            .error_for_status()
            .with_context(|| format!("upload of '{key}' was rejected"))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<&str>,
    ) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        self.put_bytes(key, bytes, content_type).await
    }

    async fn upload_buffer(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<String> {
        self.put_bytes(key, bytes, content_type).await
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<()> {
        let mut url = self.object_url("")?;
        url.set_query(Some(&format!("prefix={prefix}")));
        self.http
            .delete(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("prefix removal '{prefix}' failed"))?
            .error_for_status()
            .with_context(|| format!("prefix removal '{prefix}' was rejected"))?;
        Ok(())
    }

    async fn remove_object(&self, key: &str) -> Result<()> {
        let url = self.object_url(key)?;
        self.http
            .delete(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("removal of '{key}' failed"))?
            .error_for_status()
            .with_context(|| format!("removal of '{key}' was rejected"))?;
        Ok(())
    }

    async fn check_site_files(&self, prefix: &str) -> Result<bool> {
        let mut url = self.object_url("")?;
        url.set_query(Some(&format!("prefix={prefix}")));
        let resp = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("listing under '{prefix}' failed"))?
            .error_for_status()
            .with_context(|| format!("listing under '{prefix}' was rejected"))?;
        let list = resp
            .json::<ListResponse>()
            .await
            .context("storage listing returned malformed JSON")?;
        Ok(list.count > 0)
    }
}
