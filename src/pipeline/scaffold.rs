//! File-level plumbing for the pipeline: the scoped work directory, the
//! static-project scaffold and artifact packaging.

use crate::services::CatalogData;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Transient per-build directory, removed on every exit path.
pub(crate) struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub(crate) async fn create(root: &Path, build_id: &str) -> Result<Self> {
        let path = root.join(format!("build-{build_id}"));
        fs::create_dir_all(&path)
            .await
            .with_context(|| format!("failed to create work dir '{}'", path.display()))?;
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(?err, path = %self.path.display(), "failed to clean up work dir");
            }
        }
    }
}

/// Materialize the scaffolded static-site project from the merged build
/// config: config file, design-token stylesheet and one stub per page.
pub(crate) async fn generate_project(dir: &Path, config: &Value) -> Result<()> {
    fs::create_dir_all(dir.join("src/pages")).await?;
    fs::create_dir_all(dir.join("src/styles")).await?;

    fs::write(
        dir.join("site.config.json"),
        serde_json::to_vec_pretty(config).context("failed to encode merged config")?,
    )
    .await?;

    let mut css = String::from(":root {\n");
    if let Some(tokens) = config.pointer("/theme/tokens").and_then(Value::as_object) {
        for (name, value) in tokens {
            if let Some(v) = value.as_str() {
                css.push_str(&format!("  --{name}: {v};\n"));
            }
        }
    }
    css.push_str("}\n");
    fs::write(dir.join("src/styles/tokens.css"), css).await?;

    let site_name = config
        .pointer("/site/name")
        .and_then(Value::as_str)
        .unwrap_or("site");
    let pages = config
        .pointer("/revision/pages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if pages.is_empty() {
        fs::write(
            dir.join("src/pages/index.astro"),
            page_stub(site_name, "index"),
        )
        .await?;
    }
    for page in &pages {
        let slug = page
            .get("slug")
            .and_then(Value::as_str)
            .unwrap_or("index")
            .trim_matches('/');
        let slug = if slug.is_empty() { "index" } else { slug };
        // Slugs are tenant-authored; only plain path segments may reach
        // the filesystem.
        if Path::new(slug)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            bail!("page slug '{slug}' escapes the pages directory");
        }
        let title = page
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(site_name);
        let path = dir.join("src/pages").join(format!("{slug}.astro"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, page_stub(title, slug)).await?;
    }
    Ok(())
}

fn page_stub(title: &str, slug: &str) -> String {
    format!(
        "---\nimport config from \"../../site.config.json\";\nconst page = \"{slug}\";\n---\n\
         <html>\n  <head><title>{title}</title></head>\n  <body data-page={{page}}></body>\n</html>\n"
    )
}

/// Write the fetched catalog data where the toolchain expects it.
pub(crate) async fn write_catalog_data(dir: &Path, data: &CatalogData) -> Result<()> {
    let data_dir = dir.join("src/data");
    fs::create_dir_all(&data_dir).await?;
    fs::write(
        data_dir.join("products.json"),
        serde_json::to_vec(&data.products).context("failed to encode products")?,
    )
    .await?;
    fs::write(
        data_dir.join("collections.json"),
        serde_json::to_vec(&data.collections).context("failed to encode collections")?,
    )
    .await?;
    Ok(())
}

/// Package `src` into a single zip archive at `dest`. Synchronous; callers
/// run it on the blocking pool.
pub(crate) fn zip_dir(src: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::create(dest)
        .with_context(|| format!("failed to create archive '{}'", dest.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let name = rel.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut f = std::fs::File::open(entry.path())?;
            std::io::copy(&mut f, &mut writer)?;
        }
    }
    writer.finish()?;
    Ok(())
}

/// Content type for uploaded static files, by extension.
pub(crate) fn content_type_for(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str())? {
        "html" | "htm" => Some("text/html; charset=utf-8"),
        "css" => Some("text/css"),
        "js" | "mjs" => Some("application/javascript"),
        "json" => Some("application/json"),
        "svg" => Some("image/svg+xml"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "ico" => Some("image/x-icon"),
        "txt" => Some("text/plain; charset=utf-8"),
        "xml" => Some("application/xml"),
        "woff2" => Some("font/woff2"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scaffold_writes_config_tokens_and_pages() {
        let td = tempfile::tempdir().unwrap();
        let config = json!({
            "site": { "id": "s1", "name": "Corner Shop" },
            "theme": { "tokens": { "color-primary": "#223344" } },
            "revision": { "pages": [
                { "slug": "index", "title": "Home" },
                { "slug": "about", "title": "About" },
            ]},
        });
        generate_project(td.path(), &config).await.unwrap();

        assert!(td.path().join("site.config.json").exists());
        let css = std::fs::read_to_string(td.path().join("src/styles/tokens.css")).unwrap();
        assert!(css.contains("--color-primary: #223344;"));
        assert!(td.path().join("src/pages/index.astro").exists());
        assert!(td.path().join("src/pages/about.astro").exists());
    }

    #[tokio::test]
    async fn nested_page_slugs_create_parent_directories() {
        let td = tempfile::tempdir().unwrap();
        let config = json!({
            "revision": { "pages": [
                { "slug": "shop/mugs", "title": "Mugs" },
                { "slug": "/about/", "title": "About" },
            ]},
        });
        generate_project(td.path(), &config).await.unwrap();
        assert!(td.path().join("src/pages/shop/mugs.astro").exists());
        assert!(td.path().join("src/pages/about.astro").exists());
    }

    #[tokio::test]
    async fn traversing_page_slugs_are_rejected() {
        let td = tempfile::tempdir().unwrap();
        let config = json!({
            "revision": { "pages": [{ "slug": "../outside", "title": "Nope" }] },
        });
        let err = generate_project(td.path(), &config).await.unwrap_err();
        assert!(err.to_string().contains("escapes"));
        assert!(!td.path().join("src/outside.astro").exists());
    }

    #[tokio::test]
    async fn empty_revision_still_gets_an_index_page() {
        let td = tempfile::tempdir().unwrap();
        generate_project(td.path(), &json!({ "revision": {} }))
            .await
            .unwrap();
        assert!(td.path().join("src/pages/index.astro").exists());
    }

    #[tokio::test]
    async fn work_dir_is_removed_on_drop() {
        let td = tempfile::tempdir().unwrap();
        let path = {
            let work = WorkDir::create(td.path(), "b1").await.unwrap();
            tokio::fs::write(work.path().join("probe"), b"x").await.unwrap();
            work.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn zip_dir_packages_nested_files() {
        let td = tempfile::tempdir().unwrap();
        let src = td.path().join("dist");
        std::fs::create_dir_all(src.join("assets")).unwrap();
        std::fs::write(src.join("index.html"), "<html></html>").unwrap();
        std::fs::write(src.join("assets/app.js"), "console.log(1)").unwrap();

        let dest = td.path().join("site.zip");
        zip_dir(&src, &dest).unwrap();

        let archive = std::fs::File::open(&dest).unwrap();
        let mut archive = zip::ZipArchive::new(archive).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"index.html".to_string()));
        assert!(names.contains(&"assets/app.js".to_string()));
    }
}
