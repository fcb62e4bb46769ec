//! Per-session bundle directories: uploaded assets, the generated page and
//! zip packaging.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/<bundle_id>/index.html
//! <root>/<bundle_id>/assets/<sanitized name>
//! ```
//!
//! Concurrent writers to one bundle are not coordinated; the last write wins.
//! Nothing here deletes bundles. A generation without a bundle id creates its
//! directory before the upstream call, so a failed call leaves an empty
//! bundle behind; cleanup belongs to whoever manages bundle lifetimes.

use std::{
    io::{Cursor, Write},
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{fs, task};
use tracing::{debug, info};
use uuid::Uuid;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::error::ServiceError;

pub const ASSETS_DIR: &str = "assets";
pub const INDEX_FILE: &str = "index.html";

const BUNDLE_ID_LEN: usize = 12;
const MAX_FILENAME_BYTES: usize = 128;
const MAX_EXTENSION_BYTES: usize = 16;

static STORAGE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(["'(]\s*)(?:\./)?assets/"#).expect("valid regex"));

#[derive(Debug, Clone)]
pub struct BundleStore {
    root: PathBuf,
}

impl BundleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reuses `bundle_id` or mints a fresh one, creating the directories.
    pub async fn ensure(&self, bundle_id: Option<&str>) -> Result<String, ServiceError> {
        let id = match bundle_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) if is_valid_bundle_id(id) => id.to_string(),
            Some(id) => {
                return Err(ServiceError::BadRequest(format!("invalid bundle id '{id}'")));
            }
            None => new_bundle_id(),
        };

        let assets = self.bundle_dir(&id).join(ASSETS_DIR);
        if !fs::try_exists(&assets).await? {
            info!(bundle_id = %id, "creating bundle");
        }
        fs::create_dir_all(&assets).await?;
        Ok(id)
    }

    pub async fn store_asset(
        &self,
        bundle_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, ServiceError> {
        let name = sanitize_filename(filename).unwrap_or_else(generated_asset_name);
        let path = self.assets_dir(bundle_id)?.join(&name);
        fs::write(&path, bytes).await?;
        debug!(bundle_id, asset = %name, bytes = bytes.len(), "stored asset");
        Ok(name)
    }

    /// Names of the regular files in the bundle's asset directory, sorted.
    pub async fn list_assets(&self, bundle_id: &str) -> Result<Vec<String>, ServiceError> {
        let dir = self.assets_dir(bundle_id)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolves one asset for download. The filename is sanitized again so
    /// a crafted request cannot leave the asset directory.
    pub async fn asset_path(&self, bundle_id: &str, filename: &str) -> Result<PathBuf, ServiceError> {
        let not_found = || ServiceError::NotFound(format!("asset '{filename}'"));
        let name = sanitize_filename(filename).ok_or_else(not_found)?;
        let dir = self.assets_dir(bundle_id).map_err(|_| not_found())?;
        let path = dir.join(name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(not_found()),
        }
    }

    pub async fn persist(&self, bundle_id: &str, storage_html: &str) -> Result<(), ServiceError> {
        let path = self.checked_dir(bundle_id)?.join(INDEX_FILE);
        fs::write(&path, storage_html).await?;
        debug!(bundle_id, bytes = storage_html.len(), "wrote index.html");
        Ok(())
    }

    /// Zips the whole bundle directory. The archive is assembled in memory,
    /// never on disk.
    pub async fn package(&self, bundle_id: &str) -> Result<Vec<u8>, ServiceError> {
        let dir = self
            .checked_dir(bundle_id)
            .map_err(|_| ServiceError::NotFound(format!("bundle '{bundle_id}'")))?;
        if !fs::try_exists(&dir).await? {
            return Err(ServiceError::NotFound(format!("bundle '{bundle_id}'")));
        }

        task::spawn_blocking(move || zip_directory(&dir))
            .await
            .map_err(|err| ServiceError::Other(format!("packaging task failed: {err}")))?
    }

    fn bundle_dir(&self, bundle_id: &str) -> PathBuf {
        self.root.join(bundle_id)
    }

    fn checked_dir(&self, bundle_id: &str) -> Result<PathBuf, ServiceError> {
        if !is_valid_bundle_id(bundle_id) {
            return Err(ServiceError::BadRequest(format!(
                "invalid bundle id '{bundle_id}'"
            )));
        }
        Ok(self.bundle_dir(bundle_id))
    }

    fn assets_dir(&self, bundle_id: &str) -> Result<PathBuf, ServiceError> {
        Ok(self.checked_dir(bundle_id)?.join(ASSETS_DIR))
    }
}

pub fn new_bundle_id() -> String {
    Uuid::new_v4().simple().to_string()[..BUNDLE_ID_LEN].to_string()
}

pub fn is_valid_bundle_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Restricts a client-supplied name to `[A-Za-z0-9._-]` without leading
/// dots. Returns `None` when nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(truncate_filename(cleaned))
    }
}

/// Caps a sanitized (pure ASCII) name at `MAX_FILENAME_BYTES`, keeping a
/// short extension intact.
fn truncate_filename(name: &str) -> String {
    if name.len() <= MAX_FILENAME_BYTES {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_EXTENSION_BYTES => {
            let ext = &name[dot..];
            format!("{}{ext}", &name[..MAX_FILENAME_BYTES - ext.len()])
        }
        _ => name[..MAX_FILENAME_BYTES].to_string(),
    }
}

fn generated_asset_name() -> String {
    format!("asset_{}", &Uuid::new_v4().simple().to_string()[..BUNDLE_ID_LEN])
}

/// Prefixes bare references to known assets with `assets/`. Only names
/// directly bounded by a quote or parenthesis are touched, which covers
/// `src="x"`, `href='x'` and `url(x)` without parsing the document.
pub fn rewrite_for_storage(html: &str, asset_names: &[String]) -> String {
    let mut out = html.to_string();
    for name in asset_names {
        let pattern = format!(r#"(["'(]\s*)(?:\./)?{}(\s*[)"'])"#, regex::escape(name));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        let replacement = format!("${{1}}{ASSETS_DIR}/{name}${{2}}");
        out = re.replace_all(&out, replacement.as_str()).into_owned();
    }
    out
}

/// Points `assets/...` references at the live asset route of `bundle_id`.
pub fn rewrite_for_preview(html: &str, bundle_id: &str) -> String {
    let replacement = format!("${{1}}/bundles/{bundle_id}/{ASSETS_DIR}/");
    STORAGE_REF
        .replace_all(html, replacement.as_str())
        .into_owned()
}

fn zip_directory(dir: &Path) -> Result<Vec<u8>, ServiceError> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for relative in files {
        let entry_name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = std::fs::read(dir.join(&relative))?;
        writer.start_file(entry_name, options)?;
        writer.write_all(&bytes)?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ServiceError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(base, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(relative) = path.strip_prefix(base) {
                out.push(relative.to_path_buf());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn store() -> (tempfile::TempDir, BundleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BundleStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn sanitizes_traversal_attempts() {
        let name = sanitize_filename("../../etc/passwd").unwrap();
        assert!(!name.contains('/'));
        assert!(!name.contains('\\'));
        assert!(!name.starts_with('.'));
        assert_eq!(name, "etcpasswd");
    }

    #[test]
    fn sanitizes_spaces_and_odd_characters() {
        assert_eq!(sanitize_filename("my logo (1).png").unwrap(), "my_logo_1.png");
        assert_eq!(sanitize_filename("..\\..\\win.ini").unwrap(), "win.ini");
        assert_eq!(sanitize_filename("ümlaut.jpg").unwrap(), "mlaut.jpg");
        assert!(sanitize_filename("../..").is_none());
        assert!(sanitize_filename("").is_none());
    }

    #[test]
    fn bundle_ids_are_short_and_valid() {
        let id = new_bundle_id();
        assert_eq!(id.len(), BUNDLE_ID_LEN);
        assert!(is_valid_bundle_id(&id));
        assert!(!is_valid_bundle_id("../x"));
        assert!(!is_valid_bundle_id(""));
    }

    #[tokio::test]
    async fn ensure_is_idempotent_and_rejects_bad_ids() {
        let (_dir, store) = store();
        let id = store.ensure(None).await.unwrap();
        assert!(store.root().join(&id).join(ASSETS_DIR).is_dir());
        assert_eq!(store.ensure(Some(id.as_str())).await.unwrap(), id);
        assert!(matches!(
            store.ensure(Some("../escape")).await,
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn stores_and_lists_assets_in_order() {
        let (_dir, store) = store();
        let id = store.ensure(Some("b1")).await.unwrap();
        store.store_asset(&id, "zeta.png", b"z").await.unwrap();
        store.store_asset(&id, "alpha.jpg", b"a").await.unwrap();
        let stored = store.store_asset(&id, "../../etc/passwd", b"p").await.unwrap();
        assert_eq!(stored, "etcpasswd");

        // overwrite keeps a single entry
        store.store_asset(&id, "alpha.jpg", b"a2").await.unwrap();

        let names = store.list_assets(&id).await.unwrap();
        assert_eq!(names, vec!["alpha.jpg", "etcpasswd", "zeta.png"]);
        let bytes = std::fs::read(store.root().join("b1/assets/alpha.jpg")).unwrap();
        assert_eq!(bytes, b"a2");
    }

    #[test]
    fn long_names_are_capped_and_keep_extension() {
        let name = sanitize_filename(&format!("{}.png", "a".repeat(300))).unwrap();
        assert_eq!(name.len(), MAX_FILENAME_BYTES);
        assert!(name.ends_with(".png"));

        let name = sanitize_filename(&"b".repeat(300)).unwrap();
        assert_eq!(name, "b".repeat(MAX_FILENAME_BYTES));

        // an overlong "extension" is not worth keeping
        let name = sanitize_filename(&format!("x.{}", "c".repeat(300))).unwrap();
        assert_eq!(name.len(), MAX_FILENAME_BYTES);
        assert!(name.starts_with("x.c"));
    }

    #[tokio::test]
    async fn long_upload_name_is_stored() {
        let (_dir, store) = store();
        let id = store.ensure(None).await.unwrap();
        let raw = format!("{}.png", "a".repeat(300));
        let name = store.store_asset(&id, &raw, b"x").await.unwrap();
        assert!(name.len() <= MAX_FILENAME_BYTES);
        assert_eq!(store.list_assets(&id).await.unwrap(), vec![name.clone()]);
        assert!(store.asset_path(&id, &raw).await.is_ok());
    }

    #[tokio::test]
    async fn empty_sanitized_name_gets_generated_name() {
        let (_dir, store) = store();
        let id = store.ensure(None).await.unwrap();
        let name = store.store_asset(&id, "...", b"x").await.unwrap();
        assert!(name.starts_with("asset_"));
        assert_eq!(store.list_assets(&id).await.unwrap(), vec![name]);
    }

    #[tokio::test]
    async fn list_of_unknown_bundle_is_empty() {
        let (_dir, store) = store();
        assert!(store.list_assets("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn asset_lookup_resanitizes() {
        let (_dir, store) = store();
        let id = store.ensure(Some("b1")).await.unwrap();
        store.store_asset(&id, "logo.jpg", b"img").await.unwrap();
        assert!(store.asset_path(&id, "logo.jpg").await.is_ok());
        assert!(matches!(
            store.asset_path(&id, "../index.html").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            store.asset_path(&id, "missing.png").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn storage_rewrite_targets_delimited_references() {
        let html = r#"<img src="logo.jpg"><a href='./logo.jpg'>x</a>
<div style="background:url(logo.jpg)"></div><p>logo.jpg in text</p>"#;
        let out = rewrite_for_storage(html, &["logo.jpg".to_string()]);
        assert!(out.contains(r#"src="assets/logo.jpg""#));
        assert!(out.contains("href='assets/logo.jpg'"));
        assert!(out.contains("url(assets/logo.jpg)"));
        assert!(out.contains("<p>logo.jpg in text</p>"));
    }

    #[test]
    fn storage_rewrite_does_not_touch_longer_names() {
        let html = r#"<img src="big-logo.jpg"><img src="logo.jpg.bak">"#;
        let out = rewrite_for_storage(html, &["logo.jpg".to_string()]);
        assert_eq!(out, html);
    }

    #[test]
    fn preview_round_trip_never_double_prefixes() {
        let names = vec!["logo.jpg".to_string()];
        let html = r#"<img src="logo.jpg"><div style="background:url('logo.jpg')"></div>"#;

        let storage = rewrite_for_storage(html, &names);
        assert!(!storage.contains("assets/assets/"));
        assert_eq!(rewrite_for_storage(&storage, &names), storage);

        let preview = rewrite_for_preview(&storage, "b1");
        assert!(preview.contains(r#"src="/bundles/b1/assets/logo.jpg""#));
        assert!(preview.contains("url('/bundles/b1/assets/logo.jpg')"));

        let again = rewrite_for_storage(&preview, &names);
        assert_eq!(again, preview);
        assert!(!again.contains("assets/assets/"));
        assert_eq!(rewrite_for_preview(&preview, "b1"), preview);
    }

    #[tokio::test]
    async fn persist_overwrites_index() {
        let (_dir, store) = store();
        let id = store.ensure(None).await.unwrap();
        store.persist(&id, "<html>one</html>").await.unwrap();
        store.persist(&id, "<html>two</html>").await.unwrap();
        let written = std::fs::read_to_string(store.root().join(&id).join(INDEX_FILE)).unwrap();
        assert_eq!(written, "<html>two</html>");
    }

    #[tokio::test]
    async fn package_contains_exactly_the_bundle_files() {
        let (_dir, store) = store();
        let id = store.ensure(None).await.unwrap();
        store.store_asset(&id, "logo.jpg", b"jpg-bytes").await.unwrap();
        store.store_asset(&id, "hero.png", b"png-bytes").await.unwrap();
        store.persist(&id, "<html></html>").await.unwrap();

        let bytes = store.package(&id).await.unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: BTreeSet<String> = archive.file_names().map(str::to_string).collect();
        let expected: BTreeSet<String> = ["index.html", "assets/logo.jpg", "assets/hero.png"]
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(names, expected);

        let mut content = String::new();
        std::io::Read::read_to_string(&mut archive.by_name("index.html").unwrap(), &mut content)
            .unwrap();
        assert_eq!(content, "<html></html>");
    }

    #[tokio::test]
    async fn package_of_missing_bundle_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.package("does-not-exist").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            store.package("../etc").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
