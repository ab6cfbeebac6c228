//! Build manifest: discovery, fingerprints and persistence.
//!
//! The manifest lists every discovered view and island with a content hash
//! and its source path; islands also carry the path of their client bundle.
//! It is generated once per process and then only read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::IslandsConfig;
use crate::resource::{Registry, ResourceKind};
use crate::{BuildMode, ManifestError};

pub const MANIFEST_VERSION: u32 = 2;
pub const HASH_ALGORITHM: &str = "sha256";

// ---------------------------------------------------------------------------
// Manifest types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub hash: String,
    pub path_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_bundle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: u32,
    pub hash_algorithm: String,
    pub generated_at_unix: u64,
    #[serde(default)]
    pub views: BTreeMap<String, ManifestEntry>,
    #[serde(default)]
    pub islands: BTreeMap<String, ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            hash_algorithm: HASH_ALGORITHM.to_string(),
            generated_at_unix: 0,
            views: BTreeMap::new(),
            islands: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// Equality of everything but the generation timestamp.
    pub fn same_entries(&self, other: &Manifest) -> bool {
        self.version == other.version
            && self.hash_algorithm == other.hash_algorithm
            && self.views == other.views
            && self.islands == other.islands
    }

    pub fn bundle_path(&self, island_id: &str) -> Option<&str> {
        self.islands.get(island_id)?.path_bundle.as_deref()
    }

    /// Look up any entry by its content hash.
    pub fn by_hash(&self, hash: &str) -> Option<(ResourceKind, &str, &ManifestEntry)> {
        let views = self
            .views
            .iter()
            .map(|(id, entry)| (ResourceKind::View, id, entry));
        let islands = self
            .islands
            .iter()
            .map(|(id, entry)| (ResourceKind::Island, id, entry));
        views
            .chain(islands)
            .find(|(_, _, entry)| entry.hash == hash)
            .map(|(kind, id, entry)| (kind, id.as_str(), entry))
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// A resource file read from disk and matched against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub id: String,
    pub kind: ResourceKind,
    pub path: PathBuf,
    pub contents: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    pub views: Vec<SourceFile>,
    pub islands: Vec<SourceFile>,
}

/// Walk the configured folders and keep every file whose id is registered
/// with the matching kind.
///
/// Per-file failures are logged and the file excluded; the scan never aborts.
pub async fn discover(config: &IslandsConfig, registry: &Registry) -> Discovered {
    let mut discovered = Discovered::default();
    if let Some(folder) = &config.views_folder {
        let folder = config.resolve(folder);
        discovered.views = scan_folder(&folder, ResourceKind::View, config, registry).await;
    }
    if let Some(folder) = &config.islands_folder {
        let folder = config.resolve(folder);
        discovered.islands =
            scan_folder(&folder, ResourceKind::Island, config, registry).await;
    }
    debug!(
        views = discovered.views.len(),
        islands = discovered.islands.len(),
        "resource discovery finished"
    );
    discovered
}

async fn scan_folder(
    folder: &Path,
    kind: ResourceKind,
    config: &IslandsConfig,
    registry: &Registry,
) -> Vec<SourceFile> {
    let mut found: BTreeMap<String, SourceFile> = BTreeMap::new();
    for path in walk_folder(folder, config.walk_depth, config.mode).await {
        let Some(id) = resource_id(folder, &path) else {
            continue;
        };
        if found.contains_key(&id) {
            debug!(%id, path = %path.display(), "duplicate resource id, keeping the first file");
            continue;
        }
        if registry.kind_of(&id) != Some(kind) {
            let err = ManifestError::UnknownResource {
                id,
                path: path.display().to_string(),
                kind,
            };
            warn!(error = %err, "excluding resource");
            continue;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                found.insert(
                    id.clone(),
                    SourceFile {
                        id,
                        kind,
                        path,
                        contents,
                    },
                );
            }
            Err(source) => {
                let err = ManifestError::Io {
                    path: path.display().to_string(),
                    source,
                };
                warn!(error = %err, "excluding unreadable resource");
            }
        }
    }
    found.into_values().collect()
}

/// Files under `root` with a source extension for `mode`, sorted, at most
/// `max_depth` directories deep.
async fn walk_folder(root: &Path, max_depth: usize, mode: BuildMode) -> Vec<PathBuf> {
    let extensions = mode.source_extensions();
    let mut files = Vec::new();
    let mut pending = vec![(root.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "cannot read folder");
                continue;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "cannot list folder");
                    break;
                }
            };
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                if depth + 1 < max_depth {
                    pending.push((path, depth + 1));
                }
            } else if path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.contains(&ext))
            {
                files.push(path);
            }
        }
    }

    // same stem: the extension listed first for the mode wins
    files.sort_by(|a, b| {
        a.with_extension("")
            .cmp(&b.with_extension(""))
            .then_with(|| extension_rank(a, extensions).cmp(&extension_rank(b, extensions)))
    });
    files
}

fn extension_rank(path: &Path, extensions: &[&str]) -> usize {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| extensions.iter().position(|e| *e == ext))
        .unwrap_or(usize::MAX)
}

/// `views/blog/Post.tsx` under `views` → `blog/Post`.
fn resource_id(folder: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(folder).ok()?.with_extension("");
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

// ---------------------------------------------------------------------------
// Build / persist / load
// ---------------------------------------------------------------------------

/// sha256 over `"{id}-{pathSource}-{contents}"`, hex encoded.
pub fn fingerprint(id: &str, path_source: &str, contents: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(b"-");
    hasher.update(path_source.as_bytes());
    hasher.update(b"-");
    hasher.update(contents.as_bytes());
    hex::encode(hasher.finalize())
}

/// `./`-prefixed path relative to the root folder.
fn path_source(config: &IslandsConfig, path: &Path) -> String {
    let relative = path.strip_prefix(&config.root_folder).unwrap_or(path);
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .filter(|c| *c != ".")
        .collect();
    format!("./{}", parts.join("/"))
}

pub fn bundle_path(island_id: &str) -> String {
    format!("./public/.islands/{island_id}.bundle.js")
}

pub fn build(discovered: &Discovered, config: &IslandsConfig) -> Manifest {
    let entry = |file: &SourceFile, path_bundle: Option<String>| {
        let path_source = path_source(config, &file.path);
        ManifestEntry {
            hash: fingerprint(&file.id, &path_source, &file.contents),
            path_source,
            path_bundle,
        }
    };
    Manifest {
        generated_at_unix: now_unix(),
        views: discovered
            .views
            .iter()
            .map(|file| (file.id.clone(), entry(file, None)))
            .collect(),
        islands: discovered
            .islands
            .iter()
            .map(|file| (file.id.clone(), entry(file, Some(bundle_path(&file.id)))))
            .collect(),
        ..Manifest::default()
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The file on disk already had the same entries; nothing was written.
    Unchanged,
    Written,
}

pub async fn load(path: &Path) -> Result<Manifest, ManifestError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
    Ok(serde_json::from_str(&text)?)
}

/// Write `manifest` to `path` unless the file already has the same entries.
///
/// The write goes to a sibling temp file which is then renamed over `path`.
pub async fn persist(manifest: &Manifest, path: &Path) -> Result<PersistOutcome, ManifestError> {
    if let Ok(previous) = load(path).await {
        if previous.same_entries(manifest) {
            info!(path = %path.display(), "manifest did not change");
            return Ok(PersistOutcome::Unchanged);
        }
    }

    let mut text = serde_json::to_string_pretty(manifest)?;
    text.push('\n');

    let io_err = |source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    };
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, text.as_bytes()).await.map_err(io_err)?;
    if let Err(source) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(source));
    }
    info!(path = %path.display(), "manifest written");
    Ok(PersistOutcome::Written)
}

// ---------------------------------------------------------------------------
// ManifestStore
// ---------------------------------------------------------------------------

/// Process-wide manifest. Requests read a snapshot; only startup replaces it.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    inner: Arc<RwLock<Arc<Manifest>>>,
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(manifest: Manifest, path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(manifest))),
            path: path.into(),
        }
    }

    /// Production loads the persisted manifest and falls back to generating
    /// one; development always regenerates and persists when it changed.
    pub async fn initialize(config: &IslandsConfig, registry: &Registry) -> Self {
        let path = config.manifest_path();
        if config.mode.is_prod() {
            match load(&path).await {
                Ok(manifest) => {
                    info!(path = %path.display(), "manifest loaded");
                    return Self::new(manifest, path);
                }
                Err(err) => warn!(error = %err, "cannot load manifest, generating it"),
            }
        }
        let store = Self::new(Manifest::default(), path);
        store.refresh(config, registry).await;
        store
    }

    /// Rediscover, rebuild and persist. The in-memory manifest is replaced
    /// even when persisting fails; `None` reports that failure.
    pub async fn refresh(
        &self,
        config: &IslandsConfig,
        registry: &Registry,
    ) -> Option<PersistOutcome> {
        let discovered = discover(config, registry).await;
        let manifest = build(&discovered, config);
        let outcome = match persist(&manifest, &self.path).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(error = %err, "could not generate manifest");
                None
            }
        };
        *self.inner.write().expect("manifest store poisoned") = Arc::new(manifest);
        outcome
    }

    pub fn current(&self) -> Arc<Manifest> {
        Arc::clone(&self.inner.read().expect("manifest store poisoned"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
