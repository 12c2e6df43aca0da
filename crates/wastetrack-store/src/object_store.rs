//! Object storage backends
//!
//! Keys are `/`-separated paths such as `raw/2019/01/01/00/<name>`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use wastetrack_domain::repository::ObjectStore;
use wastetrack_types::{Error, ObjectMeta, Result};

const PARTIAL_SUFFIX: &str = ".partial";

/// Guards older than this were left behind by a crashed writer
const SWAP_GUARD_STALE: Duration = Duration::from_secs(30);

fn validate_key(key: &str) -> Result<()> {
    let bad_segment = key
        .split('/')
        .any(|s| s.is_empty() || s == "." || s == "..");
    if key.is_empty() || bad_segment || key.contains('\\') || key.ends_with(PARTIAL_SUFFIX) {
        return Err(Error::InvalidInput(format!("invalid object key '{key}'")));
    }
    Ok(())
}

/// Objects stored as files under a root directory
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, s| p.join(s)))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

/// Sibling of `path` that listings never show
fn hidden_sibling(path: &Path, tag: &str) -> PathBuf {
    path.with_file_name(format!(
        "{}.{}{}",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        tag,
        PARTIAL_SUFFIX
    ))
}

/// Write beside the target and rename so readers never see a torn object
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let partial = hidden_sibling(path, &Uuid::new_v4().simple().to_string());
    fs::write(&partial, data)?;
    fs::rename(&partial, path)?;
    Ok(())
}

/// Marker file serialising conditional replaces of one object
struct SwapGuard {
    path: PathBuf,
}

impl SwapGuard {
    /// `None` when another replace of the same object is in progress
    fn take(target: &Path) -> Result<Option<Self>> {
        let path = hidden_sibling(target, "swap");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Some(Self { path })),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let stale = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok())
                    .is_some_and(|age| age > SWAP_GUARD_STALE);
                if stale {
                    warn!(guard = %path.display(), "clearing abandoned swap guard");
                    match fs::remove_file(&path) {
                        Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                        _ => {}
                    }
                }
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for SwapGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(guard = %self.path.display(), error = %e, "failed to remove swap guard");
        }
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, data)?;
        debug!(key, bytes = data.len(), "object written");
        Ok(())
    }

    fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Link a complete file into place; linking never overwrites
        let partial = hidden_sibling(&path, &Uuid::new_v4().simple().to_string());
        fs::write(&partial, data)?;
        let linked = fs::hard_link(&partial, &path);
        fs::remove_file(&partial)?;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn replace_if_matches(
        &self,
        key: &str,
        expected: &[u8],
        data: Option<&[u8]>,
    ) -> Result<bool> {
        let path = self.path_for(key)?;
        let Some(_guard) = SwapGuard::take(&path)? else {
            return Ok(false);
        };
        match fs::read(&path) {
            Ok(current) if current == expected => {}
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        match data {
            Some(data) => write_atomic(&path, data)?,
            None => fs::remove_file(&path)?,
        }
        debug!(key, replaced = data.is_some(), "object swapped");
        Ok(true)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::ObjectNotFound(key.to_string()),
            _ => e.into(),
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| Error::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = self.key_for(entry.path()) else {
                continue;
            };
            if key.ends_with(PARTIAL_SUFFIX) || !key.starts_with(prefix) {
                continue;
            }
            let size = entry
                .metadata()
                .map_err(|e| Error::Storage(e.to_string()))?
                .len();
            objects.push(ObjectMeta { key, size });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

/// In-process object store, for tests and dry runs
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.objects.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
        validate_key(key)?;
        let mut objects = self.objects.write();
        if objects.contains_key(key) {
            return Ok(false);
        }
        objects.insert(key.to_string(), data.to_vec());
        Ok(true)
    }

    fn replace_if_matches(
        &self,
        key: &str,
        expected: &[u8],
        data: Option<&[u8]>,
    ) -> Result<bool> {
        validate_key(key)?;
        let mut objects = self.objects.write();
        if objects.get(key).map(Vec::as_slice) != Some(expected) {
            return Ok(false);
        }
        match data {
            Some(data) => objects.insert(key.to_string(), data.to_vec()),
            None => objects.remove(key),
        };
        Ok(true)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectMeta {
                key: k.clone(),
                size: v.len() as u64,
            })
            .collect())
    }
}
