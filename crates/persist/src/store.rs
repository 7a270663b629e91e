//! File-backed version store.
//!
//! Layout inside the store directory:
//! ```text
//! trail.meta.json               - schema version, timestamp column, changes flag
//! versions/
//!   00000001.version.cbor.zst   - one CBOR+zstd compressed version row per segment
//! integrity/
//!   manifest.json               - hash chain manifest
//! ```
//!
//! Every segment is loaded into an in-memory index on open; queries are
//! answered from the index.

use crate::memory::MemoryVersionStore;
use crate::{
    DEFAULT_TIMESTAMP_FIELD, NewVersion, StoreError, Version, VersionId, VersionQuery,
    VersionStore,
};
use retrace_common::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Current on-disk schema version.
const STORE_SCHEMA_VERSION: u32 = 1;

const META_FILE: &str = "trail.meta.json";

/// Options fixed when a store is first created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Name of the timestamp column in version rows.
    pub timestamp_field: String,
    /// Keep `object_changes` on appended versions.
    pub stores_changes: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_owned(),
            stores_changes: false,
        }
    }
}

/// Metadata stored in trail.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub timestamp_field: String,
    pub stores_changes: bool,
    pub version_count: u64,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// Integrity manifest tracking all segment hashes in a chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// Append-only version store persisted to a directory.
#[derive(Debug)]
pub struct FileVersionStore {
    root: PathBuf,
    meta: StoreMeta,
    manifest: IntegrityManifest,
    index: MemoryVersionStore,
}

impl FileVersionStore {
    /// Open or create a store at the given path.
    ///
    /// `options` are written when the store is created. On reopen the stored
    /// timestamp column must match `options.timestamp_field`, and the stored
    /// changes flag wins over `options.stores_changes`.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("versions"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join(META_FILE);
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != STORE_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: STORE_SCHEMA_VERSION,
                });
            }
            if meta.timestamp_field != options.timestamp_field {
                return Err(StoreError::TimestampFieldMismatch {
                    stored: meta.timestamp_field,
                    configured: options.timestamp_field,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta {
                schema_version: STORE_SCHEMA_VERSION,
                timestamp_field: options.timestamp_field,
                stores_changes: options.stores_changes,
                version_count: 0,
            };
            let manifest = IntegrityManifest::default();
            write_json(&meta_path, &meta)?;
            write_json(&manifest_path, &manifest)?;
            (meta, manifest)
        };

        let mut store = Self {
            root,
            meta,
            manifest,
            index: MemoryVersionStore::default(),
        };
        store.load_index()?;
        tracing::info!(
            root = %store.root.display(),
            versions = store.index.len(),
            "opened version store"
        );
        Ok(store)
    }

    /// Open a store that must already exist, with the options it was created
    /// with.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let meta_path = path.join(META_FILE);
        if !meta_path.is_file() {
            return Err(StoreError::NotAStore(path.to_path_buf()));
        }
        let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
        Self::open(
            path,
            StoreOptions {
                timestamp_field: meta.timestamp_field,
                stores_changes: meta.stores_changes,
            },
        )
    }

    /// Verify all integrity hashes in the manifest.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let mut prev_hash = None;
        for entry in &self.manifest.entries {
            self.read_segment(entry, prev_hash)?;
            prev_hash = Some(entry.sha256.as_str());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn manifest(&self) -> &IntegrityManifest {
        &self.manifest
    }

    fn segment_name(id: VersionId) -> String {
        format!("{:08}.version.cbor.zst", id.0)
    }

    /// Read a segment, checking its link to `prev_hash` and its own hash.
    fn read_segment(&self, entry: &ManifestEntry, prev_hash: Option<&str>) -> Result<Vec<u8>, StoreError> {
        if entry.prev_hash.as_deref() != prev_hash {
            tracing::warn!(segment = %entry.filename, "hash chain broken");
            return Err(StoreError::IntegrityMismatch {
                expected: prev_hash.unwrap_or("None").to_owned(),
                actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
            });
        }
        let data = std::fs::read(self.root.join("versions").join(&entry.filename))?;
        let actual = sha256_hex(&data);
        if actual != entry.sha256 {
            tracing::warn!(segment = %entry.filename, "segment hash mismatch");
            return Err(StoreError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            });
        }
        Ok(data)
    }

    fn load_index(&mut self) -> Result<(), StoreError> {
        let mut index = MemoryVersionStore::default();
        let mut prev_hash = None;
        for entry in &self.manifest.entries {
            let compressed = self.read_segment(entry, prev_hash)?;
            let row: BTreeMap<String, Value> = cbor_deserialize(&zstd_decompress(&compressed)?)?;
            index.insert_existing(Version::from_row(row, &self.meta.timestamp_field)?);
            prev_hash = Some(entry.sha256.as_str());
        }
        self.meta.version_count = index.len() as u64;
        self.index = index;
        Ok(())
    }
}

/// Write through a sibling temp file so a failed write never truncates `path`.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    std::fs::write(&temp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

impl VersionStore for FileVersionStore {
    fn append(&mut self, mut draft: NewVersion) -> Result<Version, StoreError> {
        if !self.meta.stores_changes {
            draft.object_changes = None;
        }
        let version = Version::from_new(self.index.peek_next_id(), draft);
        let filename = Self::segment_name(version.id);

        let row = version.to_row(&self.meta.timestamp_field)?;
        let compressed = zstd_compress(&cbor_serialize(&row)?)?;
        let hash = sha256_hex(&compressed);
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());

        std::fs::write(self.root.join("versions").join(&filename), &compressed)?;

        // The manifest is the commit point; in-memory state follows it.
        let meta = StoreMeta {
            version_count: version.id.0,
            ..self.meta.clone()
        };
        write_json(&self.root.join(META_FILE), &meta)?;
        let mut manifest = self.manifest.clone();
        manifest.entries.push(ManifestEntry {
            filename: filename.clone(),
            sha256: hash,
            prev_hash,
        });
        write_json(&self.root.join("integrity").join("manifest.json"), &manifest)?;

        self.meta = meta;
        self.manifest = manifest;
        self.index.insert_existing(version.clone());
        tracing::debug!(segment = %filename, event = %version.event, "appended version");
        Ok(version)
    }

    fn get(&self, id: VersionId) -> Result<Option<Version>, StoreError> {
        self.index.get(id)
    }

    fn query(&self, query: &VersionQuery) -> Result<Vec<Version>, StoreError> {
        self.index.query(query)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn stores_changes(&self) -> bool {
        self.meta.stores_changes
    }
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
