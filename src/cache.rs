//! Persistent cache of per-archive scan results.
//!
//! Uses LMDB (via heed). Keys are the SHA-256 of the archive bytes, values the
//! JSON-encoded descriptor set, so a re-run over an already scanned artifact
//! skips class parsing entirely, whichever coordinate the bytes came from.

use anyhow::{Context, Result};
use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions, RoTxn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::descriptor::DescriptorSet;

pub const DESCRIPTORS_DB: &str = "descriptors";

const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 4;

type StrDb = Database<Str, Str>;

#[derive(Debug, Clone)]
pub struct PersistentCache {
    env: Arc<Env>,
    db_path: PathBuf,
    descriptors: StrDb,
}

impl PersistentCache {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory: {}", parent.display())
            })?;
        }

        let env = Arc::new(open_env(&db_path)?);

        let mut wtxn = env.write_txn()?;
        let descriptors = env.create_database::<Str, Str>(&mut wtxn, Some(DESCRIPTORS_DB))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db_path,
            descriptors,
        })
    }

    pub fn get_descriptors(&self, archive_hash: &str) -> Result<Option<DescriptorSet>> {
        let rtxn = self.env.read_txn()?;
        let Some(raw) = self.descriptors.get(&rtxn, archive_hash)? else {
            return Ok(None);
        };
        let set = serde_json::from_str(raw)
            .with_context(|| format!("Failed to parse cached descriptors for {archive_hash}"))?;
        Ok(Some(set))
    }

    pub fn put_descriptors(&self, archive_hash: &str, descriptors: &DescriptorSet) -> Result<()> {
        let payload = serde_json::to_string(descriptors)?;
        let mut wtxn = self.env.write_txn()?;
        self.descriptors
            .put(&mut wtxn, archive_hash, payload.as_str())?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let rtxn = self.env.read_txn()?;
        let scanned_archives = table_len(&self.descriptors, &rtxn)?;

        let mut distinct = DescriptorSet::new();
        let mut empty_archives = 0u64;
        for item in self.descriptors.iter(&rtxn)? {
            let (_, v) = item?;
            let Ok(set) = serde_json::from_str::<DescriptorSet>(v) else {
                continue;
            };
            if set.is_empty() {
                empty_archives += 1;
            }
            distinct.absorb(set);
        }

        Ok(CacheStats {
            db_path: self.db_path.to_string_lossy().to_string(),
            scanned_archives,
            empty_archives,
            distinct_descriptors: distinct.len() as u64,
        })
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn open_env(db_path: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: We do not use NO_LOCK and keep default LMDB locking guarantees.
    // NO_SUB_DIR keeps the cache a single file at the --db path.
    unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options
            .open(db_path)
            .with_context(|| format!("Failed to create/open db env: {}", db_path.display()))
    }
}

fn table_len(db: &StrDb, rtxn: &RoTxn<'_>) -> Result<u64> {
    let mut count = 0u64;
    for item in db.iter(rtxn)? {
        let _ = item?;
        count += 1;
    }
    Ok(count)
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub db_path: String,
    pub scanned_archives: u64,
    pub empty_archives: u64,
    pub distinct_descriptors: u64,
}
