use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::retriever::RetryPolicy;

const APP_DIR: &str = "annotation-extractor";

pub fn resolve_db_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.db.clone() {
        return Ok(p);
    }
    Ok(app_home()?.join("db.lmdb"))
}

pub fn resolve_local_repo(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.local_repo.clone() {
        return Ok(p);
    }
    Ok(app_home()?.join("repository"))
}

pub fn retry_policy(cli: &Cli) -> RetryPolicy {
    RetryPolicy {
        cooldown: Duration::from_secs(cli.cooldown),
        max_attempts: cli.max_attempts,
        ..RetryPolicy::default()
    }
}

pub fn clear_db(db_path: &Path) -> Result<()> {
    remove_file_if_exists(db_path, "db")?;
    remove_file_if_exists(&lmdb_lock_path(db_path), "db lock")?;
    Ok(())
}

fn app_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join(APP_DIR))
}

fn lmdb_lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-lock");
    PathBuf::from(os)
}

fn remove_file_if_exists(path: &Path, kind: &str) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {kind} file: {}", path.display()))?;
    }
    Ok(())
}
