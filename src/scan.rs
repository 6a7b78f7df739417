use anyhow::{Result, bail};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

pub const ARCHIVE_EXTENSION: &str = "jar";

/// Expands each input into archive paths: files are taken as-is, directories
/// are walked in parallel for every `*.jar` below them. The result is sorted
/// and deduplicated so repeated runs visit archives in the same order.
pub fn collect_archives(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for input in inputs {
        if input.is_dir() {
            archives.extend(scan_archives(input)?);
        } else if input.is_file() {
            archives.push(input.clone());
        } else {
            bail!("No such file or directory: {}", input.display());
        }
    }
    archives.sort();
    archives.dedup();
    Ok(archives)
}

pub fn scan_archives(base_path: &Path) -> Result<Vec<PathBuf>> {
    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(base_path)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                if path.is_file() && path.extension().is_some_and(|e| e == ARCHIVE_EXTENSION) {
                    let _ = tx.send(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    Ok(rx.iter().collect())
}
