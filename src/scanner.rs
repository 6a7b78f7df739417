use anyhow::{Context, Result};
use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::cache::{PersistentCache, hash_bytes};
use crate::classfile::{AnnotationVisitor, visit_annotations};
use crate::descriptor::DescriptorSet;

pub const CLASS_SUFFIX: &str = ".class";

/// Result of scanning one archive.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveScan {
    pub descriptors: DescriptorSet,
    pub class_entries: usize,
    pub failed_entries: usize,
    pub cache_hit: bool,
}

/// Adds every annotation type it is shown to the archive's accumulator,
/// regardless of target or retention.
struct Collector<'a> {
    descriptors: &'a mut DescriptorSet,
}

impl AnnotationVisitor for Collector<'_> {
    fn visit_class_annotation(&mut self, descriptor: &str, _visible: bool) {
        self.descriptors.insert(descriptor);
    }

    fn visit_method_annotation(&mut self, _: &str, _: &str, descriptor: &str, _visible: bool) {
        self.descriptors.insert(descriptor);
    }

    fn visit_field_annotation(&mut self, _: &str, _: &str, descriptor: &str, _visible: bool) {
        self.descriptors.insert(descriptor);
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationScanner {
    cache: Option<PersistentCache>,
}

impl AnnotationScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(cache: PersistentCache) -> Self {
        Self { cache: Some(cache) }
    }

    /// Annotation descriptors used anywhere in the archive. An archive that
    /// cannot be opened yields an empty set; the failure is logged.
    pub fn scan(&self, archive: &Path) -> DescriptorSet {
        match self.scan_archive(archive) {
            Ok(scan) => scan.descriptors,
            Err(e) => {
                warn!(
                    archive = %archive.display(),
                    error = %format!("{e:#}"),
                    "skipping unreadable archive"
                );
                DescriptorSet::new()
            }
        }
    }

    pub fn scan_archive(&self, archive: &Path) -> Result<ArchiveScan> {
        let file = File::open(archive)
            .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
        // SAFETY: The file is opened read-only and remains valid for the lifetime of the mmap.
        // The mmap is dropped before the file, ensuring memory safety.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap archive: {}", archive.display()))?;

        let Some(cache) = self.cache.as_ref() else {
            return scan_reader(Cursor::new(&mmap[..]), archive);
        };

        let hash = hash_bytes(&mmap);
        match cache.get_descriptors(&hash) {
            Ok(Some(descriptors)) => {
                debug!(archive = %archive.display(), "scan cache hit");
                return Ok(ArchiveScan {
                    descriptors,
                    cache_hit: true,
                    ..ArchiveScan::default()
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    archive = %archive.display(),
                    error = %format!("{e:#}"),
                    "scan cache read failed"
                );
            }
        }

        let scan = scan_reader(Cursor::new(&mmap[..]), archive)?;
        if let Err(e) = cache.put_descriptors(&hash, &scan.descriptors) {
            warn!(
                archive = %archive.display(),
                error = %format!("{e:#}"),
                "scan cache write failed"
            );
        }
        Ok(scan)
    }
}

/// Walks every entry of a zip container and visits the `*.class` ones.
/// A malformed class only loses the annotations after the point of failure.
pub fn scan_reader<R: Read + Seek>(reader: R, label: &Path) -> Result<ArchiveScan> {
    let mut archive = ZipArchive::new(reader)
        .with_context(|| format!("Failed to read zip structure: {}", label.display()))?;

    let mut scan = ArchiveScan::default();
    let mut buf = Vec::new();

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    archive = %label.display(),
                    index = i,
                    error = %e,
                    "unreadable archive entry"
                );
                scan.failed_entries += 1;
                continue;
            }
        };
        if !entry.is_file() || !entry.name().ends_with(CLASS_SUFFIX) {
            continue;
        }
        scan.class_entries += 1;

        buf.clear();
        if let Err(e) = entry.read_to_end(&mut buf) {
            warn!(
                archive = %label.display(),
                entry = entry.name(),
                error = %e,
                "failed to inflate class entry"
            );
            scan.failed_entries += 1;
            continue;
        }

        let mut collector = Collector {
            descriptors: &mut scan.descriptors,
        };
        if let Err(e) = visit_annotations(&buf, &mut collector) {
            warn!(
                archive = %label.display(),
                entry = entry.name(),
                error = %e,
                "malformed class entry"
            );
            scan.failed_entries += 1;
        }
    }

    debug!(
        archive = %label.display(),
        classes = scan.class_entries,
        failed = scan.failed_entries,
        descriptors = scan.descriptors.len(),
        "archive scanned"
    );
    Ok(scan)
}
