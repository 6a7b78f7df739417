use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{info, warn};

use crate::coordinate::PackageId;
use crate::descriptor::DescriptorSet;
use crate::repository::RemoteRepository;
use crate::retriever::ArtifactRetriever;
use crate::scanner::AnnotationScanner;
use crate::shutdown::Shutdown;
use crate::source::PackageSource;

#[derive(Debug, Default, Serialize)]
pub struct PipelineReport {
    pub packages: usize,
    pub resolved: usize,
    pub downloaded: usize,
    pub duration_ms: u64,
    pub descriptors: DescriptorSet,
}

#[derive(Default)]
struct Progress {
    resolved: AtomicUsize,
    downloaded: AtomicUsize,
}

/// Top packages in, distinct annotation descriptors out.
pub struct Pipeline<S, R> {
    source: S,
    retriever: ArtifactRetriever<R>,
    scanner: AnnotationScanner,
    shutdown: Shutdown,
    jobs: usize,
}

impl<S: PackageSource, R: RemoteRepository> Pipeline<S, R> {
    pub fn new(
        source: S,
        retriever: ArtifactRetriever<R>,
        scanner: AnnotationScanner,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            source,
            retriever,
            scanner,
            shutdown,
            jobs: 1,
        }
    }

    /// Number of packages processed concurrently. They all share the
    /// retriever's rate limiter.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn run(&self, top: usize) -> Result<PipelineReport> {
        let start = Instant::now();
        self.shutdown.check()?;
        let packages = self
            .source
            .top_packages(top)
            .context("Failed to fetch top packages")?;
        info!(packages = packages.len(), jobs = self.jobs, "extracting annotations");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .context("Failed to build worker pool")?;
        let progress = Progress::default();
        let descriptors = pool.install(|| {
            packages
                .par_iter()
                .map(|package| self.process(package, &progress))
                .reduce(DescriptorSet::new, DescriptorSet::merge)
        });

        self.shutdown.check().context("Run aborted before all packages were processed")?;

        let report = PipelineReport {
            packages: packages.len(),
            resolved: progress.resolved.load(Ordering::Relaxed),
            downloaded: progress.downloaded.load(Ordering::Relaxed),
            duration_ms: start.elapsed().as_millis() as u64,
            descriptors,
        };
        info!(
            packages = report.packages,
            resolved = report.resolved,
            downloaded = report.downloaded,
            descriptors = report.descriptors.len(),
            "extraction finished"
        );
        Ok(report)
    }

    fn process(&self, package: &PackageId, progress: &Progress) -> DescriptorSet {
        if self.shutdown.is_triggered() {
            return DescriptorSet::new();
        }
        let Some(version) = self.retriever.resolve_latest_version(package) else {
            warn!(package = %package, "no version resolved, skipping");
            return DescriptorSet::new();
        };
        progress.resolved.fetch_add(1, Ordering::Relaxed);

        let artifact = package.at_version(version);
        let Some(retrieved) = self.retriever.download_artifact(&artifact, None) else {
            warn!(artifact = %artifact, "download failed, skipping");
            return DescriptorSet::new();
        };
        progress.downloaded.fetch_add(1, Ordering::Relaxed);

        let descriptors = self.scanner.scan(&retrieved.path);
        info!(artifact = %artifact, descriptors = descriptors.len(), "artifact scanned");
        descriptors
    }
}
