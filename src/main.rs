use annotation_extractor::cache::PersistentCache;
use annotation_extractor::cli::{Cli, Commands, OutputFormat};
use annotation_extractor::config::{clear_db, resolve_db_path, resolve_local_repo, retry_policy};
use annotation_extractor::coordinate::{Coordinate, VersionConstraint};
use annotation_extractor::descriptor::DescriptorSet;
use annotation_extractor::limiter::RateLimiter;
use annotation_extractor::logging;
use annotation_extractor::pipeline::Pipeline;
use annotation_extractor::repository::MavenRepository;
use annotation_extractor::retriever::{ArtifactRetriever, RetrievedArtifact};
use annotation_extractor::scan::collect_archives;
use annotation_extractor::scanner::AnnotationScanner;
use annotation_extractor::shutdown::Shutdown;
use annotation_extractor::source::{ListSource, Neo4jCredentials, Neo4jSource, PackageSource};
use anyhow::{Context, Result, bail};
use clap::Parser;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command.clone() {
        Commands::Clear => {
            let db_path = resolve_db_path(&cli)?;
            clear_db(&db_path)?;
        }
        Commands::Stats => {
            let cache = PersistentCache::open(resolve_db_path(&cli)?)?;
            let stats = cache.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Extract {
            top,
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            neo4j_database,
            packages,
            jobs,
            max_duration,
            format,
            output,
        } => {
            let shutdown = Shutdown::new();
            if let Some(secs) = max_duration {
                shutdown.trigger_after(Duration::from_secs(secs));
            }
            let source: Box<dyn PackageSource> = match packages {
                Some(path) => Box::new(ListSource::new(path)),
                None => Box::new(Neo4jSource::new(
                    &neo4j_uri,
                    &neo4j_database,
                    Neo4jCredentials {
                        user: neo4j_user,
                        password: neo4j_password,
                    },
                )?),
            };
            let pipeline = Pipeline::new(
                source,
                build_retriever(&cli, &shutdown)?,
                build_scanner(&cli)?,
                shutdown,
            )
            .with_jobs(jobs);

            let report = pipeline.run(top)?;
            let content = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&report)?,
                OutputFormat::Text => descriptor_lines(&report.descriptors),
            };
            write_output(&content, output.as_deref())?;
        }
        Commands::Scan {
            paths,
            format,
            output,
        } => {
            let report = scan_paths(&build_scanner(&cli)?, &paths)?;
            let content = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&report)?,
                OutputFormat::Text => descriptor_lines(&report.descriptors),
            };
            write_output(&content, output.as_deref())?;
        }
        Commands::Fetch { coordinates, dest } => {
            let retriever = build_retriever(&cli, &Shutdown::new())?;
            fetch(&retriever, &coordinates, dest.as_deref())?;
        }
    }

    Ok(())
}

fn build_retriever(cli: &Cli, shutdown: &Shutdown) -> Result<ArtifactRetriever<MavenRepository>> {
    let limiter = Arc::new(RateLimiter::new(cli.qps, shutdown.clone())?);
    let repository = MavenRepository::new(&cli.repository, resolve_local_repo(cli)?)?;
    Ok(ArtifactRetriever::new(
        repository,
        limiter,
        retry_policy(cli),
        shutdown.clone(),
    ))
}

fn build_scanner(cli: &Cli) -> Result<AnnotationScanner> {
    if cli.no_cache {
        return Ok(AnnotationScanner::new());
    }
    let cache = PersistentCache::open(resolve_db_path(cli)?)?;
    Ok(AnnotationScanner::with_cache(cache))
}

#[derive(Debug, Default, Serialize)]
struct ScanReport {
    archives: usize,
    class_entries: usize,
    failed_entries: usize,
    cache_hits: usize,
    duration_ms: u64,
    descriptors: DescriptorSet,
}

fn scan_paths(scanner: &AnnotationScanner, paths: &[PathBuf]) -> Result<ScanReport> {
    let start = Instant::now();
    let archives = collect_archives(paths)?;
    info!(archives = archives.len(), "scanning archives");

    let mut report = archives
        .par_iter()
        .map(|archive| match scanner.scan_archive(archive) {
            Ok(scan) => ScanReport {
                archives: 1,
                class_entries: scan.class_entries,
                failed_entries: scan.failed_entries,
                cache_hits: usize::from(scan.cache_hit),
                duration_ms: 0,
                descriptors: scan.descriptors,
            },
            Err(e) => {
                warn!(
                    archive = %archive.display(),
                    error = %format!("{e:#}"),
                    "skipping unreadable archive"
                );
                ScanReport {
                    archives: 1,
                    ..ScanReport::default()
                }
            }
        })
        .reduce(ScanReport::default, |a, b| ScanReport {
            archives: a.archives + b.archives,
            class_entries: a.class_entries + b.class_entries,
            failed_entries: a.failed_entries + b.failed_entries,
            cache_hits: a.cache_hits + b.cache_hits,
            duration_ms: 0,
            descriptors: a.descriptors.merge(b.descriptors),
        });
    report.duration_ms = start.elapsed().as_millis() as u64;
    Ok(report)
}

fn fetch(
    retriever: &ArtifactRetriever<MavenRepository>,
    coordinates: &[String],
    dest: Option<&Path>,
) -> Result<()> {
    let coordinates = coordinates
        .iter()
        .map(|c| c.parse::<Coordinate>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut failed = 0usize;
    let mut artifacts = Vec::with_capacity(coordinates.len());
    for coordinate in &coordinates {
        let version = match coordinate.version() {
            VersionConstraint::Exact(v) => Some(v.clone()),
            VersionConstraint::Range(range) => {
                retriever.resolve_version(coordinate.package(), range)
            }
        };
        match version {
            Some(v) => artifacts.push(coordinate.package().at_version(v)),
            None => {
                error!(coordinate = %coordinate, "no version to fetch");
                failed += 1;
            }
        }
    }

    let downloads: Box<dyn Iterator<Item = Option<RetrievedArtifact>> + '_> = match dest {
        Some(dest) => Box::new(retriever.download_all_to(&artifacts, dest)),
        None => Box::new(retriever.download_all(&artifacts)),
    };
    for (artifact, retrieved) in artifacts.iter().zip(downloads) {
        match retrieved {
            Some(r) => println!("{}\t{}", r.artifact, r.path.display()),
            None => {
                error!(artifact = %artifact, "could not fetch");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} artifacts could not be fetched", coordinates.len());
    }
    Ok(())
}

fn descriptor_lines(descriptors: &DescriptorSet) -> String {
    let mut out = String::new();
    for d in descriptors.iter() {
        out.push_str(d);
        out.push('\n');
    }
    out
}

fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write output: {}", path.display()))?;
    } else {
        print!("{content}");
        if !content.is_empty() && !content.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}
