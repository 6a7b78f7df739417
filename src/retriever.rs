use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::coordinate::{ArtifactRef, PackageId};
use crate::limiter::RateLimiter;
use crate::repository::{FetchError, RemoteRepository};
use crate::shutdown::Shutdown;
use crate::version::VersionRange;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// How the download loop reacts to failures it may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after a transient failure before the next attempt.
    pub cooldown: Duration,
    /// Total attempts per artifact; `None` keeps trying until success,
    /// a permanent failure, or cancellation.
    pub max_attempts: Option<u32>,
    /// Whether unclassified failures also wait out the cooldown.
    pub cooldown_on_unknown: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            max_attempts: None,
            cooldown_on_unknown: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedArtifact {
    pub artifact: ArtifactRef,
    pub path: PathBuf,
}

/// Resolves and downloads artifacts, one rate-limiter token per request.
pub struct ArtifactRetriever<R> {
    repository: R,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    shutdown: Shutdown,
}

impl<R: RemoteRepository> ArtifactRetriever<R> {
    pub fn new(
        repository: R,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            repository,
            limiter,
            policy,
            shutdown,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Highest version published for `package`. Failures are logged and
    /// reported as absent; they are never retried.
    pub fn resolve_latest_version(&self, package: &PackageId) -> Option<String> {
        self.resolve_version(package, &VersionRange::any())
    }

    pub fn resolve_version(&self, package: &PackageId, range: &VersionRange) -> Option<String> {
        if self.limiter.acquire().is_err() {
            return None;
        }
        match self.repository.resolve_version_range(package, range) {
            Ok(Some(version)) => {
                debug!(package = %package, range = %range, version = %version, "version resolved");
                Some(version)
            }
            Ok(None) => {
                warn!(package = %package, range = %range, "no version matches");
                None
            }
            Err(e) => {
                warn!(package = %package, range = %range, error = %e, "version resolution failed");
                None
            }
        }
    }

    /// Downloads one artifact, retrying transient failures per the policy.
    /// `local_repo` overrides the repository's default download location.
    pub fn download_artifact(
        &self,
        artifact: &ArtifactRef,
        local_repo: Option<&Path>,
    ) -> Option<RetrievedArtifact> {
        let mut attempt = 0u32;
        loop {
            if self.limiter.acquire().is_err() {
                info!(artifact = %artifact, "download cancelled");
                return None;
            }
            attempt += 1;

            let err = match self.repository.fetch_artifact(artifact, local_repo) {
                Ok(path) => {
                    return Some(RetrievedArtifact {
                        artifact: artifact.clone(),
                        path,
                    });
                }
                Err(err) => err,
            };

            let cool_down = match &err {
                FetchError::NotFound { .. } => {
                    warn!(artifact = %artifact, error = %err, "artifact not found, giving up");
                    return None;
                }
                FetchError::MetadataUnavailable { .. } => {
                    warn!(artifact = %artifact, error = %err, "metadata unavailable, giving up");
                    return None;
                }
                FetchError::Transient { .. } => {
                    warn!(
                        artifact = %artifact,
                        attempt,
                        cooldown_secs = self.policy.cooldown.as_secs(),
                        error = %err,
                        "transfer refused, cooling down"
                    );
                    true
                }
                FetchError::Unknown { .. } => {
                    error!(artifact = %artifact, attempt, error = %err, "unknown download failure");
                    self.policy.cooldown_on_unknown
                }
            };

            if self.policy.max_attempts.is_some_and(|max| attempt >= max) {
                error!(artifact = %artifact, attempts = attempt, "retry budget exhausted");
                return None;
            }
            if cool_down && self.shutdown.sleep(self.policy.cooldown).is_err() {
                info!(artifact = %artifact, "download cancelled during cooldown");
                return None;
            }
        }
    }

    /// Lazily downloads each artifact in order into the default location.
    pub fn download_all<'a>(
        &'a self,
        artifacts: &'a [ArtifactRef],
    ) -> impl Iterator<Item = Option<RetrievedArtifact>> + 'a {
        artifacts.iter().map(move |a| self.download_artifact(a, None))
    }

    /// Like [`Self::download_all`], but into `local_repo`.
    pub fn download_all_to<'a>(
        &'a self,
        artifacts: &'a [ArtifactRef],
        local_repo: &'a Path,
    ) -> impl Iterator<Item = Option<RetrievedArtifact>> + 'a {
        artifacts
            .iter()
            .map(move |a| self.download_artifact(a, Some(local_repo)))
    }

    /// Resolve the newest version of `package`, then download it.
    pub fn retrieve_latest(&self, package: &PackageId) -> Option<RetrievedArtifact> {
        let version = self.resolve_latest_version(package)?;
        self.download_artifact(&package.at_version(version), None)
    }
}
