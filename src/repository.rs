//! Remote Maven-layout repository boundary.
//!
//! [`RemoteRepository`] is what the retriever talks to; [`MavenRepository`] is
//! the HTTP implementation. Every failure is reported as a [`FetchError`] whose
//! variant tells the caller whether asking again can ever help.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::coordinate::{ArtifactRef, PackageId, is_path_segment};
use crate::version::VersionRange;

pub const DEFAULT_REPOSITORY_URL: &str = "https://repo.maven.apache.org/maven2/";
pub const METADATA_FILE: &str = "maven-metadata.xml";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const PARTIAL_SUFFIX: &str = "part";

#[derive(Debug, Error)]
pub enum FetchError {
    /// The repository has no such artifact. Asking again will not help.
    #[error("{resource} not found in remote repository ({reason})")]
    NotFound { resource: String, reason: String },
    /// Metadata needed to locate the file is missing or unreadable.
    #[error("metadata for {resource} unavailable: {reason}")]
    MetadataUnavailable { resource: String, reason: String },
    /// Network-level refusal, throttling or a server error; worth retrying later.
    #[error("transfer of {resource} failed: {reason}")]
    Transient { resource: String, reason: String },
    #[error("unexpected failure on {resource}: {reason}")]
    Unknown { resource: String, reason: String },
}

impl FetchError {
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FetchError::NotFound { .. } | FetchError::MetadataUnavailable { .. }
        )
    }

    fn unknown(resource: &impl ToString, reason: impl ToString) -> Self {
        FetchError::Unknown {
            resource: resource.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Everything the retrieval loop needs from a package repository.
pub trait RemoteRepository: Send + Sync {
    /// Highest published version of `package` inside `range`, if any.
    fn resolve_version_range(
        &self,
        package: &PackageId,
        range: &VersionRange,
    ) -> Result<Option<String>, FetchError>;

    /// Makes the artifact's file available locally and returns its path.
    /// `local_repo` overrides the implementation's default local repository.
    fn fetch_artifact(
        &self,
        artifact: &ArtifactRef,
        local_repo: Option<&Path>,
    ) -> Result<PathBuf, FetchError>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MavenMetadata {
    #[serde(rename = "groupId", default)]
    pub group_id: Option<String>,
    #[serde(rename = "artifactId", default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub versioning: Option<Versioning>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Versioning {
    pub latest: Option<String>,
    pub release: Option<String>,
    #[serde(default)]
    pub versions: Versions,
    pub snapshot: Option<Snapshot>,
    #[serde(rename = "snapshotVersions", default)]
    pub snapshot_versions: SnapshotVersions,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Versions {
    #[serde(rename = "version", default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub timestamp: Option<String>,
    #[serde(rename = "buildNumber")]
    pub build_number: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SnapshotVersions {
    #[serde(rename = "snapshotVersion", default)]
    pub items: Vec<SnapshotVersion>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SnapshotVersion {
    pub classifier: Option<String>,
    pub extension: Option<String>,
    pub value: Option<String>,
}

impl MavenMetadata {
    pub fn parse(bytes: &[u8]) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_reader(bytes)
    }

    pub fn versions(&self) -> &[String] {
        self.versioning
            .as_ref()
            .map(|v| v.versions.items.as_slice())
            .unwrap_or_default()
    }

    /// Timestamped version under which a `-SNAPSHOT` jar was deployed, e.g.
    /// `1.0-20240102.030405-7` for `1.0-SNAPSHOT`.
    pub fn snapshot_file_version(&self, base_version: &str) -> Option<String> {
        let versioning = self.versioning.as_ref()?;
        let listed = versioning.snapshot_versions.items.iter().find(|sv| {
            sv.extension.as_deref() == Some("jar")
                && sv.classifier.as_deref().is_none_or(str::is_empty)
        });
        if let Some(value) = listed.and_then(|sv| sv.value.clone()) {
            return Some(value);
        }

        let snapshot = versioning.snapshot.as_ref()?;
        let timestamp = snapshot.timestamp.as_deref()?;
        let build = snapshot.build_number?;
        let stem = base_version.strip_suffix("-SNAPSHOT")?;
        Some(format!("{stem}-{timestamp}-{build}"))
    }
}

/// Maven-layout repository reached over HTTP, with a Maven-layout local
/// repository acting as the download cache.
#[derive(Debug, Clone)]
pub struct MavenRepository {
    client: Client,
    base_url: Url,
    local_repo: PathBuf,
}

impl MavenRepository {
    pub fn new(base_url: &str, local_repo: PathBuf) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("annotation-extractor/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Self::with_client(base_url, local_repo, client)
    }

    pub fn with_client(base_url: &str, local_repo: PathBuf, client: Client) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid repository URL: {base_url}"))?;
        ensure_trailing_slash(&mut base_url);
        Ok(Self {
            client,
            base_url,
            local_repo,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn join(&self, relative: &str, resource: &impl ToString) -> Result<Url, FetchError> {
        self.base_url
            .join(relative)
            .map_err(|e| FetchError::unknown(resource, e))
    }

    fn get(
        &self,
        url: Url,
        resource: &impl ToString,
    ) -> Result<reqwest::blocking::Response, FetchError> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| classify_transport(&e, resource))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(classify_status(status, resource))
        }
    }

    fn get_metadata(
        &self,
        relative: &str,
        resource: &impl ToString,
    ) -> Result<MavenMetadata, FetchError> {
        let url = self.join(relative, resource)?;
        let body = self
            .get(url, resource)?
            .bytes()
            .map_err(|e| classify_transport(&e, resource))?;
        MavenMetadata::parse(&body).map_err(|e| FetchError::MetadataUnavailable {
            resource: resource.to_string(),
            reason: e.to_string(),
        })
    }

    /// Version string used in the remote file name. Equal to the artifact's
    /// version except for snapshots, which are deployed under a timestamp.
    fn remote_file_version(&self, artifact: &ArtifactRef) -> Result<String, FetchError> {
        if !artifact.is_snapshot() {
            return Ok(artifact.version.clone());
        }
        let relative = format!("{}/{METADATA_FILE}", artifact.version_directory());
        let metadata = self.get_metadata(&relative, artifact).map_err(|e| match e {
            FetchError::NotFound { resource, reason } => {
                FetchError::MetadataUnavailable { resource, reason }
            }
            other => other,
        })?;
        match metadata.snapshot_file_version(&artifact.version) {
            Some(version) if is_path_segment(&version) => Ok(version),
            Some(version) => Err(FetchError::MetadataUnavailable {
                resource: artifact.to_string(),
                reason: format!("snapshot build '{version}' is not a file name"),
            }),
            None => Err(FetchError::MetadataUnavailable {
                resource: artifact.to_string(),
                reason: "no snapshot build listed".to_string(),
            }),
        }
    }

    fn download(&self, url: Url, target: &Path, artifact: &ArtifactRef) -> Result<(), FetchError> {
        let mut response = self.get(url, artifact)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| FetchError::unknown(artifact, e))?;
        }
        let partial = target.with_extension(format!("jar.{PARTIAL_SUFFIX}"));
        let mut file = File::create(&partial).map_err(|e| FetchError::unknown(artifact, e))?;
        if let Err(e) = response.copy_to(&mut file) {
            drop(file);
            let _ = fs::remove_file(&partial);
            return Err(classify_transport(&e, artifact));
        }
        drop(file);
        fs::rename(&partial, target).map_err(|e| FetchError::unknown(artifact, e))
    }
}

impl RemoteRepository for MavenRepository {
    fn resolve_version_range(
        &self,
        package: &PackageId,
        range: &VersionRange,
    ) -> Result<Option<String>, FetchError> {
        let relative = format!("{}/{METADATA_FILE}", package.repository_path());
        let metadata = self.get_metadata(&relative, package)?;
        let highest = range.highest_match(metadata.versions().iter().map(String::as_str));
        Ok(highest.map(|v| v.as_str().to_string()))
    }

    fn fetch_artifact(
        &self,
        artifact: &ArtifactRef,
        local_repo: Option<&Path>,
    ) -> Result<PathBuf, FetchError> {
        artifact
            .check_layout()
            .map_err(|e| FetchError::MetadataUnavailable {
                resource: artifact.to_string(),
                reason: e.to_string(),
            })?;
        let root = local_repo.unwrap_or(&self.local_repo);
        let target = artifact.local_path(root);
        if target.is_file() {
            debug!(artifact = %artifact, path = %target.display(), "already in local repository");
            return Ok(target);
        }

        let file_version = self.remote_file_version(artifact)?;
        let relative = format!(
            "{}/{}-{}.jar",
            artifact.version_directory(),
            artifact.package.artifact_id(),
            file_version
        );
        let url = self.join(&relative, artifact)?;
        self.download(url, &target, artifact)?;
        debug!(artifact = %artifact, path = %target.display(), "downloaded");
        Ok(target)
    }
}

pub fn classify_status(status: StatusCode, resource: &impl ToString) -> FetchError {
    let resource = resource.to_string();
    let reason = format!("HTTP {status}");
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound { resource, reason },
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            FetchError::Transient { resource, reason }
        }
        s if s.is_server_error() => FetchError::Transient { resource, reason },
        _ => FetchError::Unknown { resource, reason },
    }
}

pub fn classify_transport(error: &reqwest::Error, resource: &impl ToString) -> FetchError {
    if let Some(status) = error.status() {
        return classify_status(status, resource);
    }
    let resource = resource.to_string();
    let reason = error_chain(error);
    if error.is_timeout() || error.is_connect() || error.is_body() || error.is_request() {
        FetchError::Transient { resource, reason }
    } else {
        FetchError::Unknown { resource, reason }
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut chain = error.to_string();
    let mut current = error.source();
    while let Some(source) = current {
        chain.push_str(": ");
        chain.push_str(&source.to_string());
        current = source.source();
    }
    chain
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubServer, temp_path};

    const METADATA: &str = r#"
        <metadata>
          <groupId>org.example</groupId>
          <artifactId>demo</artifactId>
          <versioning>
            <latest>2.0.0-SNAPSHOT</latest>
            <release>1.10.0</release>
            <versions>
              <version>1.2.0</version>
              <version>1.10.0</version>
              <version>1.9.1</version>
              <version>2.0.0-SNAPSHOT</version>
            </versions>
            <lastUpdated>20250101010101</lastUpdated>
          </versioning>
        </metadata>
    "#;

    const SNAPSHOT_METADATA: &str = r#"
        <metadata modelVersion="1.1.0">
          <groupId>org.example</groupId>
          <artifactId>demo</artifactId>
          <version>2.0.0-SNAPSHOT</version>
          <versioning>
            <snapshot>
              <timestamp>20250102.030405</timestamp>
              <buildNumber>7</buildNumber>
            </snapshot>
            <lastUpdated>20250102030405</lastUpdated>
          </versioning>
        </metadata>
    "#;

    fn package() -> PackageId {
        PackageId::new("org.example", "demo").unwrap()
    }

    #[test]
    fn parses_version_index() {
        let metadata = MavenMetadata::parse(METADATA.as_bytes()).unwrap();
        assert_eq!(metadata.group_id.as_deref(), Some("org.example"));
        assert_eq!(metadata.versions().len(), 4);
        let highest = VersionRange::any()
            .highest_match(metadata.versions().iter().map(String::as_str))
            .unwrap();
        assert_eq!(highest.as_str(), "2.0.0-SNAPSHOT");
    }

    #[test]
    fn snapshot_version_from_timestamp() {
        let metadata = MavenMetadata::parse(SNAPSHOT_METADATA.as_bytes()).unwrap();
        assert_eq!(
            metadata.snapshot_file_version("2.0.0-SNAPSHOT").as_deref(),
            Some("2.0.0-20250102.030405-7")
        );
        assert!(MavenMetadata::default().snapshot_file_version("1.0-SNAPSHOT").is_none());
    }

    #[test]
    fn snapshot_version_prefers_listed_jar() {
        let xml = r#"
            <metadata>
              <versioning>
                <snapshot>
                  <timestamp>20250101.000000</timestamp>
                  <buildNumber>1</buildNumber>
                </snapshot>
                <snapshotVersions>
                  <snapshotVersion>
                    <extension>pom</extension>
                    <value>1.0-20250101.000000-1</value>
                  </snapshotVersion>
                  <snapshotVersion>
                    <classifier>sources</classifier>
                    <extension>jar</extension>
                    <value>1.0-x</value>
                  </snapshotVersion>
                  <snapshotVersion>
                    <extension>jar</extension>
                    <value>1.0-20250101.000000-2</value>
                  </snapshotVersion>
                </snapshotVersions>
              </versioning>
            </metadata>
        "#;
        let metadata = MavenMetadata::parse(xml.as_bytes()).unwrap();
        assert_eq!(
            metadata.snapshot_file_version("1.0-SNAPSHOT").as_deref(),
            Some("1.0-20250101.000000-2")
        );
    }

    #[test]
    fn status_classification() {
        let r = "g:a:1";
        let classify = |status| classify_status(status, &r);
        assert!(matches!(classify(StatusCode::NOT_FOUND), FetchError::NotFound { .. }));
        assert!(matches!(classify(StatusCode::GONE), FetchError::NotFound { .. }));
        assert!(matches!(classify(StatusCode::TOO_MANY_REQUESTS), FetchError::Transient { .. }));
        assert!(matches!(classify(StatusCode::FORBIDDEN), FetchError::Transient { .. }));
        assert!(matches!(classify(StatusCode::BAD_GATEWAY), FetchError::Transient { .. }));
        assert!(matches!(classify(StatusCode::UNAUTHORIZED), FetchError::Unknown { .. }));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let repo =
            MavenRepository::new("http://localhost:8081/maven2", temp_path("repo_slash")).unwrap();
        assert_eq!(repo.base_url().as_str(), "http://localhost:8081/maven2/");
    }

    #[test]
    fn existing_local_file_skips_network() {
        let local = temp_path("repo_local");
        let artifact = package().at_version("1.2.0");
        let target = artifact.local_path(&local);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"jar").unwrap();

        // Nothing listens on the discard port; any request would fail.
        let repo = MavenRepository::new("http://127.0.0.1:9/", temp_path("unused")).unwrap();
        let path = repo.fetch_artifact(&artifact, Some(&local)).unwrap();
        assert_eq!(path, target);

        let _ = fs::remove_dir_all(local);
    }

    #[test]
    fn refused_connection_is_transient() {
        let repo = MavenRepository::new("http://127.0.0.1:9/", temp_path("refused")).unwrap();
        let err = repo
            .fetch_artifact(&package().at_version("1.2.0"), None)
            .unwrap_err();
        assert!(matches!(err, FetchError::Transient { .. }), "{err}");
    }

    #[test]
    fn resolves_and_downloads_over_http() {
        let server = StubServer::start(vec![
            ("/maven2/org/example/demo/maven-metadata.xml", 200, METADATA.as_bytes().to_vec()),
            ("/maven2/org/example/demo/1.10.0/demo-1.10.0.jar", 200, b"jar bytes".to_vec()),
        ]);
        let local = temp_path("repo_http");
        let base_url = format!("{}/maven2", server.url());
        let repo = MavenRepository::new(&base_url, local.clone()).unwrap();

        let range: VersionRange = "[1.0,1.10.0]".parse().unwrap();
        let version = repo.resolve_version_range(&package(), &range).unwrap();
        assert_eq!(version.as_deref(), Some("1.10.0"));

        let path = repo
            .fetch_artifact(&package().at_version("1.10.0"), None)
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"jar bytes");
        assert!(path.starts_with(&local));
        assert!(!path.with_extension("jar.part").exists());

        let _ = fs::remove_dir_all(local);
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let server = StubServer::start(vec![]);
        let repo = MavenRepository::new(&server.url(), temp_path("repo_404")).unwrap();
        let err = repo
            .fetch_artifact(&package().at_version("9.9"), None)
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }), "{err}");
        assert!(err.is_permanent());
    }

    #[test]
    fn server_error_is_transient() {
        let server = StubServer::start(vec![(
            "/org/example/demo/1.0/demo-1.0.jar",
            503,
            b"busy".to_vec(),
        )]);
        let repo = MavenRepository::new(&server.url(), temp_path("repo_503")).unwrap();
        let err = repo
            .fetch_artifact(&package().at_version("1.0"), None)
            .unwrap_err();
        assert!(matches!(err, FetchError::Transient { .. }), "{err}");
    }

    #[test]
    fn snapshot_without_metadata_is_unavailable() {
        let server = StubServer::start(vec![]);
        let repo = MavenRepository::new(&server.url(), temp_path("repo_snapshot")).unwrap();
        let err = repo
            .fetch_artifact(&package().at_version("2.0.0-SNAPSHOT"), None)
            .unwrap_err();
        assert!(matches!(err, FetchError::MetadataUnavailable { .. }), "{err}");
    }

    #[test]
    fn hostile_versions_never_leave_the_local_repository() {
        let listing = r#"
            <metadata>
              <versioning>
                <versions>
                  <version>1.0</version>
                  <version>9/../../../../../../../../escaped</version>
                </versions>
              </versioning>
            </metadata>
        "#;
        let server = StubServer::start(vec![
            ("/org/example/demo/maven-metadata.xml", 200, listing.as_bytes().to_vec()),
            ("/org/example/demo/1.0/demo-1.0.jar", 200, b"jar".to_vec()),
        ]);
        let base = temp_path("repo_escape");
        let local = base.join("a/b/c/d/local");
        let repo = MavenRepository::new(&server.url(), local.clone()).unwrap();

        let version = repo
            .resolve_version_range(&package(), &VersionRange::any())
            .unwrap();
        assert_eq!(version.as_deref(), Some("1.0"));

        let err = repo
            .fetch_artifact(&package().at_version("9/../../../../escaped"), None)
            .unwrap_err();
        assert!(matches!(err, FetchError::MetadataUnavailable { .. }), "{err}");
        assert!(err.is_permanent());
        assert!(!base.exists());
        assert!(
            server.requests().iter().all(|r| !r.contains("escaped.jar")),
            "{:?}",
            server.requests()
        );

        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn snapshot_build_with_separator_is_unavailable() {
        let xml = r#"
            <metadata>
              <versioning>
                <snapshotVersions>
                  <snapshotVersion>
                    <extension>jar</extension>
                    <value>2.0.0-1/../../x</value>
                  </snapshotVersion>
                </snapshotVersions>
              </versioning>
            </metadata>
        "#;
        let server = StubServer::start(vec![(
            "/org/example/demo/2.0.0-SNAPSHOT/maven-metadata.xml",
            200,
            xml.as_bytes().to_vec(),
        )]);
        let repo = MavenRepository::new(&server.url(), temp_path("repo_snapshot_escape")).unwrap();
        let err = repo
            .fetch_artifact(&package().at_version("2.0.0-SNAPSHOT"), None)
            .unwrap_err();
        assert!(matches!(err, FetchError::MetadataUnavailable { .. }), "{err}");
    }

    #[test]
    fn snapshot_downloads_timestamped_file() {
        let server = StubServer::start(vec![
            (
                "/org/example/demo/2.0.0-SNAPSHOT/maven-metadata.xml",
                200,
                SNAPSHOT_METADATA.as_bytes().to_vec(),
            ),
            (
                "/org/example/demo/2.0.0-SNAPSHOT/demo-2.0.0-20250102.030405-7.jar",
                200,
                b"snapshot".to_vec(),
            ),
        ]);
        let local = temp_path("repo_snapshot_ok");
        let repo = MavenRepository::new(&server.url(), local.clone()).unwrap();
        let artifact = package().at_version("2.0.0-SNAPSHOT");
        let path = repo.fetch_artifact(&artifact, None).unwrap();
        assert_eq!(path, artifact.local_path(&local));
        assert_eq!(fs::read(&path).unwrap(), b"snapshot");

        let _ = fs::remove_dir_all(local);
    }
}
