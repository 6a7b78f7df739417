use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::version::{VersionRange, VersionRangeError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinateError {
    #[error("group id must not be empty in '{0}'")]
    EmptyGroup(String),
    #[error("artifact id must not be empty in '{0}'")]
    EmptyArtifact(String),
    #[error("expected group:artifact[:version], got '{0}'")]
    Malformed(String),
    #[error("'{0}' is not usable as a repository path segment")]
    InvalidSegment(String),
    #[error(transparent)]
    Range(#[from] VersionRangeError),
}

/// True when `s` names exactly one directory level of a repository layout.
pub fn is_path_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

/// A package as ranked by the dependency graph: group and artifact, no version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PackageId {
    group_id: String,
    artifact_id: String,
}

impl PackageId {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
    ) -> Result<Self, CoordinateError> {
        let group_id = group_id.into().trim().to_string();
        let artifact_id = artifact_id.into().trim().to_string();
        if group_id.is_empty() {
            return Err(CoordinateError::EmptyGroup(format!("{group_id}:{artifact_id}")));
        }
        if artifact_id.is_empty() {
            return Err(CoordinateError::EmptyArtifact(format!("{group_id}:{artifact_id}")));
        }
        if !group_id.split('.').all(is_path_segment) {
            return Err(CoordinateError::InvalidSegment(group_id));
        }
        if !is_path_segment(&artifact_id) {
            return Err(CoordinateError::InvalidSegment(artifact_id));
        }
        Ok(Self {
            group_id,
            artifact_id,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    /// `org/apache/commons/commons-lang3`
    pub fn repository_path(&self) -> String {
        format!("{}/{}", self.group_id.replace('.', "/"), self.artifact_id)
    }

    pub fn at_version(&self, version: impl Into<String>) -> ArtifactRef {
        ArtifactRef {
            package: self.clone(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)
    }
}

impl FromStr for PackageId {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split(':').collect::<Vec<_>>().as_slice() {
            [group, artifact] => Self::new(*group, *artifact),
            _ => Err(CoordinateError::Malformed(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    Exact(String),
    Range(VersionRange),
}

impl VersionConstraint {
    fn parse(spec: &str) -> Result<Self, CoordinateError> {
        let spec = spec.trim();
        if spec.starts_with(['[', '(']) {
            Ok(Self::Range(spec.parse()?))
        } else if spec.is_empty() {
            Ok(Self::Range(VersionRange::any()))
        } else {
            Ok(Self::Exact(spec.to_string()))
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Exact(v) => f.write_str(v),
            VersionConstraint::Range(r) => write!(f, "{r}"),
        }
    }
}

/// `group:artifact[:version-or-range]`; a missing version means `[0,)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinate {
    package: PackageId,
    version: VersionConstraint,
}

impl Coordinate {
    pub fn new(package: PackageId, version: VersionConstraint) -> Self {
        Self { package, version }
    }

    pub fn package(&self) -> &PackageId {
        &self.package
    }

    pub fn version(&self) -> &VersionConstraint {
        &self.version
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.package, self.version)
    }
}

impl FromStr for Coordinate {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let mut parts = raw.splitn(3, ':');
        let (Some(group), Some(artifact)) = (parts.next(), parts.next()) else {
            return Err(CoordinateError::Malformed(raw.to_string()));
        };
        let package = PackageId::new(group, artifact)?;
        let version = VersionConstraint::parse(parts.next().unwrap_or_default())?;
        Ok(Self::new(package, version))
    }
}

/// A package pinned to one concrete version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArtifactRef {
    pub package: PackageId,
    pub version: String,
}

impl ArtifactRef {
    pub fn file_name(&self) -> String {
        format!("{}-{}.jar", self.package.artifact_id(), self.version)
    }

    pub fn version_directory(&self) -> String {
        format!("{}/{}", self.package.repository_path(), self.version)
    }

    /// Location relative to a Maven-layout repository root.
    pub fn repository_path(&self) -> String {
        format!("{}/{}", self.version_directory(), self.file_name())
    }

    pub fn local_path(&self, local_repo: &std::path::Path) -> PathBuf {
        local_repo.join(self.repository_path())
    }

    pub fn is_snapshot(&self) -> bool {
        self.version.ends_with("-SNAPSHOT")
    }

    /// Rejects versions that would leave the artifact's own directory once
    /// joined onto a repository root.
    pub fn check_layout(&self) -> Result<(), CoordinateError> {
        if is_path_segment(&self.version) {
            Ok(())
        } else {
            Err(CoordinateError::InvalidSegment(self.version.clone()))
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.package, self.version)
    }
}
