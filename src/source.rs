//! Where the ranked package list comes from.

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::coordinate::PackageId;

pub const DEFAULT_NEO4J_URI: &str = "http://localhost:7474";
pub const DEFAULT_NEO4J_DATABASE: &str = "neo4j";

/// Packages ranked by how many distinct clients depend on them.
pub const TOP_PACKAGES_QUERY: &str = "MATCH (c)-[:DEPENDS_ON]->(l) \
     WITH l.groupID AS group, l.artifact AS artifact, count(DISTINCT c) AS clients \
     RETURN group, artifact ORDER BY clients DESC LIMIT $n";

const QUERY_TIMEOUT: Duration = Duration::from_secs(300);

pub trait PackageSource: Send + Sync {
    /// Up to `limit` packages, most depended-upon first.
    fn top_packages(&self, limit: usize) -> Result<Vec<PackageId>>;
}

impl<T: PackageSource + ?Sized> PackageSource for Box<T> {
    fn top_packages(&self, limit: usize) -> Result<Vec<PackageId>> {
        (**self).top_packages(limit)
    }
}

#[derive(Debug, Clone)]
pub struct Neo4jCredentials {
    pub user: String,
    pub password: String,
}

/// Reads the dependency graph through Neo4j's HTTP transactional endpoint.
#[derive(Debug, Clone)]
pub struct Neo4jSource {
    client: Client,
    endpoint: Url,
    credentials: Neo4jCredentials,
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    statements: Vec<Statement<'a>>,
}

#[derive(Debug, Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: serde_json::Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<StatementError>,
}

#[derive(Debug, Default, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl Neo4jSource {
    pub fn new(uri: &str, database: &str, credentials: Neo4jCredentials) -> Result<Self> {
        let base = Url::parse(uri).with_context(|| format!("Invalid Neo4j URI: {uri}"))?;
        let endpoint = base
            .join(&format!("db/{database}/tx/commit"))
            .with_context(|| format!("Invalid Neo4j database name: {database}"))?;
        let client = Client::builder()
            .timeout(QUERY_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            credentials,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl PackageSource for Neo4jSource {
    fn top_packages(&self, limit: usize) -> Result<Vec<PackageId>> {
        let mut parameters = serde_json::Map::new();
        parameters.insert("n".to_string(), Value::from(limit as u64));
        let request = CommitRequest {
            statements: vec![Statement {
                statement: TOP_PACKAGES_QUERY,
                parameters,
            }],
        };

        info!(endpoint = %self.endpoint, limit, "querying graph store");
        let response = self
            .client
            .post(self.endpoint.clone())
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .json(&request)
            .send()
            .with_context(|| format!("Failed to reach Neo4j at {}", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            bail!("Neo4j returned HTTP {status} for {}", self.endpoint);
        }
        let body: CommitResponse = response
            .json()
            .context("Failed to decode Neo4j response")?;
        packages_from_response(body)
    }
}

fn packages_from_response(response: CommitResponse) -> Result<Vec<PackageId>> {
    if let Some(err) = response.errors.first() {
        bail!("Neo4j query failed: {} {}", err.code, err.message);
    }

    let mut packages = Vec::new();
    for record in response.results.into_iter().flat_map(|r| r.data) {
        let (Some(Value::String(group)), Some(Value::String(artifact))) =
            (record.row.first(), record.row.get(1))
        else {
            warn!(row = ?record.row, "skipping row without group and artifact");
            continue;
        };
        match PackageId::new(group.as_str(), artifact.as_str()) {
            Ok(package) => packages.push(package),
            Err(e) => warn!(row = ?record.row, error = %e, "skipping malformed package"),
        }
    }
    debug!(count = packages.len(), "graph store returned packages");
    Ok(packages)
}

/// Ranked `group:artifact` lines read from a file, for runs without a graph
/// store. Blank lines and `#` comments are ignored.
#[derive(Debug, Clone)]
pub struct ListSource {
    path: PathBuf,
}

impl ListSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PackageSource for ListSource {
    fn top_packages(&self, limit: usize) -> Result<Vec<PackageId>> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read package list: {}", self.path.display()))?;
        parse_package_list(&text, limit)
            .with_context(|| format!("Invalid package list: {}", self.path.display()))
    }
}

fn parse_package_list(text: &str, limit: usize) -> Result<Vec<PackageId>> {
    let mut packages = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if packages.len() >= limit {
            break;
        }
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let package = line
            .parse::<PackageId>()
            .with_context(|| format!("line {}: {line}", n + 1))?;
        packages.push(package);
    }
    Ok(packages)
}
