use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::repository::DEFAULT_REPOSITORY_URL;
use crate::source::{DEFAULT_NEO4J_DATABASE, DEFAULT_NEO4J_URI};

#[derive(Debug, Clone, Parser)]
#[command(name = "annotation-extractor")]
#[command(about = "Collect the annotation types used by the most depended-upon Maven packages")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Scan-result cache file
    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    /// Scan every archive from scratch
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Local Maven-layout repository used as the download cache
    #[arg(long, value_name = "DIR", global = true)]
    pub local_repo: Option<PathBuf>,

    #[arg(
        long,
        value_name = "URL",
        env = "MAVEN_REPOSITORY_URL",
        default_value = DEFAULT_REPOSITORY_URL,
        global = true
    )]
    pub repository: String,

    /// Requests per second sent to the remote repository
    #[arg(long, value_name = "N", default_value_t = 15, global = true)]
    pub qps: u32,

    /// Seconds to wait after a refused transfer
    #[arg(long, value_name = "SECS", default_value_t = 30, global = true)]
    pub cooldown: u64,

    /// Give up on an artifact after this many attempts (default: never)
    #[arg(long, value_name = "N", global = true)]
    pub max_attempts: Option<u32>,

    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Download the top packages' latest jars and list their annotation types
    Extract {
        #[arg(long, value_name = "N", default_value_t = 1000)]
        top: usize,

        #[arg(long, value_name = "URI", env = "NEO4J_URI", default_value = DEFAULT_NEO4J_URI)]
        neo4j_uri: String,

        #[arg(long, value_name = "USER", env = "NEO4J_USER", default_value = "neo4j")]
        neo4j_user: String,

        #[arg(
            long,
            value_name = "PASSWORD",
            env = "NEO4J_PASSWORD",
            default_value = "neo4j",
            hide_env_values = true
        )]
        neo4j_password: String,

        #[arg(long, value_name = "NAME", default_value = DEFAULT_NEO4J_DATABASE)]
        neo4j_database: String,

        /// Read ranked group:artifact lines from a file instead of Neo4j
        #[arg(long, value_name = "FILE")]
        packages: Option<PathBuf>,

        #[arg(long, value_name = "N", default_value_t = 1)]
        jobs: usize,

        /// Abort the run after this many seconds
        #[arg(long, value_name = "SECS")]
        max_duration: Option<u64>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// List annotation types used in local jars or directories of jars
    Scan {
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Download artifacts (group:artifact[:version-or-range]) and print their paths
    Fetch {
        #[arg(value_name = "COORD", required = true)]
        coordinates: Vec<String>,

        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,
    },
    Stats,
    Clear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
