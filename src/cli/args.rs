//! CLI argument structs for all subcommands.

use clap::{Parser, ValueEnum};

use crate::collectors::DataKind;

/// Data kinds selectable on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataArg {
    RepoInfo,
    Commits,
    Pulls,
    Issues,
    BranchFiles,
    ReleaseFiles,
}

impl From<DataArg> for DataKind {
    fn from(arg: DataArg) -> DataKind {
        match arg {
            DataArg::RepoInfo => DataKind::RepositoryInfo,
            DataArg::Commits => DataKind::Commits,
            DataArg::Pulls => DataKind::PullRequests,
            DataArg::Issues => DataKind::Issues,
            DataArg::BranchFiles => DataKind::BranchFiles,
            DataArg::ReleaseFiles => DataKind::ReleaseFiles,
        }
    }
}

#[derive(Parser, Debug)]
pub struct ReposArgs {
    /// Organization to list; defaults to GITHUB_ORG.
    #[arg(short, long)]
    pub org: Option<String>,
}

#[derive(Parser, Debug)]
#[command(after_long_help = r#"EXAMPLES:
  All data, repos from GITHUB_REPOS:  forager ingest
  One repo, commits only:             forager ingest org/repo --data commits
  Whole organization:                 forager ingest --org my-org
  Trees only:                         forager ingest org/repo --data branch-files,release-files

NOTES:
  - Collectors are idempotent: a re-run with no upstream changes performs
    only reads.
  - Commit ingestion early-stops at the newest commit already stored.
  - Rate-limit waits block silently; a run may take minutes when the API
    quota is exhausted.
"#)]
pub struct IngestArgs {
    /// Repositories (owner/name); defaults to GITHUB_REPOS.
    pub repos: Vec<String>,

    /// Ingest every repository of this organization instead.
    #[arg(long, conflicts_with = "repos")]
    pub org: Option<String>,

    /// Data kinds to refresh.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "repo-info,commits,pulls,issues,branch-files,release-files"
    )]
    pub data: Vec<DataArg>,
}

#[derive(Parser, Debug)]
pub struct MetadataArgs {
    /// Repositories (owner/name); defaults to GITHUB_REPOS.
    pub repos: Vec<String>,

    /// Source collections to process.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "files,main_files,last_release_files,commits,pull_requests,issues"
    )]
    pub collections: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct BuildIndexArgs {
    /// Repository (owner/name).
    #[arg(short, long)]
    pub repo: String,

    /// Source collections to index.
    #[arg(long, value_delimiter = ',', default_value = "commits")]
    pub collections: Vec<String>,

    /// Rebuild even when an artifact already exists.
    #[arg(long)]
    pub force: bool,

    /// Fuse all named collections into one "global" index.
    #[arg(long)]
    pub global: bool,
}

#[derive(Parser, Debug)]
#[command(after_long_help = r#"EXAMPLES:
  forager ask "how is pagination handled?" --repo org/repo
  forager ask "what changed in the parser?" --repo org/repo --collection main_files --top-k 8

NOTES:
  - The (repo, collection) index is loaded eagerly and built on the fly
    when missing.
  - Every query is appended to the JSONL query log for offline evaluation.
  - The LLM backend comes from LLM_MODEL_TYPE / LLM_API_URL / LLM_MODEL /
    LLM_API_KEY.
"#)]
pub struct AskArgs {
    /// Question to answer from the ingested corpus.
    pub question: String,

    /// Repository (owner/name).
    #[arg(short, long)]
    pub repo: String,

    /// Source collection whose index to query.
    #[arg(short, long, default_value = "commits")]
    pub collection: String,

    /// Chunks to retrieve.
    #[arg(long, default_value = "5")]
    pub top_k: usize,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Port override; defaults to PORT.
    #[arg(short, long)]
    pub port: Option<u16>,
}
