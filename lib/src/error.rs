//! Component-scoped error types and the top-level error each bubbles into.

use std::path::PathBuf;

use thiserror::Error;

/// Failures from the on-disk bitmap trie index and its paired data table
/// ([`crate::index_store`], [`crate::data_table`]).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("magic mismatch in {path}: expected {expected:02x?}, found {found:02x?}")]
    MagicMismatch {
        path: PathBuf,
        expected: [u8; 8],
        found: [u8; 8],
    },
    #[error("{path} size {size} is not {record_size} bytes past the magic")]
    InvalidSize {
        path: PathBuf,
        size: u64,
        record_size: u64,
    },
    #[error("key already mapped in {table}")]
    AlreadyMapped { table: &'static str },
    #[error("could not resolve hash collision: keys are equal at 160 bits")]
    HashCollisionExhausted,
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while reading the `start … all … done` queue protocol
/// ([`crate::queue`]).
#[derive(Error, Debug)]
pub enum QueueParseError {
    #[error("line {line}: unknown directive {directive:?}")]
    UnknownDirective { line: usize, directive: String },
    #[error("line {line}: unknown directory {name:?}")]
    UnknownDirectory { line: usize, name: String },
    #[error("line {line}: malformed sha1 {text:?}")]
    MalformedSha1 { line: usize, text: String },
    #[error("line {line}: negative or malformed timestamp {text:?}")]
    MalformedTimestamp { line: usize, text: String },
    #[error("line {line}: junk at end of line: {rest:?}")]
    TrailingJunk { line: usize, rest: String },
    #[error("line {line}: missing newline at end of input")]
    MissingNewline { line: usize },
    #[error("first-parent {commit} of source {dir:?} never appears in its `all` list")]
    FirstParentNotInAll { dir: String, commit: String },
    #[error("source {dir:?} declares {count} parents on one commit, exceeding the limit of 128")]
    TooManyParents { dir: String, count: usize },
}

/// Failures from the directory registry ([`crate::dir_list`]).
#[derive(Error, Debug)]
pub enum DirListError {
    #[error("directory name {0:?} does not match [A-Za-z0-9_+.-]+")]
    InvalidName(String),
    #[error("directory {0:?} already declared")]
    DuplicateName(String),
    #[error("directory list capacity of 64 entries exceeded")]
    CapacityExceeded,
}

/// Failures from the `upstreams` configuration file ([`crate::upstreams`]).
#[derive(Error, Debug)]
pub enum UpstreamsParseError {
    #[error("line {line}: expected `name: <name>`")]
    MissingName { line: usize },
    #[error("line {line}: name {name:?} does not match [A-Za-z0-9./:]+")]
    InvalidName { line: usize, name: String },
    #[error("line {line}: malformed `upstream:` directive")]
    MalformedUpstream { line: usize },
    #[error("upstream {0:?} declared more than once")]
    DuplicateUpstream(String),
    #[error("source {0:?} cannot be its own upstream")]
    SelfUpstream(String),
}

/// Failures talking to the external git object-store subprocess
/// ([`crate::git_cache`], [`crate::git_subprocess`]).
#[derive(Error, Debug)]
pub enum GitCacheError {
    #[error("could not spawn `git {args}`: {source}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`git {args}` exited with status {status}: {stderr}")]
    NonZeroExit {
        args: String,
        status: i32,
        stderr: String,
    },
    #[error("`git {args}` produced {found} lines, expected {expected}")]
    UnexpectedLineCount {
        args: String,
        expected: usize,
        found: usize,
    },
    #[error("could not parse output of `git {args}`: {reason}")]
    UnparsableOutput { args: String, reason: String },
    #[error("no translation recorded for split commit {0}")]
    MissingTranslation(String),
}

/// Failures from the tree-composition / interleaving driver
/// ([`crate::interleaver`]).
#[derive(Error, Debug)]
pub enum InterleaveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    QueueParse(#[from] QueueParseError),
    #[error(transparent)]
    DirList(#[from] DirListError),
    #[error(transparent)]
    Upstreams(#[from] UpstreamsParseError),
    #[error(transparent)]
    GitCache(#[from] GitCacheError),
    #[error("merge of commit {commit} needs {count} parents, exceeding the limit of 128")]
    TooManyParents { commit: String, count: usize },
    #[error("merged tree for commit {commit} has {count} entries, exceeding the limit of 64")]
    TooManyTreeItems { commit: String, count: usize },
    #[error("root dir '-' has a sub-tree in commit {commit}")]
    RootHasSubtree { commit: String },
}

/// Exit status a [`InterleaveError`] should map to, per the error taxonomy:
/// ordinary failures exit 1, failures that may have left a partial on-disk
/// write behind exit 2.
pub fn exit_code(err: &InterleaveError) -> i32 {
    match err {
        InterleaveError::Store(StoreError::Io { .. } | StoreError::InvalidSize { .. }) => 2,
        _ => 1,
    }
}
