//! Library crate for interleaving per-directory split histories into a
//! single monorepo history: an on-disk commit/revision store backed by a
//! bitmap-indexed trie, a cache in front of an external `git` object
//! store, and the queue parser and tree-composition driver that turn a
//! stream of per-source commits into merged monorepo commits.

pub mod arena;
pub mod data_table;
pub mod dir_list;
pub mod error;
pub mod file_stream;
pub mod git_cache;
pub mod git_subprocess;
pub mod index_store;
pub mod interleaver;
pub mod queue;
pub mod sha1;
pub mod sha1_trie;
pub mod svn2git;
pub mod trailer;
pub mod upstreams;
