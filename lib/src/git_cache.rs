//! In-memory caches over the external git object store, backed on disk by
//! the `commits`/`svnbase` tables and the per-source svn2git files. Every
//! successful lookup — whether served from cache, from disk, or from a
//! freshly spawned `git` subprocess — is noted back into memory so it is
//! never paid for twice within one run.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use crate::data_table::CommitsTable;
use crate::data_table::SvnBaseTable;
use crate::data_table::Table;
use crate::error::GitCacheError;
use crate::error::StoreError;
use crate::git_subprocess::CommitMetadata;
use crate::git_subprocess::GitSubprocessContext;
use crate::git_subprocess::TreeEntry;
use crate::sha1::Sha1Bytes;
use crate::sha1_trie::Sha1Trie;
use crate::sha1_trie::TrieValue;
use crate::svn2git::Svn2Git;
use crate::trailer::parse_description_trailers;

const LLVM_SVN_URL: &str = "https://llvm.org/svn/llvm-project/";

struct Entry<V> {
    key: Sha1Bytes,
    value: V,
}

impl<V> TrieValue for Entry<V> {
    fn trie_key(&self) -> Sha1Bytes {
        self.key
    }
}

/// A content-addressed `Sha1Bytes -> V` map, layered on [`Sha1Trie`].
struct Sha1Map<V> {
    trie: Sha1Trie<Entry<V>>,
}

impl<V> Sha1Map<V> {
    fn new() -> Self {
        Self { trie: Sha1Trie::new() }
    }

    fn get(&self, key: &Sha1Bytes) -> Option<&V> {
        self.trie.lookup(key).map(|entry| &entry.value)
    }

    fn insert(&mut self, key: Sha1Bytes, value: V) {
        self.trie.insert_with(key, || Entry { key, value });
    }
}

fn store_err(err: StoreError) -> GitCacheError {
    GitCacheError::UnparsableOutput {
        args: "<on-disk table>".to_string(),
        reason: err.to_string(),
    }
}

pub struct GitCache {
    ctx: GitSubprocessContext,
    store_dir: PathBuf,
    commit_trees: Sha1Map<Sha1Bytes>,
    trees: Sha1Map<Vec<TreeEntry>>,
    monos: Sha1Map<Sha1Bytes>,
    revs: Sha1Map<i64>,
    metadata: Sha1Map<CommitMetadata>,
    commits_table: Table<CommitsTable>,
    svnbase_table: Table<SvnBaseTable>,
    svn2git: HashMap<String, Svn2Git>,
}

impl GitCache {
    pub fn open(ctx: GitSubprocessContext, store_dir: impl AsRef<Path>) -> Result<Self, GitCacheError> {
        let store_dir = store_dir.as_ref();
        Ok(Self {
            ctx,
            store_dir: store_dir.to_path_buf(),
            commit_trees: Sha1Map::new(),
            trees: Sha1Map::new(),
            monos: Sha1Map::new(),
            revs: Sha1Map::new(),
            metadata: Sha1Map::new(),
            commits_table: Table::open(store_dir).map_err(store_err)?,
            svnbase_table: Table::open(store_dir).map_err(store_err)?,
            svn2git: HashMap::new(),
        })
    }

    fn svn2git_for(&mut self, dir: &str) -> Result<&mut Svn2Git, GitCacheError> {
        if !self.svn2git.contains_key(dir) {
            let table =
                Svn2Git::open_rw(self.store_dir.join(format!("{dir}.svn2git"))).map_err(store_err)?;
            self.svn2git.insert(dir.to_string(), table);
        }
        Ok(self.svn2git.get_mut(dir).expect("just inserted"))
    }

    fn metadata(&mut self, commit: &Sha1Bytes) -> Result<CommitMetadata, GitCacheError> {
        if let Some(meta) = self.metadata.get(commit) {
            return Ok(meta.clone());
        }
        let meta = self.ctx.commit_metadata(&commit.to_hex())?;
        self.metadata.insert(*commit, meta.clone());
        self.commit_trees.insert(*commit, meta.tree);
        Ok(meta)
    }

    /// Warms the `commit_trees` cache from a queue `all`-list line, which
    /// already names the commit's tree directly, so no subprocess call is
    /// needed to learn it.
    pub fn set_mono_tree_hint(&mut self, commit: Sha1Bytes, tree: Sha1Bytes) {
        self.commit_trees.insert(commit, tree);
    }

    /// Records a known mono translation directly, as seeded by the queue
    /// parser (`commit→tree` warming) or by a prior run's on-disk state.
    pub fn set_mono(&mut self, split: Sha1Bytes, mono: Sha1Bytes) -> Result<(), GitCacheError> {
        self.monos.insert(split, mono);
        if self.commits_table.lookup(&split).map_err(store_err)?.is_none() {
            self.commits_table.insert(&split, &mono.0).map_err(store_err)?;
        }
        Ok(())
    }

    pub fn get_mono(
        &mut self,
        split: Sha1Bytes,
        dir: &str,
    ) -> Result<Option<Sha1Bytes>, GitCacheError> {
        if let Some(mono) = self.monos.get(&split) {
            return Ok(Some(*mono));
        }
        if let Some(bytes) = self.commits_table.lookup(&split).map_err(store_err)? {
            let mut buf = [0u8; 20];
            buf.copy_from_slice(&bytes);
            let mono = Sha1Bytes(buf);
            self.monos.insert(split, mono);
            return Ok(Some(mono));
        }
        let rev = self.get_rev(split)?;
        if rev > 0 {
            let mono = self.svn2git_for(dir)?.get(rev as u32).map_err(store_err)?;
            if !mono.is_absent() {
                self.monos.insert(split, mono);
                self.commits_table.insert(&split, &mono.0).map_err(store_err)?;
                return Ok(Some(mono));
            }
        }
        Ok(None)
    }

    /// Returns the SVN revision recorded for `commit`: positive if it came
    /// from upstream LLVM metadata, negative if it is merely known (from
    /// the `svnbase` table), zero if nothing is known.
    pub fn get_rev(&mut self, commit: Sha1Bytes) -> Result<i64, GitCacheError> {
        if let Some(rev) = self.revs.get(&commit) {
            return Ok(*rev);
        }
        if let Some(bytes) = self.svnbase_table.lookup(&commit).map_err(store_err)? {
            let magnitude = u32::from_be_bytes(bytes[..4].try_into().expect("4-byte value"));
            let rev = -i64::from(magnitude);
            self.revs.insert(commit, rev);
            return Ok(rev);
        }
        let meta = self.metadata(&commit)?;
        let rev = if meta.author_date == meta.committer_date {
            parse_rev_trailer(&meta.message).unwrap_or_else(|| {
                tracing::warn!(commit = %commit, "no svn revision found in commit metadata");
                0
            })
        } else {
            tracing::warn!(commit = %commit, "author/committer dates disagree; skipping trailer search");
            0
        };
        self.revs.insert(commit, rev);
        Ok(rev)
    }

    pub fn get_commit_tree(&mut self, commit: Sha1Bytes) -> Result<Sha1Bytes, GitCacheError> {
        if let Some(tree) = self.commit_trees.get(&commit) {
            return Ok(*tree);
        }
        let meta = self.metadata(&commit)?;
        Ok(meta.tree)
    }

    pub fn ls_tree(&mut self, tree: Sha1Bytes) -> Result<Vec<TreeEntry>, GitCacheError> {
        if let Some(items) = self.trees.get(&tree) {
            return Ok(items.clone());
        }
        let items = self.ctx.ls_tree(&tree)?;
        self.trees.insert(tree, items.clone());
        Ok(items)
    }

    pub fn mktree(&mut self, entries: &[TreeEntry]) -> Result<Sha1Bytes, GitCacheError> {
        let tree = self.ctx.mktree(entries)?;
        self.trees.insert(tree, entries.to_vec());
        Ok(tree)
    }

    /// Creates the merged commit and emits the two split-tracking trailers
    /// described by the ambient git trailer format.
    pub fn commit_tree(
        &mut self,
        base: Sha1Bytes,
        dir: &str,
        tree: Sha1Bytes,
        parents: &[Sha1Bytes],
    ) -> Result<Sha1Bytes, GitCacheError> {
        let meta = self.metadata(&base)?;
        let dir_suffix = if dir.ends_with('/') || dir == "-" {
            dir.to_string()
        } else {
            format!("{dir}/")
        };
        let message = append_trailers(
            &meta.message,
            &[
                ("apple-llvm-split-commit", &base.to_hex()),
                ("apple-llvm-split-dir", &dir_suffix),
            ],
        );
        let new_commit = self.ctx.commit_tree(&tree, parents, &meta, &message)?;
        self.commit_trees.insert(new_commit, tree);
        Ok(new_commit)
    }
}

/// Searches a commit message for an `llvm-rev: <N>` trailer, or a
/// `git-svn-id: <url>@<N> ` line whose URL is not upstream LLVM's.
fn parse_rev_trailer(message: &str) -> Option<i64> {
    for trailer in parse_description_trailers(message) {
        if trailer.key.eq_ignore_ascii_case("llvm-rev") {
            if let Ok(n) = trailer.value.trim().parse::<i64>() {
                return Some(n);
            }
        }
    }
    for line in message.lines() {
        if let Some(rest) = line.strip_prefix("git-svn-id: ") {
            if let Some((url_at_rev, _)) = rest.split_once(' ') {
                if let Some((url, rev)) = url_at_rev.rsplit_once('@') {
                    if url != LLVM_SVN_URL {
                        if let Ok(n) = rev.parse::<i64>() {
                            return Some(n);
                        }
                    }
                }
            }
        }
    }
    None
}

/// Appends trailers to `message`, adding a blank-line separator only if the
/// message does not already end in one.
fn append_trailers(message: &str, trailers: &[(&str, &str)]) -> String {
    let mut out = message.trim_end_matches('\n').to_string();
    out.push('\n');
    if !message.ends_with("\n\n") {
        out.push('\n');
    }
    for (key, value) in trailers {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out
}
