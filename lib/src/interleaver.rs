//! Drives the merge-by-timestamp loop over a parsed [`Queue`], translating
//! each source's commits into the monorepo one first-parent at a time and
//! composing each merge commit's tree from the source's own content plus
//! its translated parents' trees.

use crate::dir_list::DirList;
use crate::error::InterleaveError;
use crate::git_cache::GitCache;
use crate::git_subprocess::TreeEntry;
use crate::queue::Queue;
use crate::queue::QueuedCommit;
use crate::sha1::Sha1Bytes;

const MAX_PARENTS: usize = 128;
const MAX_TREE_ITEMS: usize = 64;
const PROGRESS_INTERVAL: usize = 50;

/// Runs the interleaver to completion, returning the final stdout line:
/// the new monorepo head followed by each tracked directory's own head.
pub fn run(
    queue: &Queue,
    dirs: &mut DirList,
    cache: &mut GitCache,
) -> Result<String, InterleaveError> {
    // Per source, a forward cursor into that block's `commits` list (given
    // in the order the source introduced them); first-parents pop from
    // `fparents`'s back (earliest ct first).
    let mut cursors = vec![0usize; queue.blocks.len()];
    let mut block_of_dir = vec![usize::MAX; dirs.len()];
    for (bi, block) in queue.blocks.iter().enumerate() {
        block_of_dir[block.dir] = bi;
    }

    let mut head = Sha1Bytes::ABSENT;
    let mut fparents = queue.fparents.clone();
    let mut processed = 0usize;

    while let Some(fp) = fparents.pop() {
        let block_idx = block_of_dir[fp.dir];
        let block = &queue.blocks[block_idx];

        while cursors[block_idx] < block.commits.len()
            && block.commits[cursors[block_idx]].commit != fp.commit
        {
            let commit = block.commits[cursors[block_idx]].clone();
            cursors[block_idx] += 1;
            translate_commit(&commit, fp.dir, dirs, cache, None)?;
        }
        let commit = block.commits[cursors[block_idx]].clone();
        cursors[block_idx] += 1;

        let new_head = translate_commit(&commit, fp.dir, dirs, cache, Some(head))?;
        head = new_head;
        dirs.set_head(fp.dir, new_head);

        processed += 1;
        if processed % PROGRESS_INTERVAL == 0 {
            tracing::info!(processed, "interleaver progress");
        }
    }

    let mut out = head.to_hex();
    for dir in dirs.iter() {
        out.push(' ');
        out.push_str(&dir.head.map(|h| h.to_hex()).unwrap_or_else(|| "0".repeat(40)));
        out.push(':');
        out.push_str(&dir.name);
    }
    Ok(out)
}

/// Translates one source commit into the monorepo: looks up (or
/// substitutes) each parent's translation, composes the merged tree, and
/// records the new split→mono mapping.
fn translate_commit(
    commit: &QueuedCommit,
    dir_pos: usize,
    dirs: &mut DirList,
    cache: &mut GitCache,
    head_override: Option<Sha1Bytes>,
) -> Result<Sha1Bytes, InterleaveError> {
    if commit.parents.len() > MAX_PARENTS {
        return Err(InterleaveError::TooManyParents {
            commit: commit.commit.to_hex(),
            count: commit.parents.len(),
        });
    }

    let mut translated_parents = Vec::with_capacity(commit.parents.len());
    for (i, parent) in commit.parents.iter().enumerate() {
        if i == 0 {
            if let Some(head) = head_override {
                translated_parents.push(head);
                continue;
            }
        }
        let mono = cache
            .get_mono(*parent, dirs.get(dir_pos).name.as_str())?
            .ok_or_else(|| crate::error::GitCacheError::MissingTranslation(parent.to_hex()))?;
        translated_parents.push(mono);
    }

    let dir_name = dirs.get(dir_pos).name.clone();
    let is_root = dir_name == "-";
    let is_head = head_override.is_some();

    let mut items = Vec::new();
    if is_root {
        let own_items = cache.ls_tree(commit.tree)?;
        for item in &own_items {
            if item.kind == "tree" {
                return Err(InterleaveError::RootHasSubtree { commit: commit.commit.to_hex() });
            }
        }
        items.extend(own_items);
    } else {
        items.push(TreeEntry {
            mode: "040000".to_string(),
            kind: "tree".to_string(),
            sha: commit.tree,
            name: dir_name.clone(),
        });
    }

    let mut tracked_winner: Vec<Option<(usize, i64)>> = vec![None; dirs.len()];
    let mut blob_winner: Option<(usize, i64, Vec<TreeEntry>)> = None;
    let mut untracked_winner: Option<(usize, i64, Vec<TreeEntry>)> = None;
    let root_declared = dirs.find_dir("-").is_some();

    for (p_idx, parent) in translated_parents.iter().enumerate() {
        let rev = cache.get_rev(*parent)?;
        let tree = cache.get_commit_tree(*parent)?;
        for item in cache.ls_tree(tree)? {
            if item.name == dir_name {
                continue;
            }
            if let Some(tracked_pos) = dirs.iter().position(|d| d.name == item.name && d.tracked) {
                if item.kind != "tree" {
                    if is_root {
                        continue;
                    }
                } else {
                    let current = tracked_winner[tracked_pos];
                    let should_fill = match current {
                        None => true,
                        Some((0, _)) if is_head => false,
                        Some((_, old_rev)) => wins(rev, old_rev),
                    };
                    if should_fill {
                        tracked_winner[tracked_pos] = Some((p_idx, rev));
                        set_tracked_item(&mut items, &dirs.get(tracked_pos).name.clone(), item);
                    }
                    continue;
                }
            }
            if is_root && item.kind != "tree" {
                continue;
            }
            if item.kind != "tree" && root_declared {
                blob_winner = accept_class(blob_winner, p_idx, rev, item);
            } else {
                untracked_winner = accept_class(untracked_winner, p_idx, rev, item);
            }
        }
    }

    if let Some((_, _, blob_items)) = blob_winner {
        items.extend(blob_items);
    }
    if let Some((_, _, untracked_items)) = untracked_winner {
        items.extend(untracked_items);
    }

    if items.len() > MAX_TREE_ITEMS {
        return Err(InterleaveError::TooManyTreeItems {
            commit: commit.commit.to_hex(),
            count: items.len(),
        });
    }

    let new_tree = cache.mktree(&items)?;
    let new_commit = cache.commit_tree(commit.commit, &dir_name, new_tree, &translated_parents)?;
    cache.set_mono(commit.commit, new_commit)?;
    Ok(new_commit)
}

/// Revision tie-break: larger magnitude wins; on equal magnitude, the
/// upstream (positive) entry wins; on full equality the existing winner
/// keeps its slot.
fn wins(new_rev: i64, old_rev: i64) -> bool {
    let (new_mag, old_mag) = (new_rev.abs(), old_rev.abs());
    match new_mag.cmp(&old_mag) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => new_rev > 0 && old_rev <= 0,
    }
}

fn accept_class(
    current: Option<(usize, i64, Vec<TreeEntry>)>,
    p_idx: usize,
    rev: i64,
    item: TreeEntry,
) -> Option<(usize, i64, Vec<TreeEntry>)> {
    match current {
        None => Some((p_idx, rev, vec![item])),
        Some((owner, _, mut items)) if owner == p_idx => {
            items.push(item);
            Some((owner, rev, items))
        }
        Some((_, old_rev, _)) if wins(rev, old_rev) => Some((p_idx, rev, vec![item])),
        same => same,
    }
}

fn set_tracked_item(items: &mut Vec<TreeEntry>, dir_name: &str, new_item: TreeEntry) {
    for existing in items.iter_mut() {
        if existing.name == dir_name {
            *existing = new_item;
            return;
        }
    }
    items.push(new_item);
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    // Larger |rev| wins outright; equal magnitude favors the upstream
    // (positive) side; full ties keep whichever slot is already filled.
    #[test_case(100, 50, true; "larger magnitude wins")]
    #[test_case(50, 100, false; "smaller magnitude loses")]
    #[test_case(50, -50, true; "tie prefers upstream over downstream")]
    #[test_case(-50, 50, false; "tie: downstream does not override upstream")]
    #[test_case(50, 50, false; "full tie keeps old, positive")]
    #[test_case(-50, -50, false; "full tie keeps old, negative")]
    #[test_case(0, 0, false; "both unknown keeps old")]
    fn test_wins_decision_table(new_rev: i64, old_rev: i64, expected: bool) {
        assert_eq!(wins(new_rev, old_rev), expected);
    }

    #[test]
    fn test_set_tracked_item_replaces_existing() {
        let mut items = vec![TreeEntry {
            mode: "040000".to_string(),
            kind: "tree".to_string(),
            sha: Sha1Bytes::ABSENT,
            name: "clang".to_string(),
        }];
        let replacement = TreeEntry {
            mode: "040000".to_string(),
            kind: "tree".to_string(),
            sha: Sha1Bytes::from_hex(&"ab".repeat(20)).unwrap(),
            name: "clang".to_string(),
        };
        set_tracked_item(&mut items, "clang", replacement.clone());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].sha, replacement.sha);
    }

    #[test]
    fn test_set_tracked_item_inserts_when_absent() {
        let mut items = vec![TreeEntry {
            mode: "040000".to_string(),
            kind: "tree".to_string(),
            sha: Sha1Bytes::ABSENT,
            name: "clang".to_string(),
        }];
        let new_item = TreeEntry {
            mode: "040000".to_string(),
            kind: "tree".to_string(),
            sha: Sha1Bytes::from_hex(&"cd".repeat(20)).unwrap(),
            name: "lld".to_string(),
        };
        set_tracked_item(&mut items, "lld", new_item.clone());
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|i| i.name == "lld" && i.sha == new_item.sha));
        assert!(items.iter().any(|i| i.name == "clang"));
    }
}
