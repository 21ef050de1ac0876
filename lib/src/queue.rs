//! Parses the `start <dir> / <fparent> <ct>... / all / <commit> <tree>
//! [<parent>...]... / done` translation-queue protocol read from stdin.

use crate::dir_list::DirList;
use crate::error::QueueParseError;
use crate::git_cache::GitCache;
use crate::sha1::Sha1Bytes;

const MAX_PARENTS: usize = 128;

/// One first-parent entry: the commit and its (possibly clamped) sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstParent {
    pub dir: usize,
    pub commit: Sha1Bytes,
    pub ct: i64,
}

/// One `all`-list commit: its tree and parent SHAs, as declared by the
/// source (not yet translated into the monorepo).
#[derive(Debug, Clone)]
pub struct QueuedCommit {
    pub commit: Sha1Bytes,
    pub tree: Sha1Bytes,
    pub parents: Vec<Sha1Bytes>,
}

/// One `start ... all ... done` block: a source directory's first-parent
/// spine plus every commit (first-parent or ancestor) it introduces.
#[derive(Debug, Clone)]
pub struct SourceBlock {
    pub dir: usize,
    pub fparents: Vec<FirstParent>,
    pub commits: Vec<QueuedCommit>,
}

/// The parsed queue: every block's first-parents merged into one
/// monotonically non-decreasing-by-`ct` vector (earliest at the back,
/// stable within a source), plus the per-source commit lists for
/// ancestor walking during interleaving.
#[derive(Debug, Default)]
pub struct Queue {
    pub fparents: Vec<FirstParent>,
    pub blocks: Vec<SourceBlock>,
}

fn parse_sha1(text: &str, line: usize) -> Result<Sha1Bytes, QueueParseError> {
    Sha1Bytes::from_hex(text).ok_or_else(|| QueueParseError::MalformedSha1 {
        line,
        text: text.to_string(),
    })
}

fn parse_ct(text: &str, line: usize) -> Result<i64, QueueParseError> {
    let ct: i64 = text.parse().map_err(|_| QueueParseError::MalformedTimestamp {
        line,
        text: text.to_string(),
    })?;
    if ct < 0 {
        return Err(QueueParseError::MalformedTimestamp {
            line,
            text: text.to_string(),
        });
    }
    Ok(ct)
}

/// Reads the whole queue protocol from `input`, warming `cache`'s
/// `commit_trees` and recording every declared commit's parents.
pub fn parse_queue(
    input: &str,
    dirs: &DirList,
    cache: &mut GitCache,
) -> Result<Queue, QueueParseError> {
    let mut queue = Queue::default();
    let mut lines = input.lines().enumerate().peekable();
    let ends_with_newline = input.is_empty() || input.ends_with('\n');
    if !ends_with_newline {
        return Err(QueueParseError::MissingNewline { line: input.lines().count() });
    }

    while let Some((lineno, raw)) = lines.next() {
        let line_no = lineno + 1;
        let Some(rest) = raw.strip_prefix("start ") else {
            return Err(QueueParseError::UnknownDirective {
                line: line_no,
                directive: raw.to_string(),
            });
        };
        let dir_name = rest.trim();
        let dir_pos = dirs
            .iter()
            .position(|d| d.name == dir_name)
            .ok_or_else(|| QueueParseError::UnknownDirectory {
                line: line_no,
                name: dir_name.to_string(),
            })?;

        let mut fparents = Vec::new();
        let mut last_ct: Option<i64> = None;
        loop {
            let (lineno, raw) = lines.peek().copied().ok_or(QueueParseError::UnknownDirective {
                line: line_no,
                directive: "<eof>".to_string(),
            })?;
            if raw == "all" {
                lines.next();
                break;
            }
            lines.next();
            let line_no = lineno + 1;
            let mut parts = raw.splitn(2, ' ');
            let sha_text = parts.next().unwrap_or("");
            let ct_text = parts.next().ok_or_else(|| QueueParseError::TrailingJunk {
                line: line_no,
                rest: raw.to_string(),
            })?;
            if ct_text.contains(' ') {
                return Err(QueueParseError::TrailingJunk {
                    line: line_no,
                    rest: ct_text.to_string(),
                });
            }
            let commit = parse_sha1(sha_text, line_no)?;
            let mut ct = parse_ct(ct_text, line_no)?;
            if let Some(prev) = last_ct {
                if ct > prev {
                    tracing::warn!(
                        dir = dir_name,
                        commit = %commit,
                        ct,
                        clamped_to = prev,
                        "clock skew: clamping first-parent timestamp"
                    );
                    ct = prev;
                }
            }
            last_ct = Some(ct);
            fparents.push(FirstParent { dir: dir_pos, commit, ct });
        }

        let mut commits = Vec::new();
        loop {
            let (lineno, raw) = lines.next().ok_or(QueueParseError::UnknownDirective {
                line: line_no,
                directive: "<eof>".to_string(),
            })?;
            if raw == "done" {
                break;
            }
            let line_no = lineno + 1;
            let mut parts = raw.split(' ');
            let sha_text = parts.next().unwrap_or("");
            let tree_text = parts.next().ok_or_else(|| QueueParseError::TrailingJunk {
                line: line_no,
                rest: raw.to_string(),
            })?;
            let commit = parse_sha1(sha_text, line_no)?;
            let tree = parse_sha1(tree_text, line_no)?;
            let mut parents = Vec::new();
            for text in parts {
                if text.is_empty() {
                    continue;
                }
                parents.push(parse_sha1(text, line_no)?);
            }
            if parents.len() > MAX_PARENTS {
                return Err(QueueParseError::TooManyParents {
                    dir: dir_name.to_string(),
                    count: parents.len(),
                });
            }
            cache.set_mono_tree_hint(commit, tree);
            commits.push(QueuedCommit { commit, tree, parents });
        }

        for fp in &fparents {
            if !commits.iter().any(|c| c.commit == fp.commit) {
                return Err(QueueParseError::FirstParentNotInAll {
                    dir: dir_name.to_string(),
                    commit: fp.commit.to_hex(),
                });
            }
        }

        queue.fparents.extend(fparents.iter().copied());
        queue.blocks.push(SourceBlock { dir: dir_pos, fparents, commits });
    }

    // Stable sort into non-decreasing-by-ct order; `fparents` is consumed
    // back-to-front by the interleaver, so the back holds the earliest ct.
    queue.fparents.sort_by_key(|fp| std::cmp::Reverse(fp.ct));
    Ok(queue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_subprocess::GitSubprocessContext;

    fn dirs_with(names: &[&str]) -> DirList {
        let mut dirs = DirList::new();
        for name in names {
            dirs.add_dir(name).unwrap();
        }
        dirs
    }

    fn cache() -> GitCache {
        let dir = tempfile::tempdir().unwrap();
        let ctx = GitSubprocessContext::new(dir.path().join("git"));
        let cache = GitCache::open(ctx, dir.path()).unwrap();
        std::mem::forget(dir);
        cache
    }

    fn sha(byte: u8) -> String {
        format!("{byte:02x}").repeat(20)
    }

    #[test]
    fn test_single_block_roundtrip() {
        let dirs = dirs_with(&["llvm"]);
        let mut gc = cache();
        let input = format!(
            "start llvm\n{} 1000\nall\n{} {} {}\ndone\n",
            sha(0xaa),
            sha(0xaa),
            sha(0xbb),
            sha(0xcc)
        );
        let queue = parse_queue(&input, &dirs, &mut gc).unwrap();
        assert_eq!(queue.fparents.len(), 1);
        assert_eq!(queue.blocks.len(), 1);
        assert_eq!(queue.blocks[0].commits.len(), 1);
        assert_eq!(queue.blocks[0].commits[0].parents.len(), 1);
    }

    #[test]
    fn test_missing_newline_rejected() {
        let dirs = dirs_with(&["llvm"]);
        let mut gc = cache();
        let input = "start llvm".to_string();
        assert!(matches!(
            parse_queue(&input, &dirs, &mut gc),
            Err(QueueParseError::MissingNewline { .. })
        ));
    }

    #[test]
    fn test_unknown_directory_rejected() {
        let dirs = dirs_with(&["llvm"]);
        let mut gc = cache();
        let input = "start clang\nall\ndone\n".to_string();
        assert!(matches!(
            parse_queue(&input, &dirs, &mut gc),
            Err(QueueParseError::UnknownDirectory { .. })
        ));
    }

    #[test]
    fn test_first_parent_must_appear_in_all() {
        let dirs = dirs_with(&["llvm"]);
        let mut gc = cache();
        let input = format!("start llvm\n{} 1000\nall\ndone\n", sha(0xaa));
        assert!(matches!(
            parse_queue(&input, &dirs, &mut gc),
            Err(QueueParseError::FirstParentNotInAll { .. })
        ));
    }

    #[test]
    fn test_too_many_parents_rejected() {
        let dirs = dirs_with(&["llvm"]);
        let mut gc = cache();
        let parents: Vec<String> = (0..129).map(|i| sha((i % 255) as u8)).collect();
        let input = format!(
            "start llvm\n{} 1000\nall\n{} {} {}\ndone\n",
            sha(0xaa),
            sha(0xaa),
            sha(0xbb),
            parents.join(" ")
        );
        assert!(matches!(
            parse_queue(&input, &dirs, &mut gc),
            Err(QueueParseError::TooManyParents { .. })
        ));
    }

    #[test]
    fn test_clock_skew_clamped_not_rejected() {
        let dirs = dirs_with(&["llvm"]);
        let mut gc = cache();
        let input = format!(
            "start llvm\n{} 1000\n{} 1010\nall\n{} {}\n{} {}\ndone\n",
            sha(0xaa),
            sha(0xbb),
            sha(0xaa),
            sha(0xcc),
            sha(0xbb),
            sha(0xcc)
        );
        let queue = parse_queue(&input, &dirs, &mut gc).unwrap();
        assert_eq!(queue.fparents[0].ct, 1000);
        assert_eq!(queue.fparents[1].ct, 1000);
    }

    #[test]
    fn test_multiple_blocks_merge_sorted() {
        let dirs = dirs_with(&["llvm", "clang"]);
        let mut gc = cache();
        let input = format!(
            "start llvm\n{} 1000\nall\n{} {}\ndone\n\
             start clang\n{} 1005\n{} 999\nall\n{} {}\n{} {}\ndone\n",
            sha(0xaa),
            sha(0xaa),
            sha(0xbb),
            sha(0x11),
            sha(0x22),
            sha(0x11),
            sha(0xbb),
            sha(0x22),
            sha(0xbb)
        );
        let queue = parse_queue(&input, &dirs, &mut gc).unwrap();
        // back-to-front: earliest first: [0.., 999, 1000, 1005]
        let cts: Vec<i64> = queue.fparents.iter().map(|fp| fp.ct).collect();
        assert_eq!(cts, vec![1005, 1000, 999]);
    }
}
