//! Thin wrapper around the `git` binary, used as the object store for both
//! reading split-repo commits and writing the merged mono history. No git
//! object is ever parsed from loose/pack files directly; everything goes
//! through `git rev-parse`, `git log`, `git ls-tree`, `git mktree`, and
//! `git commit-tree`, exactly as a human operator would from the shell.

use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use crate::error::GitCacheError;
use crate::sha1::Sha1Bytes;

/// One entry of a tree listing: `git ls-tree` mode/type/sha/name, or the
/// equivalent input line for `git mktree`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: String,
    pub sha: Sha1Bytes,
    pub name: String,
}

/// A split commit's metadata, as read from `git log` for one commit. Author
/// and committer name/email/date are kept apart (rather than pre-joined)
/// since [`GitSubprocessContext::commit_tree`] needs them as separate
/// environment variables and the cache needs them in a specific order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitMetadata {
    pub tree: Sha1Bytes,
    pub parents: Vec<Sha1Bytes>,
    pub author_name: String,
    pub author_email: String,
    pub author_date: String,
    pub committer_name: String,
    pub committer_email: String,
    pub committer_date: String,
    pub message: String,
}

impl CommitMetadata {
    /// The canonical cache string: `an\ncn\nad\ncd\nae\nce\nbody`.
    pub fn cache_string(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}",
            self.author_name,
            self.committer_name,
            self.author_date,
            self.committer_date,
            self.author_email,
            self.committer_email,
            self.message
        )
    }
}

pub struct GitSubprocessContext {
    git_dir: PathBuf,
    git_executable: PathBuf,
}

impl GitSubprocessContext {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
            git_executable: PathBuf::from("git"),
        }
    }

    pub fn with_executable(git_dir: impl Into<PathBuf>, git_executable: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
            git_executable: git_executable.into(),
        }
    }

    fn create_command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.git_executable);
        cmd.args(["-c", "core.fsmonitor=false"])
            .arg("--git-dir")
            .arg(&self.git_dir)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>, GitCacheError> {
        tracing::debug!(?args, git_dir = %self.git_dir.display(), "spawning git subprocess");
        let joined = args.join(" ");
        let child = self
            .create_command(args)
            .spawn()
            .map_err(|source| GitCacheError::Spawn { args: joined.clone(), source })?;
        let output = child
            .wait_with_output()
            .map_err(|source| GitCacheError::Spawn { args: joined.clone(), source })?;
        if !output.status.success() {
            return Err(GitCacheError::NonZeroExit {
                args: joined,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output.stdout)
    }

    fn run_text(&self, args: &[&str]) -> Result<String, GitCacheError> {
        let bytes = self.run(args)?;
        String::from_utf8(bytes).map_err(|err| GitCacheError::UnparsableOutput {
            args: args.join(" "),
            reason: format!("output is not valid UTF-8: {err}"),
        })
    }

    /// Resolves `rev` (a ref or commit-ish) to its SHA-1, or `None` if it
    /// does not exist.
    pub fn rev_parse(&self, rev: &str) -> Result<Option<Sha1Bytes>, GitCacheError> {
        let args = ["rev-parse", "--verify", "--quiet", rev];
        let child = self
            .create_command(&args)
            .spawn()
            .map_err(|source| GitCacheError::Spawn { args: args.join(" "), source })?;
        let output = child
            .wait_with_output()
            .map_err(|source| GitCacheError::Spawn { args: args.join(" "), source })?;
        if !output.status.success() {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&output.stdout);
        parse_sha1_line(text.trim(), &args).map(Some)
    }

    /// Reads one commit's tree, parents, author/committer identity and raw
    /// date strings, and full message body.
    pub fn commit_metadata(&self, commit: &str) -> Result<CommitMetadata, GitCacheError> {
        const SEP: &str = "\x01";
        let format =
            format!("%T{SEP}%P{SEP}%an{SEP}%ae{SEP}%ad{SEP}%cn{SEP}%ce{SEP}%cd{SEP}%B");
        let args = ["log", "-1", "--date=raw", &format!("--format={format}"), commit];
        let text = self.run_text(&args)?;
        let mut fields = text.splitn(9, '\x01');
        let args_joined = args.join(" ");
        let err = || GitCacheError::UnparsableOutput {
            args: args_joined.clone(),
            reason: "expected 9 fields from git log".to_string(),
        };
        let tree_hex = fields.next().ok_or_else(err)?;
        let parents_hex = fields.next().ok_or_else(err)?;
        let author_name = fields.next().ok_or_else(err)?.to_string();
        let author_email = fields.next().ok_or_else(err)?.to_string();
        let author_date = fields.next().ok_or_else(err)?.to_string();
        let committer_name = fields.next().ok_or_else(err)?.to_string();
        let committer_email = fields.next().ok_or_else(err)?.to_string();
        let committer_date = fields.next().ok_or_else(err)?.to_string();
        let message = fields.next().ok_or_else(err)?.trim_end_matches('\n').to_string();

        let tree = Sha1Bytes::from_hex(tree_hex.trim()).ok_or_else(|| GitCacheError::UnparsableOutput {
            args: args_joined.clone(),
            reason: format!("bad tree sha {tree_hex:?}"),
        })?;
        let parents = parents_hex
            .split_whitespace()
            .map(|hex| {
                Sha1Bytes::from_hex(hex).ok_or_else(|| GitCacheError::UnparsableOutput {
                    args: args_joined.clone(),
                    reason: format!("bad parent sha {hex:?}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CommitMetadata {
            tree,
            parents,
            author_name,
            author_email,
            author_date,
            committer_name,
            committer_email,
            committer_date,
            message,
        })
    }

    /// Lists the immediate children of `tree` (non-recursive, like the
    /// original `git ls-tree <tree>`).
    pub fn ls_tree(&self, tree: &Sha1Bytes) -> Result<Vec<TreeEntry>, GitCacheError> {
        let hex = tree.to_hex();
        let args = ["ls-tree", "-z", &hex];
        let bytes = self.run(&args)?;
        let text = String::from_utf8_lossy(&bytes);
        text.split('\0')
            .filter(|line| !line.is_empty())
            .map(|line| parse_ls_tree_line(line, &args))
            .collect()
    }

    /// Builds a new tree object from `entries`, returning its SHA-1.
    pub fn mktree(&self, entries: &[TreeEntry]) -> Result<Sha1Bytes, GitCacheError> {
        use std::io::Write as _;
        let mut input = String::new();
        for entry in entries {
            input.push_str(&format!(
                "{} {} {}\t{}\0",
                entry.mode,
                entry.kind,
                entry.sha.to_hex(),
                entry.name
            ));
        }
        let args = ["mktree", "-z"];
        let mut child = self
            .create_command(&args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| GitCacheError::Spawn { args: args.join(" "), source })?;
        child
            .stdin
            .take()
            .expect("stdin piped")
            .write_all(input.as_bytes())
            .map_err(|source| GitCacheError::Spawn { args: args.join(" "), source })?;
        let output = child
            .wait_with_output()
            .map_err(|source| GitCacheError::Spawn { args: args.join(" "), source })?;
        if !output.status.success() {
            return Err(GitCacheError::NonZeroExit {
                args: args.join(" "),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        parse_sha1_line(text.trim(), &args)
    }

    /// Creates a new commit object pointing at `tree` with `parents`, the
    /// given `message` (trailers already appended), and the originating
    /// split commit's author/committer identity and raw dates verbatim.
    pub fn commit_tree(
        &self,
        tree: &Sha1Bytes,
        parents: &[Sha1Bytes],
        base: &CommitMetadata,
        message: &str,
    ) -> Result<Sha1Bytes, GitCacheError> {
        use std::io::Write as _;
        let tree_hex = tree.to_hex();
        let mut args: Vec<String> = vec!["commit-tree".to_string(), tree_hex];
        for parent in parents {
            args.push("-p".to_string());
            args.push(parent.to_hex());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut cmd = self.create_command(&arg_refs);
        cmd.stdin(Stdio::piped())
            .env("GIT_AUTHOR_NAME", &base.author_name)
            .env("GIT_AUTHOR_EMAIL", &base.author_email)
            .env("GIT_AUTHOR_DATE", &base.author_date)
            .env("GIT_COMMITTER_NAME", &base.committer_name)
            .env("GIT_COMMITTER_EMAIL", &base.committer_email)
            .env("GIT_COMMITTER_DATE", &base.committer_date);
        let mut child = cmd
            .spawn()
            .map_err(|source| GitCacheError::Spawn { args: arg_refs.join(" "), source })?;
        child
            .stdin
            .take()
            .expect("stdin piped")
            .write_all(message.as_bytes())
            .map_err(|source| GitCacheError::Spawn { args: arg_refs.join(" "), source })?;
        let output = child
            .wait_with_output()
            .map_err(|source| GitCacheError::Spawn { args: arg_refs.join(" "), source })?;
        if !output.status.success() {
            return Err(GitCacheError::NonZeroExit {
                args: arg_refs.join(" "),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        parse_sha1_line(text.trim(), &arg_refs)
    }
}

fn parse_sha1_line(line: &str, args: &[&str]) -> Result<Sha1Bytes, GitCacheError> {
    Sha1Bytes::from_hex(line).ok_or_else(|| GitCacheError::UnparsableOutput {
        args: args.join(" "),
        reason: format!("expected a 40-character sha1, got {line:?}"),
    })
}

fn parse_ls_tree_line(line: &str, args: &[&str]) -> Result<TreeEntry, GitCacheError> {
    let err = || GitCacheError::UnparsableOutput {
        args: args.join(" "),
        reason: format!("malformed ls-tree line {line:?}"),
    };
    let (header, name) = line.split_once('\t').ok_or_else(err)?;
    let mut parts = header.splitn(3, ' ');
    let mode = parts.next().ok_or_else(err)?.to_string();
    let kind = parts.next().ok_or_else(err)?.to_string();
    let sha_hex = parts.next().ok_or_else(err)?;
    let sha = Sha1Bytes::from_hex(sha_hex).ok_or_else(err)?;
    Ok(TreeEntry {
        mode,
        kind,
        sha,
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sha1_line_ok() {
        let hex = "ab".repeat(20);
        assert_eq!(parse_sha1_line(&hex, &["x"]).unwrap().to_hex(), hex);
    }

    #[test]
    fn test_parse_sha1_line_rejects_junk() {
        assert!(parse_sha1_line("not-a-sha", &["x"]).is_err());
    }

    #[test]
    fn test_parse_ls_tree_line() {
        let sha = "cd".repeat(20);
        let line = format!("100644 blob {sha}\tfoo/bar.txt");
        let entry = parse_ls_tree_line(&line, &["ls-tree"]).unwrap();
        assert_eq!(entry.mode, "100644");
        assert_eq!(entry.kind, "blob");
        assert_eq!(entry.name, "foo/bar.txt");
        assert_eq!(entry.sha.to_hex(), sha);
    }

    #[test]
    fn test_parse_ls_tree_line_rejects_missing_tab() {
        assert!(parse_ls_tree_line("100644 blob deadbeef", &["ls-tree"]).is_err());
    }
}
