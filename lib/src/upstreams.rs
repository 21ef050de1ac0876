//! Hand-rolled recursive-descent parser for the `upstreams` file: one
//! `name: <name>` line per source followed by zero or more `upstream:`
//! lines describing the sources it tracks relative to.

use crate::error::UpstreamsParseError;

/// One `upstream: <name> <num-upstreams> <commits-size> <svnbase-size>`
/// relationship declared under a source's `name:` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub name: String,
    pub num_upstreams: u64,
    pub commits_size: u64,
    pub svnbase_size: u64,
}

/// One source's block: its own name plus the upstreams it was last synced
/// against, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub upstreams: Vec<Upstream>,
}

#[derive(Debug, Default)]
pub struct UpstreamsFile {
    pub sources: Vec<Source>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'/' | b':'))
}

impl UpstreamsFile {
    pub fn parse(text: &str) -> Result<Self, UpstreamsParseError> {
        let mut sources = Vec::new();
        let mut lines = text.lines().enumerate().peekable();

        while let Some((lineno, raw)) = lines.next() {
            let line = lineno + 1;
            let name = raw
                .strip_prefix("name: ")
                .ok_or(UpstreamsParseError::MissingName { line })?
                .trim();
            if !valid_name(name) {
                return Err(UpstreamsParseError::InvalidName {
                    line,
                    name: name.to_string(),
                });
            }

            let mut upstreams = Vec::new();
            while let Some((_, next_raw)) = lines.peek() {
                let Some(rest) = next_raw.strip_prefix("upstream: ") else {
                    break;
                };
                lines.next();
                let fields: Vec<&str> = rest.split_whitespace().collect();
                let [up_name, num_upstreams, commits_size, svnbase_size] = fields[..] else {
                    return Err(UpstreamsParseError::MalformedUpstream { line: line + 1 });
                };
                if !valid_name(up_name) {
                    return Err(UpstreamsParseError::InvalidName {
                        line: line + 1,
                        name: up_name.to_string(),
                    });
                }
                if up_name == name {
                    return Err(UpstreamsParseError::SelfUpstream(name.to_string()));
                }
                if upstreams.iter().any(|u: &Upstream| u.name == up_name) {
                    return Err(UpstreamsParseError::DuplicateUpstream(up_name.to_string()));
                }
                let parse_u64 = |text: &str| {
                    text.parse::<u64>()
                        .map_err(|_| UpstreamsParseError::MalformedUpstream { line: line + 1 })
                };
                upstreams.push(Upstream {
                    name: up_name.to_string(),
                    num_upstreams: parse_u64(num_upstreams)?,
                    commits_size: parse_u64(commits_size)?,
                    svnbase_size: parse_u64(svnbase_size)?,
                });
            }

            sources.push(Source { name: name.to_string(), upstreams });
        }

        Ok(Self { sources })
    }

    pub fn find(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_source_no_upstreams() {
        let file = UpstreamsFile::parse("name: llvm/llvm-project\n").unwrap();
        assert_eq!(file.sources.len(), 1);
        assert_eq!(file.sources[0].name, "llvm/llvm-project");
        assert!(file.sources[0].upstreams.is_empty());
    }

    #[test]
    fn test_source_with_upstream() {
        let text = "name: apple/llvm-project\nupstream: llvm/llvm-project 0 100 20\n";
        let file = UpstreamsFile::parse(text).unwrap();
        assert_eq!(file.sources[0].upstreams.len(), 1);
        let up = &file.sources[0].upstreams[0];
        assert_eq!(up.name, "llvm/llvm-project");
        assert_eq!(up.num_upstreams, 0);
        assert_eq!(up.commits_size, 100);
        assert_eq!(up.svnbase_size, 20);
    }

    #[test]
    fn test_multiple_sources() {
        let text = "name: a\nname: b\nupstream: a 0 1 1\n";
        let file = UpstreamsFile::parse(text).unwrap();
        assert_eq!(file.sources.len(), 2);
        assert_eq!(file.sources[1].upstreams[0].name, "a");
    }

    #[test]
    fn test_missing_name_rejected() {
        let text = "upstream: a 0 1 1\n";
        assert!(matches!(
            UpstreamsFile::parse(text),
            Err(UpstreamsParseError::MissingName { .. })
        ));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let text = "name: bad name\n";
        assert!(matches!(
            UpstreamsFile::parse(text),
            Err(UpstreamsParseError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_self_upstream_rejected() {
        let text = "name: a\nupstream: a 0 1 1\n";
        assert!(matches!(
            UpstreamsFile::parse(text),
            Err(UpstreamsParseError::SelfUpstream(_))
        ));
    }

    #[test]
    fn test_duplicate_upstream_rejected() {
        let text = "name: a\nupstream: b 0 1 1\nupstream: b 0 2 2\n";
        assert!(matches!(
            UpstreamsFile::parse(text),
            Err(UpstreamsParseError::DuplicateUpstream(_))
        ));
    }

    #[test]
    fn test_malformed_upstream_rejected() {
        let text = "name: a\nupstream: b 0 1\n";
        assert!(matches!(
            UpstreamsFile::parse(text),
            Err(UpstreamsParseError::MalformedUpstream { .. })
        ));
    }
}
