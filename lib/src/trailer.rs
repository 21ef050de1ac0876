// Copyright 2024 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Parsing `Key: Value` trailers out of a commit message's trailing
//! paragraph. [`crate::git_cache`] uses this to find an `llvm-rev:` trailer
//! when looking up a split commit's SVN revision, and to recognize the
//! `apple-llvm-split-commit`/`apple-llvm-split-dir` trailers this crate
//! itself writes on every merged commit.

use itertools::Itertools as _;
use thiserror::Error;

/// A single `Key: Value` trailer line.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Trailer {
    pub key: String,
    /// Trimmed at both ends; retains embedded newlines and the leading
    /// space continuation marker for multi-line values.
    pub value: String,
}

#[derive(Error, Debug)]
pub enum TrailerParseError {
    #[error("the trailer paragraph can't contain a blank line")]
    BlankLine,
    #[error("invalid trailer line: {line}")]
    NonTrailerLine { line: String },
}

/// Parses the trailing paragraph of `body` as a block of trailers. Returns
/// an empty vector if the message is a single paragraph (no trailing
/// paragraph to speak of) or if the trailing paragraph contains a line that
/// isn't itself a trailer (unless that non-trailer line is `git`'s own
/// "(cherry picked from commit ...)" marker, which is tolerated).
pub fn parse_description_trailers(body: &str) -> Vec<Trailer> {
    let (trailers, blank, found_git_trailer, non_trailer) = parse_trailers_impl(body);
    if !blank {
        vec![]
    } else if non_trailer.is_some() && !found_git_trailer {
        vec![]
    } else {
        trailers
    }
}

/// Like [`parse_description_trailers`], but for a string that is known to
/// be exactly one trailer paragraph: returns an error instead of silently
/// discarding anything that doesn't parse as a trailer.
pub fn parse_trailers(body: &str) -> Result<Vec<Trailer>, TrailerParseError> {
    let (trailers, blank, _, non_trailer) = parse_trailers_impl(body);
    if blank {
        return Err(TrailerParseError::BlankLine);
    }
    if let Some(line) = non_trailer {
        return Err(TrailerParseError::NonTrailerLine { line });
    }
    Ok(trailers)
}

fn parse_trailers_impl(body: &str) -> (Vec<Trailer>, bool, bool, Option<String>) {
    // Trailers sit at the end of the message; walk backwards so a colon
    // appearing earlier in the body is never mistaken for one.
    let lines = body.trim_ascii_end().lines().rev();
    let trailer_re =
        regex::Regex::new(r"^([a-zA-Z0-9-]+) *: *(.*)$").expect("trailer regex is valid");
    let mut trailers: Vec<Trailer> = Vec::new();
    let mut multiline_value = vec![];
    let mut found_blank = false;
    let mut found_git_trailer = false;
    let mut non_trailer_line = None;
    for line in lines {
        if line.starts_with(' ') {
            multiline_value.push(line);
        } else if let Some(groups) = trailer_re.captures(line) {
            let key = groups[1].to_string();
            multiline_value.push(groups.get(2).unwrap().as_str());
            multiline_value[0] = multiline_value[0].trim_ascii_end();
            let value = multiline_value.iter().rev().join("\n");
            multiline_value.clear();
            if key == "Signed-off-by" {
                found_git_trailer = true;
            }
            trailers.push(Trailer { key, value });
        } else if line.starts_with("(cherry picked from commit ") {
            found_git_trailer = true;
            non_trailer_line = Some(line.to_owned());
            multiline_value.clear();
        } else if line.trim_ascii().is_empty() {
            found_blank = true;
            break;
        } else {
            multiline_value.clear();
            non_trailer_line = Some(line.to_owned());
        }
    }
    trailers.reverse();
    (trailers, found_blank, found_git_trailer, non_trailer_line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_trailers() {
        let description = "split commit from upstream llvm\n\
             \n\
             apple-llvm-split-commit: 1111111111111111111111111111111111111111\n\
             apple-llvm-split-dir: llvm/\n\
             Change-Id: I1234567890abcdef1234567890abcdef12345678\n";

        let trailers = parse_description_trailers(description);
        assert_eq!(trailers.len(), 3);
        assert_eq!(trailers[0].key, "apple-llvm-split-commit");
        assert_eq!(
            trailers[0].value,
            "1111111111111111111111111111111111111111"
        );
        assert_eq!(trailers[1].key, "apple-llvm-split-dir");
        assert_eq!(trailers[1].value, "llvm/");
        assert_eq!(trailers[2].key, "Change-Id");
    }

    #[test]
    fn test_trailers_with_colon_in_body() {
        let description = "subject\n\
             \n\
             Summary: some text with a colon: right here\n\
             more body text.\n\
             \n\
             Change-Id: I1234567890abcdef1234567890abcdef12345678\n";

        let trailers = parse_description_trailers(description);
        assert_eq!(trailers.len(), 1);
        assert_eq!(trailers[0].key, "Change-Id");
    }

    #[test]
    fn test_multiline_trailer() {
        let description = "subject\n\
             \n\
             key: This is a very long value, with spaces and\n\
             \u{20}newlines in it.\n";

        let trailers = parse_description_trailers(description);
        assert_eq!(trailers.len(), 1);
        assert_eq!(trailers[0].key, "key");
        assert_eq!(
            trailers[0].value,
            "This is a very long value, with spaces and\n newlines in it."
        );
    }

    #[test]
    fn test_ignore_line_in_trailer() {
        let description = "subject\n\
             \n\
             Signed-off-by: Random J Developer <random@developer.example.org>\n\
             [lucky@maintainer.example.org: struct foo moved from foo.c to foo.h]\n\
             Signed-off-by: Lucky K Maintainer <lucky@maintainer.example.org>\n";

        let trailers = parse_description_trailers(description);
        assert_eq!(trailers.len(), 2);
    }

    #[test]
    fn test_trailers_with_single_line_description() {
        let description = "subject line with no body";
        let trailers = parse_description_trailers(description);
        assert_eq!(trailers.len(), 0);
    }

    #[test]
    fn test_parse_trailers() {
        let trailers_txt = "foo: 1\nbar: 2\n";
        let trailers = parse_trailers(trailers_txt).expect("trailers to be valid");
        assert_eq!(trailers.len(), 2);
        assert_eq!(trailers[0].key, "foo");
        assert_eq!(trailers[0].value, "1");
        assert_eq!(trailers[1].key, "bar");
        assert_eq!(trailers[1].value, "2");
    }

    #[test]
    fn test_blank_line_in_trailers() {
        let trailers = "foo: 1\n\nfoo: 2\n";
        let res = parse_trailers(trailers);
        assert!(matches!(res, Err(TrailerParseError::BlankLine)));
    }

    #[test]
    fn test_non_trailer_line_in_trailers() {
        let trailers = "bar\nfoo: 1\n";
        let res = parse_trailers(trailers);
        assert!(matches!(res, Err(TrailerParseError::NonTrailerLine { line: _ })));
    }

    #[test]
    fn test_llvm_rev_trailer() {
        let description = "fix something upstream\n\n\
             llvm-rev: 482910\n";
        let trailers = parse_description_trailers(description);
        assert_eq!(trailers.len(), 1);
        assert_eq!(trailers[0].key, "llvm-rev");
        assert_eq!(trailers[0].value, "482910");
    }

    #[test]
    fn test_invalid_key() {
        let description = "subject\n\nf_o_o: bar\n";
        let trailers = parse_description_trailers(description);
        assert_eq!(trailers.len(), 0);
    }

    #[test]
    fn test_content_after_trailer() {
        let description = "subject\n\nfoo: bar\nbaz\n";
        let trailers = parse_description_trailers(description);
        assert_eq!(trailers.len(), 0);
    }

    #[test]
    fn test_cherry_pick_trailer() {
        let description = "subject\n\n\
             some non-trailer text\n\
             foo: bar\n\
             (cherry picked from commit 72bb9f9cf4bbb6bbb11da9cda4499c55c44e87b9)\n";
        let trailers = parse_description_trailers(description);
        assert_eq!(trailers.len(), 1);
        assert_eq!(trailers[0].key, "foo");
        assert_eq!(trailers[0].value, "bar");
    }
}
