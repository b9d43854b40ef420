// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Smith-Waterman local alignment over byte strings.
//!
//! The algorithm is the local-alignment grid of Jones & Pevzner,
//! "An Introduction to Bioinformatics Algorithms", section 6.8.

use crate::{Error, Result};
use rustc_hash::FxHashMap;
use std::path::Path;

/// Weights for insertions, deletions and substitutions
///
/// Defaults: match +1, mismatch -1, indel -1. Individual byte (pairs)
/// can be overridden from a scoring file with lines of the form
/// `ins 255 -1`, `del 84 -1`, `sub 37 72 1`.
#[derive(Clone, Debug)]
pub struct ScoringTable {
    match_score: i64,
    mismatch_score: i64,
    indel_score: i64,
    insert_overrides: FxHashMap<u8, i64>,
    delete_overrides: FxHashMap<u8, i64>,
    substitute_overrides: FxHashMap<(u8, u8), i64>,
}

impl Default for ScoringTable {
    fn default() -> Self {
        Self {
            match_score: 1,
            mismatch_score: -1,
            indel_score: -1,
            insert_overrides: FxHashMap::default(),
            delete_overrides: FxHashMap::default(),
            substitute_overrides: FxHashMap::default(),
        }
    }
}

impl ScoringTable {
    /// Loads overrides from a scoring file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut table = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                ["ins", byte, weight] => {
                    table
                        .insert_overrides
                        .insert(parse_byte(byte)?, parse_weight(weight)?);
                }
                ["del", byte, weight] => {
                    table
                        .delete_overrides
                        .insert(parse_byte(byte)?, parse_weight(weight)?);
                }
                ["sub", a, b, weight] => {
                    table
                        .substitute_overrides
                        .insert((parse_byte(a)?, parse_byte(b)?), parse_weight(weight)?);
                }
                _ => {
                    return Err(Error::InvalidConfig("bad scoring file line"));
                }
            }
        }

        Ok(table)
    }

    fn insertion(&self, byte: u8) -> i64 {
        *self.insert_overrides.get(&byte).unwrap_or(&self.indel_score)
    }

    fn deletion(&self, byte: u8) -> i64 {
        *self.delete_overrides.get(&byte).unwrap_or(&self.indel_score)
    }

    fn substitution(&self, a: u8, b: u8) -> i64 {
        if let Some(weight) = self.substitute_overrides.get(&(a, b)) {
            return *weight;
        }
        if a == b {
            self.match_score
        } else {
            self.mismatch_score
        }
    }
}

fn parse_byte(field: &str) -> Result<u8> {
    field
        .parse()
        .map_err(|_| Error::InvalidConfig("bad byte in scoring file"))
}

fn parse_weight(field: &str) -> Result<i64> {
    field
        .parse()
        .map_err(|_| Error::InvalidConfig("bad weight in scoring file"))
}

/// Highest-scoring locally aligned region of two strings
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Alignment {
    /// Maximum grid score
    pub score: i64,

    /// Span of the first string consumed by the optimal path
    pub substring_x: Vec<u8>,

    /// Span of the second string consumed by the optimal path
    pub substring_y: Vec<u8>,
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Step {
    Stop,
    Diagonal,
    Up,
    Left,
}

/// Runs Smith-Waterman over `x` and `y`.
///
/// Returns the maximum grid score and the contiguous spans of both
/// inputs covered by the traceback from the maximal cell. Empty inputs
/// align with score 0 and empty spans.
#[must_use]
pub fn local_alignment(x: &[u8], y: &[u8], scoring: &ScoringTable) -> Alignment {
    let rows = x.len() + 1;
    let cols = y.len() + 1;

    let mut score = vec![0i64; rows * cols];
    let mut step = vec![Step::Stop; rows * cols];

    let mut best = 0i64;
    let mut best_cell = (0usize, 0usize);

    for i in 1..rows {
        for j in 1..cols {
            let diagonal =
                score[(i - 1) * cols + (j - 1)] + scoring.substitution(x[i - 1], y[j - 1]);
            let up = score[(i - 1) * cols + j] + scoring.deletion(x[i - 1]);
            let left = score[i * cols + (j - 1)] + scoring.insertion(y[j - 1]);

            // A zero cell restarts the alignment; ties prefer the
            // diagonal so the traceback stays as compact as possible
            let mut value = 0;
            let mut direction = Step::Stop;
            for (candidate, candidate_dir) in [
                (diagonal, Step::Diagonal),
                (up, Step::Up),
                (left, Step::Left),
            ] {
                if candidate > value {
                    value = candidate;
                    direction = candidate_dir;
                }
            }

            score[i * cols + j] = value;
            step[i * cols + j] = direction;

            if value > best {
                best = value;
                best_cell = (i, j);
            }
        }
    }

    // Walk the path back to recover the consumed spans
    let (mut i, mut j) = best_cell;
    let (end_i, end_j) = best_cell;

    while step[i * cols + j] != Step::Stop {
        match step[i * cols + j] {
            Step::Diagonal => {
                i -= 1;
                j -= 1;
            }
            Step::Up => i -= 1,
            Step::Left => j -= 1,
            Step::Stop => {}
        }
    }

    Alignment {
        score: best,
        substring_x: x[i..end_i].to_vec(),
        substring_y: y[j..end_j].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn align(x: &[u8], y: &[u8]) -> Alignment {
        local_alignment(x, y, &ScoringTable::default())
    }

    #[test]
    fn identical_strings_align_fully() {
        let result = align(b"abcdef", b"abcdef");
        assert_eq!(6, result.score);
        assert_eq!(b"abcdef".to_vec(), result.substring_x);
        assert_eq!(b"abcdef".to_vec(), result.substring_y);
    }

    #[test]
    fn shared_infix_is_found() {
        let result = align(b"XXabcdYY", b"QQQabcdQ");
        assert_eq!(4, result.score);
        assert_eq!(b"abcd".to_vec(), result.substring_x);
        assert_eq!(b"abcd".to_vec(), result.substring_y);
    }

    #[test]
    fn single_gap_is_bridged() {
        // Five matches minus one deletion beats either flank alone
        let result = align(b"abXcde", b"abcde");
        assert_eq!(4, result.score);
        assert_eq!(b"abXcde".to_vec(), result.substring_x);
        assert_eq!(b"abcde".to_vec(), result.substring_y);
    }

    #[test]
    fn disjoint_strings_score_low() {
        let result = align(b"aaaa", b"bbbb");
        assert_eq!(0, result.score);
        assert!(result.substring_x.is_empty());
        assert!(result.substring_y.is_empty());
    }

    #[test]
    fn empty_input() {
        let result = align(b"", b"abc");
        assert_eq!(0, result.score);
        assert!(result.substring_x.is_empty());
    }

    #[test]
    fn alignment_is_symmetric_in_score() {
        let a = align(b"XabcY", b"XabcZ");
        let b = align(b"XabcZ", b"XabcY");
        assert_eq!(a.score, b.score);
        assert_eq!(4, a.score);
        assert_eq!(b"Xabc".to_vec(), a.substring_x);
    }

    #[test]
    fn score_dominates_common_substring_length() {
        use crate::extract::lcss::longest_common_substring;
        use rand::Rng;

        let mut rng = rand::rng();

        for _ in 0..25 {
            // Small alphabet so shared substrings actually occur
            let a: Vec<u8> = (0..40).map(|_| rng.random_range(b'a'..=b'd')).collect();
            let b: Vec<u8> = (0..40).map(|_| rng.random_range(b'a'..=b'd')).collect();

            let lcs = longest_common_substring(&a, &b);
            let alignment = align(&a, &b);

            // Aligning the bare LCS is always one admissible path
            assert!(
                alignment.score >= lcs.len() as i64,
                "score {} below LCS length {}",
                alignment.score,
                lcs.len(),
            );
        }
    }

    #[test]
    fn scoring_file_overrides() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scoring");
        std::fs::write(&path, "ins 88 -5\ndel 88 -5\nsub 97 98 1\n")?;

        let table = ScoringTable::from_file(&path)?;

        // 'a' (97) substituting for 'b' (98) now counts as a match
        let result = local_alignment(b"xaz", b"xbz", &table);
        assert_eq!(3, result.score);

        // gaps over 'X' (88) got expensive
        let result = local_alignment(b"ccXcc", b"cccc", &table);
        assert_eq!(2, result.score);

        Ok(())
    }

    #[test]
    fn scoring_file_rejects_garbage() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scoring");
        std::fs::write(&path, "frob 1 2\n")?;

        assert!(ScoringTable::from_file(&path).is_err());
        Ok(())
    }
}
