// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Common-segment mining over a cluster of byte strings.
//!
//! The miner finds the shortest of all pairwise longest common
//! substrings, confirms it appears in every input, and recurses on the
//! text before and after it. Concatenating the result with wildcard
//! gaps yields an ordered list of segments common to every input.

/// Longest common (contiguous) substring of two byte strings.
///
/// Ties resolve to the match ending earliest in `a`.
#[must_use]
pub fn longest_common_substring(a: &[u8], b: &[u8]) -> Vec<u8> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }

    // Rolling rows of the classic suffix-length grid
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];

    let mut longest = 0;
    let mut end_in_a = 0;

    for (i, &byte_a) in a.iter().enumerate() {
        for (j, &byte_b) in b.iter().enumerate() {
            if byte_a == byte_b {
                row[j + 1] = prev[j] + 1;
                if row[j + 1] > longest {
                    longest = row[j + 1];
                    end_in_a = i + 1;
                }
            } else {
                row[j + 1] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut row);
    }

    a[end_in_a - longest..end_in_a].to_vec()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// The "atomic" substring common to all inputs.
///
/// Starts from the shortest pairwise LCS; if that is still too long to
/// occur in every input, the search is narrowed to the pairwise LCSes
/// themselves and repeated, shrinking toward the common core.
fn common_core(inputs: &[Vec<u8>]) -> Vec<u8> {
    let mut reduced: Vec<Vec<u8>> = inputs.to_vec();
    let mut last_len = usize::MAX;

    loop {
        let mut candidates = Vec::new();
        let mut shortest: Option<Vec<u8>> = None;

        for i in 0..reduced.len() {
            for j in i + 1..reduced.len() {
                let lcs = longest_common_substring(&reduced[i], &reduced[j]);
                if shortest.as_ref().is_none_or(|s| lcs.len() < s.len()) {
                    shortest = Some(lcs.clone());
                }
                candidates.push(lcs);
            }
        }

        let Some(shortest) = shortest else {
            return Vec::new();
        };
        if shortest.is_empty() {
            return Vec::new();
        }

        if inputs.iter().all(|input| contains(input, &shortest)) {
            return shortest;
        }

        // Each narrowing round must shrink the candidate, or the search
        // has stalled and there is no common core
        if shortest.len() >= last_len {
            return Vec::new();
        }
        last_len = shortest.len();

        reduced = candidates;
    }
}

/// Mines the ordered list of byte segments common to all inputs.
///
/// Returns an empty list when the inputs share no substring at all.
#[must_use]
pub fn mine_segments(inputs: &[Vec<u8>]) -> Vec<Vec<u8>> {
    if inputs.len() < 2 {
        return Vec::new();
    }

    let core = common_core(inputs);
    if core.is_empty() {
        return Vec::new();
    }

    // Split every input at its first occurrence of the core and recurse
    // on both sides; a side only survives if every input contributes
    let mut before = Vec::new();
    let mut after = Vec::new();

    for input in inputs {
        #[allow(clippy::expect_used)]
        let location = find(input, &core).expect("core must occur in every input");

        if location > 0 {
            before.push(input[..location].to_vec());
        }

        let rest = location + core.len();
        if rest < input.len() {
            after.push(input[rest..].to_vec());
        }
    }

    let mut result = Vec::new();

    if before.len() == inputs.len() {
        result.extend(mine_segments(&before));
    }
    result.push(core);
    if after.len() == inputs.len() {
        result.extend(mine_segments(&after));
    }

    result
}

/// Checks that `segments` appear in order (with arbitrary gaps) within
/// `input`.
#[must_use]
pub fn segments_occur_in_order(input: &[u8], segments: &[Vec<u8>]) -> bool {
    let mut rest = input;
    for segment in segments {
        match find(rest, segment) {
            Some(location) => rest = &rest[location + segment.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn lcs_basic() {
        assert_eq!(
            b"abc".to_vec(),
            longest_common_substring(b"zabcz", b"qqabcq"),
        );
        assert_eq!(b"".to_vec(), longest_common_substring(b"abc", b"xyz"));
        assert_eq!(b"".to_vec(), longest_common_substring(b"", b"xyz"));
        assert_eq!(
            b"abcd".to_vec(),
            longest_common_substring(b"abcd", b"abcd"),
        );
    }

    #[test]
    fn mine_identical_pair() {
        let inputs = vec![b"Xabc".to_vec(), b"Xabc".to_vec()];
        assert_eq!(vec![b"Xabc".to_vec()], mine_segments(&inputs));
    }

    #[test]
    fn mine_shared_infix() {
        let inputs = vec![b"XabcY".to_vec(), b"XabcZ".to_vec()];
        let segments = mine_segments(&inputs);

        // "Xabc" is common; the differing tails are not
        assert_eq!(vec![b"Xabc".to_vec()], segments);
    }

    #[test]
    fn mine_two_separated_segments() {
        let inputs = vec![
            b"AAAA123BBBB".to_vec(),
            b"AAAA789BBBB".to_vec(),
            b"AAAA456BBBB".to_vec(),
        ];
        let segments = mine_segments(&inputs);

        assert_eq!(vec![b"AAAA".to_vec(), b"BBBB".to_vec()], segments);

        for input in &inputs {
            assert!(segments_occur_in_order(input, &segments));
        }
    }

    #[test]
    fn mine_output_is_common_to_all_inputs() {
        let inputs = vec![
            b"GET /vuln.cgi?exploit=AAAABBBB HTTP/1.0".to_vec(),
            b"POST /vuln.cgi?exploit=CCCCBBBB HTTP/1.1".to_vec(),
            b"GET /vuln.cgi?exploit=XYZ HTTP/1.0".to_vec(),
        ];
        let segments = mine_segments(&inputs);
        assert!(!segments.is_empty());

        for input in &inputs {
            assert!(
                segments_occur_in_order(input, &segments),
                "segments must occur in order in {input:?}",
            );
        }
    }

    #[test]
    fn mine_disjoint_inputs_yield_nothing() {
        let inputs = vec![b"aaaaa".to_vec(), b"bbbbb".to_vec()];
        assert!(mine_segments(&inputs).is_empty());
    }

    #[test]
    fn ordered_occurrence_check() {
        let segments = vec![b"ab".to_vec(), b"cd".to_vec()];
        assert!(segments_occur_in_order(b"xxabyycdzz", &segments));
        assert!(!segments_occur_in_order(b"xxcdyyabzz", &segments));
    }
}
