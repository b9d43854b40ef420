// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-packet n-gram mining for single-attack extraction.
//!
//! Every n-gram of an attack payload that the benign filter has never
//! seen is a novelty candidate. A coverage histogram over byte
//! positions then condenses the candidates into local-maximum plateau
//! fragments, one per coverage peak.

use crate::bloom::BloomFilter;

/// A mined candidate fragment
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ngram {
    /// The candidate bytes
    pub content: Vec<u8>,

    /// Byte offset within the source packet
    pub offset: usize,

    /// 1-based index of the source packet
    pub packet: usize,
}

/// Enumerates the novel n-grams of one payload.
///
/// An n-gram is novel iff the benign filter does not contain it.
pub fn novel_ngrams(
    filter: &BloomFilter,
    payload: &[u8],
    packet: usize,
    min_depth: usize,
    max_depth: usize,
) -> crate::Result<Vec<Ngram>> {
    let mut novel = Vec::new();
    let mut total = 0usize;

    if payload.len() < min_depth {
        return Ok(novel);
    }

    for offset in 0..=payload.len() - min_depth {
        let longest = max_depth.min(payload.len() - offset);
        for depth in min_depth..=longest {
            let ngram = &payload[offset..offset + depth];
            total += 1;

            if !filter.contains(ngram)? {
                novel.push(Ngram {
                    content: ngram.to_vec(),
                    offset,
                    packet,
                });
            }
        }
    }

    log::debug!(
        "packet #{packet}: {} of {total} n-grams survive the benign filter",
        novel.len(),
    );

    Ok(novel)
}

/// Coverage count per byte position, over a set of mined n-grams.
#[must_use]
pub fn coverage_histogram(payload_len: usize, ngrams: &[Ngram]) -> Vec<usize> {
    let mut histogram = vec![0usize; payload_len];

    for ngram in ngrams {
        let end = (ngram.offset + ngram.content.len()).min(payload_len);
        for slot in &mut histogram[ngram.offset..end] {
            *slot += 1;
        }
    }

    histogram
}

/// Emits one fragment per local-maximum coverage plateau.
///
/// Walking left to right, a rising count opens a run; the run is
/// emitted as a fragment when the count drops. A trailing run that
/// reaches the end of the payload never sees a drop and is not
/// emitted.
#[must_use]
pub fn local_maxima(payload: &[u8], histogram: &[usize], packet: usize) -> Vec<Ngram> {
    let mut fragments = Vec::new();

    let mut peak = 0usize;
    let mut start_run = 0usize;
    let mut in_run = false;

    for (i, &count) in histogram.iter().enumerate() {
        if count > peak {
            peak = count;
            start_run = i;
            in_run = true;
        } else if count < peak {
            if in_run {
                fragments.push(Ngram {
                    content: payload[start_run..i].to_vec(),
                    offset: start_run,
                    packet,
                });
                in_run = false;
            }
            peak = count;
            start_run = i;
        }
    }

    fragments
}

/// Keeps only the shortest representatives of a set of byte strings.
///
/// Every string that contains a strictly shorter member as a substring
/// is removed; the result never contains two distinct strings where one
/// is a substring of the other.
#[must_use]
pub fn substring_minimal(strings: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut sorted: Vec<&Vec<u8>> = strings.iter().collect();
    sorted.sort();
    sorted.dedup();
    sorted.sort_by_key(|s| s.len());

    let mut kept: Vec<Vec<u8>> = Vec::new();

    for candidate in sorted {
        let contains_kept = kept.iter().any(|shorter| {
            candidate
                .windows(shorter.len())
                .any(|window| window == shorter.as_slice())
        });
        if !contains_kept {
            kept.push(candidate.clone());
        }
    }

    kept
}

/// Drops strings that occur as proper substrings of longer members.
///
/// The inverse reduction of [`substring_minimal`]; used on mined
/// cluster segments where the longest common region is the signature.
#[must_use]
pub fn drop_contained(strings: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut sorted: Vec<&Vec<u8>> = strings.iter().collect();
    sorted.sort();
    sorted.dedup();

    let kept: Vec<Vec<u8>> = sorted
        .iter()
        .filter(|candidate| {
            !sorted.iter().any(|longer| {
                longer.len() > candidate.len()
                    && longer
                        .windows(candidate.len())
                        .any(|window| window == candidate.as_slice())
            })
        })
        .map(|s| (*s).clone())
        .collect();

    kept
}
