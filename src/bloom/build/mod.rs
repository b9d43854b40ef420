// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Filter construction from benign pcap traffic.
//!
//! Two build paths with identical observable output: a direct one that
//! inserts every n-gram inline, and a pipelined one that fans hashing
//! out over worker threads (see [`pipeline`]). Which one to use is a
//! throughput question only.

pub mod pipeline;

use crate::{
    bloom::BloomFilter,
    net::{extract_ipv4_payload, LinkType, PcapReader},
};
use pipeline::ThreadedBuild;
use std::path::Path;

/// Progress log interval, in payload bytes.
const BYTES_PROCESSED_DELTA: u64 = 100_000_000;

/// How filter construction executes
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildStrategy {
    /// Insert n-grams inline on the reader thread
    Direct,

    /// Producer / hasher / writer pipeline
    Pipelined {
        /// Number of hasher threads
        hashers: usize,
    },
}

/// Counters for one build run
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BuildReport {
    /// Frames read from the savefiles
    pub frames: u64,

    /// Frames dropped as unparsable
    pub skipped_frames: u64,

    /// Payload bytes fed into the filter
    pub payload_bytes: u64,
}

/// Destination for enumerated n-grams
pub trait NgramSink {
    /// Accepts one n-gram for insertion.
    fn put(&mut self, ngram: &[u8]) -> crate::Result<()>;
}

/// Inline insertion into an exclusively held filter
pub struct DirectSink<'a>(pub &'a mut BloomFilter);

impl NgramSink for DirectSink<'_> {
    fn put(&mut self, ngram: &[u8]) -> crate::Result<()> {
        self.0.insert(ngram)
    }
}

/// Inline insertion that also counts distinct-looking n-grams
///
/// A positive `contains` means every bit of the n-gram is already set,
/// so skipping the insert changes nothing and the novel counter gives a
/// (slightly undercounted, filter-accuracy) distinct-n-gram estimate.
pub struct CountingSink<'a> {
    filter: &'a mut BloomFilter,

    /// N-grams offered
    pub total: u64,

    /// N-grams whose bits were not all set yet
    pub novel: u64,
}

impl<'a> CountingSink<'a> {
    /// Wraps a filter for counted insertion.
    #[must_use]
    pub fn new(filter: &'a mut BloomFilter) -> Self {
        Self {
            filter,
            total: 0,
            novel: 0,
        }
    }
}

impl NgramSink for CountingSink<'_> {
    fn put(&mut self, ngram: &[u8]) -> crate::Result<()> {
        self.total += 1;

        if !self.filter.contains(ngram)? {
            self.novel += 1;
            self.filter.insert(ngram)?;
        }
        Ok(())
    }
}

/// Feeds every n-gram of `payload` within the depth window into `sink`.
///
/// For each offset, all depths from `min_depth` up to whatever fits in
/// the remaining bytes (capped at `max_depth`) are enumerated.
pub fn insert_payload<S: NgramSink>(
    sink: &mut S,
    payload: &[u8],
    min_depth: usize,
    max_depth: usize,
) -> crate::Result<()> {
    for offset in 0..payload.len() {
        let longest = max_depth.min(payload.len() - offset);
        for depth in min_depth..=longest {
            sink.put(&payload[offset..offset + depth])?;
        }
    }
    Ok(())
}

/// Builds up a filter from the TCP/UDP payloads of pcap savefiles.
///
/// Consumes and returns the filter so the pipelined path can move it
/// into its writer thread. The payload-byte statistic is updated before
/// returning; flushing is left to the caller.
pub fn build_from_pcaps<P: AsRef<Path>>(
    mut filter: BloomFilter,
    pcap_paths: &[P],
    strategy: BuildStrategy,
) -> crate::Result<(BloomFilter, BuildReport)> {
    let min_depth = filter.params().min_ngram;
    let max_depth = filter.params().max_ngram;

    let mut report = BuildReport::default();

    match strategy {
        BuildStrategy::Direct => {
            let mut sink = DirectSink(&mut filter);
            for path in pcap_paths {
                feed_file(&mut sink, path.as_ref(), min_depth, max_depth, &mut report)?;
            }
        }
        BuildStrategy::Pipelined { hashers } => {
            let mut build = ThreadedBuild::new(filter, hashers);
            for path in pcap_paths {
                feed_file(&mut build, path.as_ref(), min_depth, max_depth, &mut report)?;
            }
            // Blocks until every in-flight n-gram has been written
            filter = build.finish()?;
        }
    }

    log::info!(
        "finished input packets: {} frames, {} payload bytes, {} skipped",
        report.frames,
        report.payload_bytes,
        report.skipped_frames,
    );

    filter.add_bytes_processed(report.payload_bytes);

    Ok((filter, report))
}

fn feed_file<S: NgramSink>(
    sink: &mut S,
    path: &Path,
    min_depth: usize,
    max_depth: usize,
    report: &mut BuildReport,
) -> crate::Result<()> {
    log::info!("processing pcap file: {path:?}");

    let reader = PcapReader::open(path)?;
    if reader.link_type() != LinkType::Ethernet {
        log::error!("unsupported data-link protocol: {:?}", reader.link_type());
        return Err(crate::Error::Decode(crate::DecodeError::InvalidHeader(
            "pcap link type",
        )));
    }

    let mut next_report = BYTES_PROCESSED_DELTA;

    for frame in reader.frames() {
        let frame = frame?;
        report.frames += 1;

        let Some(l4) = extract_ipv4_payload(&frame.data) else {
            report.skipped_frames += 1;
            continue;
        };

        insert_payload(sink, l4.payload, min_depth, max_depth)?;
        report.payload_bytes += l4.payload.len() as u64;

        if report.payload_bytes > next_report {
            log::info!("bytes processed: {}", report.payload_bytes);
            next_report += BYTES_PROCESSED_DELTA;
        }
    }

    log::info!("finished processing: {path:?}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    struct CollectSink(Vec<Vec<u8>>);

    impl NgramSink for CollectSink {
        fn put(&mut self, ngram: &[u8]) -> crate::Result<()> {
            self.0.push(ngram.to_vec());
            Ok(())
        }
    }

    #[test]
    fn ngram_enumeration_window() -> crate::Result<()> {
        let mut sink = CollectSink(Vec::new());
        insert_payload(&mut sink, b"abcde", 2, 3)?;

        let expected: Vec<&[u8]> = vec![
            b"ab", b"abc", b"bc", b"bcd", b"cd", b"cde", b"de",
        ];
        assert_eq!(expected, sink.0);

        Ok(())
    }

    #[test]
    fn ngram_enumeration_fixed_depth() -> crate::Result<()> {
        let mut sink = CollectSink(Vec::new());
        insert_payload(&mut sink, b"abcdefghij", 4, 4)?;

        // 7 four-grams in a ten-byte payload
        assert_eq!(7, sink.0.len());
        assert_eq!(b"abcd".to_vec(), sink.0[0]);
        assert_eq!(b"ghij".to_vec(), sink.0[6]);

        Ok(())
    }

    #[test]
    fn short_payload_yields_nothing() -> crate::Result<()> {
        let mut sink = CollectSink(Vec::new());
        insert_payload(&mut sink, b"ab", 3, 6)?;
        assert!(sink.0.is_empty());
        Ok(())
    }

    #[test]
    fn counting_sink_tracks_novelty() -> crate::Result<()> {
        let mut filter = BloomFilter::with_capacity(1_000, 1e-5, 6, 80, 4, 4);
        let mut sink = CountingSink::new(&mut filter);

        insert_payload(&mut sink, b"abcdefgh", 4, 4)?;
        assert_eq!(5, sink.total);
        assert_eq!(5, sink.novel);

        // Replaying the same payload offers the same n-grams again
        insert_payload(&mut sink, b"abcdefgh", 4, 4)?;
        assert_eq!(10, sink.total);
        assert_eq!(5, sink.novel);

        assert!(filter.contains(b"abcd")?);

        Ok(())
    }
}
