// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Pipelined filter construction.
//!
//! One producer (the pcap reader thread) pushes length-tagged n-grams
//! onto a bounded queue; N hashers pop them, drop recently-seen ones
//! through a per-thread LRU, and emit blocks of bit offsets onto a
//! second bounded queue; a single writer owns the filter and ORs the
//! bits in. Bit sets commute, so the finished filter is a deterministic
//! function of the input stream regardless of scheduling.
//!
//! Shutdown rides on channel disconnection: dropping the producer's
//! sender drains the hashers, and the last hasher dropping its block
//! sender drains the writer. No flags, no sleep-polling.

use crate::{
    bloom::{build::NgramSink, BitIndexer, BloomFilter},
    Error,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use lru::LruCache;
use std::{num::NonZeroUsize, thread::JoinHandle};

/// Longest n-gram the queue element can carry.
///
/// Exceeding this is a caller bug, not a data error.
pub const MAX_NGRAM_LEN: usize = 16;

/// Capacity of the n-gram queue (producer to hashers).
pub const NGRAM_QUEUE_LEN: usize = 65_534;

/// Capacity of the offset-block queue (hashers to writer).
pub const OFFSET_QUEUE_LEN: usize = 65_534;

/// Bit offsets per block.
///
/// Purely a transport optimization; block boundaries are not
/// observable in the finished filter.
pub const OFFSET_BLOCK_LEN: usize = 24;

/// Entries per hasher LRU cache.
pub const NUM_CACHE_ENTRIES: usize = 200_000;

/// Length-tagged inline n-gram, fixed-size so the queue never allocates
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NgramBuf {
    len: u8,
    bytes: [u8; MAX_NGRAM_LEN],
}

impl NgramBuf {
    /// Copies a byte span in; fails if it exceeds [`MAX_NGRAM_LEN`].
    #[must_use]
    pub fn new(ngram: &[u8]) -> Option<Self> {
        if ngram.len() > MAX_NGRAM_LEN {
            return None;
        }

        let mut bytes = [0u8; MAX_NGRAM_LEN];
        bytes[..ngram.len()].copy_from_slice(ngram);

        Some(Self {
            len: ngram.len() as u8,
            bytes,
        })
    }

    /// The carried bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }
}

/// Fixed-size batch of filter bit offsets
#[derive(Clone, Debug)]
struct OffsetBlock {
    len: u8,
    offsets: [u64; OFFSET_BLOCK_LEN],
}

impl OffsetBlock {
    fn from_slice(offsets: &[u64]) -> Self {
        debug_assert!(offsets.len() <= OFFSET_BLOCK_LEN);

        let mut block = Self {
            len: offsets.len() as u8,
            offsets: [0; OFFSET_BLOCK_LEN],
        };
        block.offsets[..offsets.len()].copy_from_slice(offsets);
        block
    }

    fn as_slice(&self) -> &[u64] {
        &self.offsets[..usize::from(self.len)]
    }
}

/// Running producer/hasher/writer pipeline
///
/// The filter moves into the writer thread for the duration of the
/// build and comes back out of [`ThreadedBuild::finish`].
pub struct ThreadedBuild {
    ngram_tx: Sender<NgramBuf>,
    hashers: Vec<JoinHandle<()>>,
    writer: JoinHandle<crate::Result<BloomFilter>>,
}

impl ThreadedBuild {
    /// Spawns `hasher_count` hashers and the writer.
    #[must_use]
    pub fn new(filter: BloomFilter, hasher_count: usize) -> Self {
        let hasher_count = hasher_count.max(1);
        log::debug!("starting build pipeline with {hasher_count} hashers");

        let (ngram_tx, ngram_rx) = bounded::<NgramBuf>(NGRAM_QUEUE_LEN);
        let (block_tx, block_rx) = bounded::<OffsetBlock>(OFFSET_QUEUE_LEN);

        let indexer = filter.indexer();

        let hashers = (0..hasher_count)
            .map(|thread_index| {
                let rx = ngram_rx.clone();
                let tx = block_tx.clone();
                std::thread::spawn(move || run_hasher(&rx, &tx, indexer, thread_index))
            })
            .collect();

        // The clones above keep the channels alive; the writer must see
        // disconnect once the hashers are done
        drop(ngram_rx);
        drop(block_tx);

        let writer = std::thread::spawn(move || run_writer(&block_rx, filter));

        Self {
            ngram_tx,
            hashers,
            writer,
        }
    }

    /// Enqueues one n-gram; blocks while the queue is full.
    pub fn insert(&self, ngram: &[u8]) -> crate::Result<()> {
        let buf = NgramBuf::new(ngram).ok_or(Error::NgramTooLong(ngram.len()))?;

        self.ngram_tx
            .send(buf)
            .map_err(|_| Error::Io(std::io::Error::other("build pipeline disconnected")))
    }

    /// Signals end of input and waits for all in-flight n-grams to be
    /// written, then hands the filter back.
    pub fn finish(self) -> crate::Result<BloomFilter> {
        drop(self.ngram_tx);

        for handle in self.hashers {
            #[allow(clippy::expect_used)]
            handle.join().expect("hasher thread panicked");
        }

        #[allow(clippy::expect_used)]
        self.writer.join().expect("writer thread panicked")
    }
}

impl NgramSink for ThreadedBuild {
    fn put(&mut self, ngram: &[u8]) -> crate::Result<()> {
        self.insert(ngram)
    }
}

fn run_hasher(
    rx: &Receiver<NgramBuf>,
    tx: &Sender<OffsetBlock>,
    indexer: BitIndexer,
    thread_index: usize,
) {
    #[allow(clippy::expect_used)]
    let cache_size = NonZeroUsize::new(NUM_CACHE_ENTRIES).expect("cache size is nonzero");
    let mut cache: LruCache<NgramBuf, ()> = LruCache::new(cache_size);

    let mut hits = 0u64;
    let mut misses = 0u64;

    // Iteration ends when the producer drops its sender and the queue
    // has drained
    for ngram in rx {
        if cache.get(&ngram).is_some() {
            // Its bits are already on their way to the writer; set bits
            // never clear, so replaying them would be a no-op
            hits += 1;
            continue;
        }
        misses += 1;

        let indices = indexer.indices(ngram.as_slice());
        cache.put(ngram, ());

        for chunk in indices.chunks(OFFSET_BLOCK_LEN) {
            if tx.send(OffsetBlock::from_slice(chunk)).is_err() {
                // Writer is gone; nothing left to do
                return;
            }
        }

        if misses % 10_000_000 == 0 {
            log::debug!("hasher #{thread_index}: {misses} misses, {hits} hits");
        }
    }

    log::debug!("hasher #{thread_index} shutting down ({misses} misses, {hits} hits)");
}

fn run_writer(rx: &Receiver<OffsetBlock>, mut filter: BloomFilter) -> crate::Result<BloomFilter> {
    let mut bits_set = 0u64;

    // Iteration ends when the last hasher drops its sender
    for block in rx {
        for &idx in block.as_slice() {
            filter.set_bit(idx)?;
            bits_set += 1;
        }
    }

    log::debug!("writer done after {bits_set} bit sets");

    Ok(filter)
}
