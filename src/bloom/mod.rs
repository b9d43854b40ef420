// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Benign n-gram Bloom filter.
//!
//! Stores every n-gram (within a length window) of the payloads of large
//! amounts of known-benign traffic for a single TCP or UDP service. At
//! signature-extraction time the filter answers "has this byte string
//! been seen in benign traffic?", with false positives at a configured
//! probability, but never false negatives.

pub mod build;
mod params;
mod store;

pub use params::{filter_file_name, filter_path, FilterParams, HEADER_LEN, MAX_HASHES};
pub use store::BitStore;

use crate::hash::{hash128, HASH_SEEDS};
use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
    sync::Mutex,
};

/// Maps a byte string to its filter bit positions
///
/// Cheap to copy into worker threads; hashing is the only state-free
/// part of the filter, so the pipelined build path shares this and
/// nothing else.
#[derive(Clone, Copy, Debug)]
pub struct BitIndexer {
    num_hashes: usize,
    bit_length: u64,
}

impl BitIndexer {
    /// Indexer for a filter of `bit_length` bits probed `num_hashes`
    /// times per item.
    #[must_use]
    pub fn new(num_hashes: usize, bit_length: u64) -> Self {
        debug_assert!(num_hashes <= MAX_HASHES);
        Self {
            num_hashes,
            bit_length,
        }
    }

    /// Bit positions of `bytes`, one per hash function.
    ///
    /// Only the low half of each 128-bit hash is consumed; the bit
    /// length is a power of two, so the modulo keeps the distribution
    /// uniform.
    #[must_use]
    pub fn indices(&self, bytes: &[u8]) -> Vec<u64> {
        (0..self.num_hashes)
            .map(|i| hash128(bytes, HASH_SEEDS[i]).0 % self.bit_length)
            .collect()
    }
}

/// A benign n-gram Bloom filter
#[derive(Debug)]
pub struct BloomFilter {
    params: FilterParams,
    indexer: BitIndexer,
    store: BitStore,
}

impl BloomFilter {
    /// Creates an in-memory filter sized for `items` insertions at
    /// false-positive probability `p_fp`.
    #[must_use]
    pub fn with_capacity(
        items: u64,
        p_fp: f64,
        ip_protocol: u8,
        port: u16,
        min_ngram: usize,
        max_ngram: usize,
    ) -> Self {
        let params = FilterParams::with_capacity(items, p_fp, ip_protocol, port, min_ngram, max_ngram);
        Self::from_params(params)
    }

    /// Creates a zeroed in-memory filter from explicit parameters.
    #[must_use]
    pub fn from_params(params: FilterParams) -> Self {
        let indexer = BitIndexer::new(params.num_hashes, params.bit_length);
        let store = BitStore::zeroed(params.payload_len());
        Self {
            params,
            indexer,
            store,
        }
    }

    /// Restores a filter from its persistent file.
    ///
    /// With `in_memory` the whole bit payload is loaded up front;
    /// otherwise the file stays open and every probe seeks into it.
    pub fn from_file<P: AsRef<Path>>(path: P, in_memory: bool) -> crate::Result<Self> {
        let path = path.as_ref();
        log::debug!("opening filter file {path:?} (in_memory: {in_memory})");

        let mut file = if in_memory {
            File::open(path)?
        } else {
            File::options().read(true).write(true).open(path)?
        };

        let mut header = vec![0u8; HEADER_LEN];
        file.read_exact(&mut header)?;
        let params = FilterParams::parse_header(&header)?;
        let indexer = BitIndexer::new(params.num_hashes, params.bit_length);

        let store = if in_memory {
            let mut payload = vec![0u8; params.payload_len()];
            file.read_exact(&mut payload)?;
            BitStore::Memory(crate::bit_array::BitArray::from_bytes(
                payload.into_boxed_slice(),
            ))
        } else {
            BitStore::Disk(Mutex::new(file))
        };

        Ok(Self {
            params,
            indexer,
            store,
        })
    }

    /// The filter's sizing and identity.
    #[must_use]
    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    /// A copy of the filter's bit indexer, for worker threads.
    #[must_use]
    pub fn indexer(&self) -> BitIndexer {
        self.indexer
    }

    /// Marks a byte string as seen.
    pub fn insert(&mut self, bytes: &[u8]) -> crate::Result<()> {
        for idx in self.indexer.indices(bytes) {
            self.store.set(idx)?;
        }
        Ok(())
    }

    /// Sets a single pre-hashed bit position.
    ///
    /// The pipelined build path computes positions in worker threads and
    /// feeds them here through its single writer.
    pub fn set_bit(&mut self, idx: u64) -> crate::Result<()> {
        debug_assert!(idx < self.params.bit_length);
        self.store.set(idx)
    }

    /// Whether the byte string may have been seen.
    ///
    /// May return `true` for a string that was never inserted (false
    /// positive); never returns `false` for one that was.
    pub fn contains(&self, bytes: &[u8]) -> crate::Result<bool> {
        for idx in self.indexer.indices(bytes) {
            if !self.store.get(idx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Adds to the payload-byte statistic.
    pub fn add_bytes_processed(&mut self, bytes: u64) {
        self.params.bytes_processed += bytes;
    }

    /// Persists header and payload to `path`.
    ///
    /// Writes to a temporary file in the destination directory and
    /// renames it into place, so a crash never leaves a partial filter.
    pub fn flush<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();
        let folder = parent_dir(path);

        let mut file = tempfile::NamedTempFile::new_in(folder)?;
        file.write_all(&self.params.serialize_header())?;
        file.write_all(&self.store.read_payload(self.params.payload_len())?)?;
        file.flush()?;
        file.as_file_mut().sync_all()?;
        file.persist(path).map_err(|e| crate::Error::Io(e.error))?;

        log::debug!("flushed filter to {path:?}");

        Ok(())
    }

    /// Writes the union of two filters to `path`.
    ///
    /// Fails with [`crate::Error::FilterMismatch`] unless protocol,
    /// port, n-gram window and geometry all agree. The byte statistic
    /// is summed.
    pub fn write_combined<P: AsRef<Path>>(&self, other: &Self, path: P) -> crate::Result<()> {
        if !self.params.compatible_with(&other.params) {
            log::error!("filters do not match, refusing to combine");
            return Err(crate::Error::FilterMismatch);
        }

        let mut params = self.params.clone();
        params.bytes_processed = self.params.bytes_processed + other.params.bytes_processed;

        let mut payload = self.store.read_payload(self.params.payload_len())?;
        let other_payload = other.store.read_payload(other.params.payload_len())?;
        for (dst, src) in payload.iter_mut().zip(other_payload.iter()) {
            *dst |= src;
        }

        let path = path.as_ref();
        let folder = parent_dir(path);

        let mut file = tempfile::NamedTempFile::new_in(folder)?;
        file.write_all(&params.serialize_header())?;
        file.write_all(&payload)?;
        file.flush()?;
        file.as_file_mut().sync_all()?;
        file.persist(path).map_err(|e| crate::Error::Io(e.error))?;

        Ok(())
    }
}

/// Directory a target file lives in; a bare file name writes into the
/// working directory.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
