// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::DecodeError;
use std::path::{Path, PathBuf};

/// Maximum number of hashes any filter can use.
///
/// Bounded by the seed table length.
pub const MAX_HASHES: usize = 512;

/// On-disk header region size, in bytes.
///
/// The serialized key/value block is NUL-padded out to this size and the
/// bit payload starts immediately after it. Absolute compatibility
/// contract; do not touch.
pub const HEADER_LEN: usize = 4096;

/// Sizing and identity of one benign-traffic filter
///
/// Calculations follow the standard optimal formulas, see
/// <https://en.wikipedia.org/wiki/Bloom_filter#Probability_of_false_positives>
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilterParams {
    /// Number of bits in the filter; always a multiple of 8
    pub bit_length: u64,

    /// Number of hash functions per item
    pub num_hashes: usize,

    /// IP protocol number of the stored traffic
    pub ip_protocol: u8,

    /// TCP or UDP port of the stored traffic
    pub port: u16,

    /// Minimum stored n-gram length, in bytes
    pub min_ngram: usize,

    /// Maximum stored n-gram length, in bytes
    pub max_ngram: usize,

    /// Total payload bytes fed into the filter (statistic only)
    pub bytes_processed: u64,
}

impl FilterParams {
    /// Sizes a filter for `items` insertions at false-positive
    /// probability `p_fp`.
    ///
    /// The optimal bit count is rounded up to the next power of two
    /// (then to a whole byte, minimum 8 bits) so the modulo in the bit
    /// indexer maps uniformly; the hash count is clamped to
    /// `[1, MAX_HASHES]`.
    ///
    /// # Panics
    ///
    /// Panics if `items` is zero or `p_fp` is outside `(0, 1)`.
    #[must_use]
    pub fn with_capacity(
        items: u64,
        p_fp: f64,
        ip_protocol: u8,
        port: u16,
        min_ngram: usize,
        max_ngram: usize,
    ) -> Self {
        assert!(items > 0);
        assert!(p_fp > 0.0 && p_fp < 1.0);

        let ln2 = std::f64::consts::LN_2;

        log::debug!("expected number of insertions: {items}");
        log::debug!("desired probability of false alarm: {p_fp}");

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let optimal = (-(items as f64) * p_fp.ln() / (ln2 * ln2)).round() as u64;

        let bit_length = optimal.next_power_of_two().max(8);
        log::debug!("bit length: {bit_length} (optimal {optimal})");

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let num_hashes = (ln2 * bit_length as f64 / items as f64).round() as usize;
        let num_hashes = num_hashes.clamp(1, MAX_HASHES);
        log::debug!("number of hashes: {num_hashes}");

        Self {
            bit_length,
            num_hashes,
            ip_protocol,
            port,
            min_ngram,
            max_ngram,
            bytes_processed: 0,
        }
    }

    /// Byte length of the bit payload.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        (self.bit_length / 8) as usize
    }

    /// Whether two filters may be combined or compared.
    ///
    /// Traffic identity, n-gram window and geometry must all agree.
    #[must_use]
    pub fn compatible_with(&self, other: &Self) -> bool {
        self.ip_protocol == other.ip_protocol
            && self.port == other.port
            && self.min_ngram == other.min_ngram
            && self.max_ngram == other.max_ngram
            && self.bit_length == other.bit_length
            && self.num_hashes == other.num_hashes
    }

    /// Canonical file name of this filter under a filter directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        filter_file_name(self.ip_protocol, self.port, self.min_ngram, self.max_ngram)
    }

    /// Serializes the `KEY = VALUE` header block, NUL-padded to
    /// [`HEADER_LEN`].
    #[must_use]
    pub fn serialize_header(&self) -> Vec<u8> {
        let text = format!(
            "IP_PROTOCOL_NUMBER = {}\n\
             TCP_IP_PORT_NUM = {}\n\
             BITLENGTH = {}\n\
             NUM_HASHES = {}\n\
             MIN_NGRAM_SIZE = {}\n\
             MAX_NGRAM_SIZE = {}\n\
             NUM_PAYLOAD_BYTES_PROCESSED = {}\n",
            self.ip_protocol,
            self.port,
            self.bit_length,
            self.num_hashes,
            self.min_ngram,
            self.max_ngram,
            self.bytes_processed,
        );
        debug_assert!(text.len() < HEADER_LEN);

        let mut header = vec![0u8; HEADER_LEN];
        header[..text.len()].copy_from_slice(text.as_bytes());
        header
    }

    /// Parses a [`HEADER_LEN`]-byte header region.
    pub fn parse_header(header: &[u8]) -> Result<Self, DecodeError> {
        if header.len() < HEADER_LEN {
            return Err(DecodeError::UnexpectedEof);
        }

        let end = header.iter().position(|&b| b == 0).unwrap_or(HEADER_LEN);
        let text = std::str::from_utf8(&header[..end])
            .map_err(|_| DecodeError::InvalidHeader("filter header is not ASCII"))?;

        let mut params = Self {
            bit_length: 0,
            num_hashes: 0,
            ip_protocol: 0,
            port: 0,
            min_ngram: 0,
            max_ngram: 0,
            bytes_processed: 0,
        };

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(DecodeError::InvalidHeader("expected KEY = VALUE line"));
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "IP_PROTOCOL_NUMBER" => {
                    params.ip_protocol = parse(value, "IP_PROTOCOL_NUMBER")?;
                }
                "TCP_IP_PORT_NUM" => params.port = parse(value, "TCP_IP_PORT_NUM")?,
                "BITLENGTH" => params.bit_length = parse(value, "BITLENGTH")?,
                "NUM_HASHES" => params.num_hashes = parse(value, "NUM_HASHES")?,
                "MIN_NGRAM_SIZE" => params.min_ngram = parse(value, "MIN_NGRAM_SIZE")?,
                "MAX_NGRAM_SIZE" => params.max_ngram = parse(value, "MAX_NGRAM_SIZE")?,
                "NUM_PAYLOAD_BYTES_PROCESSED" => {
                    params.bytes_processed = parse(value, "NUM_PAYLOAD_BYTES_PROCESSED")?;
                }
                _ => {
                    log::warn!("unknown filter header property: {key}");
                }
            }
        }

        if params.bit_length == 0 || params.bit_length % 8 != 0 {
            return Err(DecodeError::InvalidHeader("BITLENGTH"));
        }
        if params.num_hashes == 0 || params.num_hashes > MAX_HASHES {
            return Err(DecodeError::InvalidHeader("NUM_HASHES"));
        }

        Ok(params)
    }
}

fn parse<T: std::str::FromStr>(value: &str, key: &'static str) -> Result<T, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidValue(key))
}

/// Canonical `proto_<p>_port_<q>_min_<m>_max_<M>.bloom` naming.
#[must_use]
pub fn filter_file_name(ip_protocol: u8, port: u16, min_ngram: usize, max_ngram: usize) -> String {
    format!("proto_{ip_protocol}_port_{port}_min_{min_ngram}_max_{max_ngram}.bloom")
}

/// Full path of a filter under a filter directory.
#[must_use]
pub fn filter_path(
    dir: &Path,
    ip_protocol: u8,
    port: u16,
    min_ngram: usize,
    max_ngram: usize,
) -> PathBuf {
    dir.join(filter_file_name(ip_protocol, port, min_ngram, max_ngram))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn sizing_law() {
        let params = FilterParams::with_capacity(1_000, 1e-5, 6, 80, 4, 4);
        assert_eq!(32_768, params.bit_length);
        assert_eq!(23, params.num_hashes);

        let params = FilterParams::with_capacity(1_000, 0.01, 6, 80, 4, 4);
        assert_eq!(16_384, params.bit_length);
        assert_eq!(11, params.num_hashes);

        let params = FilterParams::with_capacity(1_000, 0.1, 6, 80, 4, 4);
        assert_eq!(8_192, params.bit_length);
        assert_eq!(6, params.num_hashes);

        let params = FilterParams::with_capacity(10, 1e-20, 6, 80, 4, 4);
        assert_eq!(1_024, params.bit_length);
        assert_eq!(71, params.num_hashes);
    }

    #[test]
    fn sizing_clamps_hash_count() {
        let params = FilterParams::with_capacity(1, 1e-250, 6, 80, 4, 4);
        assert_eq!(2_048, params.bit_length);
        assert_eq!(MAX_HASHES, params.num_hashes);

        let params = FilterParams::with_capacity(1_000, 0.99, 6, 80, 4, 4);
        assert_eq!(32, params.bit_length);
        assert_eq!(1, params.num_hashes);
    }

    #[test]
    fn bit_length_is_byte_aligned() {
        for (items, p_fp) in [(1u64, 0.5), (3, 0.3), (1_000_000, 1e-7)] {
            let params = FilterParams::with_capacity(items, p_fp, 17, 53, 3, 9);
            assert_eq!(0, params.bit_length % 8);
            assert!(params.bit_length >= 8);
            assert!(params.bit_length.is_power_of_two());
        }
    }

    #[test]
    fn header_round_trip() -> Result<(), DecodeError> {
        let mut params = FilterParams::with_capacity(1_000, 1e-5, 17, 53, 3, 9);
        params.bytes_processed = 123_456_789;

        let header = params.serialize_header();
        assert_eq!(HEADER_LEN, header.len());

        let restored = FilterParams::parse_header(&header)?;
        assert_eq!(params, restored);

        Ok(())
    }

    #[test]
    fn header_rejects_garbage() {
        let mut header = vec![0u8; HEADER_LEN];
        header[..13].copy_from_slice(b"BITLENGTH = x");
        assert!(FilterParams::parse_header(&header).is_err());

        // missing NUM_HASHES
        let mut header = vec![0u8; HEADER_LEN];
        header[..17].copy_from_slice(b"BITLENGTH = 32768");
        assert!(FilterParams::parse_header(&header).is_err());

        assert!(FilterParams::parse_header(&[0u8; 16]).is_err());
    }

    #[test]
    fn compatibility_check() {
        let a = FilterParams::with_capacity(1_000, 1e-5, 6, 80, 4, 8);
        let mut b = a.clone();
        assert!(a.compatible_with(&b));

        b.bytes_processed = 999;
        assert!(a.compatible_with(&b), "statistics must not affect identity");

        b.port = 443;
        assert!(!a.compatible_with(&b));
    }

    #[test]
    fn canonical_file_name() {
        let params = FilterParams::with_capacity(1_000, 1e-5, 6, 80, 4, 8);
        assert_eq!("proto_6_port_80_min_4_max_8.bloom", params.file_name());
    }
}
