// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Automatic byte-level signature generation for network intrusion
//! detection.
//!
//! ##### About
//!
//! From a stream of packets flagged as suspicious by an anomaly
//! detector, this crate derives content signatures deployable as rules
//! in a signature-based IDS. Three subsystems carry the weight:
//!
//! - [`detector`]: a host-peering anomaly detector that condenses
//!   per-host peer sets over 60-second generations into running
//!   statistics and flags hosts whose peer counts become implausible.
//! - [`bloom`]: a large benign-traffic n-gram Bloom filter with a
//!   fixed on-disk format, built from pcap files either inline or
//!   through a producer/hasher/writer pipeline.
//! - [`extract`]: a signature extractor that clusters attack payloads
//!   by local alignment, mines the byte segments they share, keeps the
//!   ones benign traffic has never produced, and shapes them into
//!   `alert` rules.
//!
//! The crate provides pure algorithmic behavior over packet byte
//! streams; live capture and rule deployment sit outside it.
//!
//! # Example usage
//!
//! ```
//! use sigforge::{AsgEngine, BloomFilter, Config, Packet};
//! use sigforge::bloom::filter_path;
//! #
//! # let dir = tempfile::tempdir()?;
//!
//! // A benign filter for tcp/80, n-grams of 4 bytes
//! let mut filter = BloomFilter::with_capacity(1_000, 1e-5, 6, 80, 4, 4);
//! filter.insert(b"hell")?;
//! filter.insert(b"ello")?;
//! filter.flush(filter_path(dir.path(), 6, 80, 4, 4))?;
//!
//! // Feed one flagged packet through the extractor
//! let mut engine = AsgEngine::new(Config::new(dir.path()).depth_window(4, 4))?;
//! engine.set_detector_event_flags(false, false)?;
//! engine.append_attack()?;
//! engine.append_packet(Packet {
//!     time: 0.0,
//!     protocol: 6,
//!     src_port: 40000,
//!     dst_port: 80,
//!     payload: b"hello world".to_vec(),
//!     prob_attack: 1.0,
//! })?;
//!
//! let rules = engine.extract()?;
//! assert!(!rules.is_empty());
//! #
//! # Ok::<(), sigforge::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

#[doc(hidden)]
pub mod bit_array;

pub mod bloom;

mod config;

pub mod detector;

mod error;

pub mod export;

#[doc(hidden)]
pub mod hash;

pub mod extract;

pub mod net;

pub use {
    bloom::BloomFilter,
    config::Config,
    detector::AnomalyDetector,
    error::{DecodeError, Error, Result},
    extract::{AsgEngine, DetectorReport, Packet, Rule},
};
