// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Signature extraction from detector-flagged attack packets.
//!
//! Given a report of suspicious packets, the engine mines byte strings
//! that are characteristic of the attack and absent from benign
//! traffic, then shapes them into IDS content rules. Single-attack
//! reports are mined per packet; multi-attack reports are first split
//! into clusters by local-alignment similarity.

pub mod align;
pub mod dendrogram;
pub mod lcss;
pub mod mine;
pub mod report;
pub mod rules;

pub use report::{DetectorReport, Packet};
pub use rules::{Rule, RuleMaker};

use crate::{
    bloom::{filter_path, BloomFilter},
    Config, Error, Result,
};
use align::ScoringTable;
use dendrogram::{Dendrogram, DistanceMatrix};
use mine::{coverage_histogram, drop_contained, local_maxima, novel_ngrams, substring_minimal};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Lifecycle of one extraction run
///
/// `Ready -> Configured -> Loaded -> Emitted`; after extraction the
/// engine is terminal for its report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineState {
    /// Fresh engine, report shape not yet known
    Ready,

    /// Detector event flags are set
    Configured,

    /// At least one attack group is open
    Loaded,

    /// Extraction has run; the engine is spent
    Emitted,
}

/// Signature-extraction engine for one detector report
pub struct AsgEngine {
    config: Config,
    scoring: ScoringTable,
    state: EngineState,
    multi_attack: bool,
    boundaries_known: bool,
    report: DetectorReport,
}

impl AsgEngine {
    /// Creates an engine in `Ready` state.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let scoring = match &config.scoring_file {
            Some(path) => ScoringTable::from_file(path)?,
            None => ScoringTable::default(),
        };

        log::info!("extraction depth window: {}..={}", config.min_depth, config.max_depth);
        log::info!("filter directory: {:?}", config.bloom_filter_dir);

        Ok(Self {
            config,
            scoring,
            state: EngineState::Ready,
            multi_attack: false,
            boundaries_known: false,
            report: DetectorReport::default(),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Describes the shape of the incoming report.
    ///
    /// `multi_attack` marks a report holding many instances of the same
    /// attack; `boundaries_known` marks instances as pre-separated.
    pub fn set_detector_event_flags(
        &mut self,
        multi_attack: bool,
        boundaries_known: bool,
    ) -> Result<()> {
        if self.state != EngineState::Ready {
            return Err(Error::EngineState(self.state));
        }

        self.multi_attack = multi_attack;
        self.boundaries_known = boundaries_known;
        self.state = EngineState::Configured;
        Ok(())
    }

    /// Opens a new attack group in the report.
    pub fn append_attack(&mut self) -> Result<()> {
        match self.state {
            EngineState::Configured | EngineState::Loaded => {
                self.report.append_attack();
                self.state = EngineState::Loaded;
                Ok(())
            }
            state => Err(Error::EngineState(state)),
        }
    }

    /// Appends a packet to the current attack group.
    pub fn append_packet(&mut self, packet: Packet) -> Result<()> {
        if self.state != EngineState::Loaded {
            return Err(Error::EngineState(self.state));
        }
        if !self.report.append_packet(packet) {
            return Err(Error::EngineState(self.state));
        }
        Ok(())
    }

    /// Runs extraction and emits the rule records.
    ///
    /// Terminal: the engine transitions to `Emitted` whether or not the
    /// run succeeds, and a failed run emits no rules at all.
    pub fn extract(&mut self) -> Result<Vec<Rule>> {
        if self.state != EngineState::Loaded {
            return Err(Error::EngineState(self.state));
        }
        self.state = EngineState::Emitted;

        if self.multi_attack {
            if self.boundaries_known {
                log::error!("pre-separated extraction is not implemented");
                return Err(Error::InvalidConfig(
                    "pre-separated extraction is not implemented",
                ));
            }
            self.unsupervised_clustering()
        } else {
            self.single_attack()
        }
    }

    /// The single `(protocol, dst_port)` identity of the report.
    fn traffic_identity(&self) -> Result<(u8, u16)> {
        let mut protocols: FxHashMap<u8, usize> = FxHashMap::default();
        let mut ports: FxHashMap<u16, usize> = FxHashMap::default();

        for packet in self.report.packets() {
            *protocols.entry(packet.protocol).or_default() += 1;
            *ports.entry(packet.dst_port).or_default() += 1;
        }

        if protocols.is_empty() {
            return Err(Error::InvalidConfig("detector report has no packets"));
        }
        if protocols.len() != 1 || ports.len() != 1 {
            log::error!("need single protocol and port");
            return Err(Error::MixedTraffic);
        }

        #[allow(clippy::expect_used)]
        let protocol = *protocols.keys().next().expect("checked nonempty");
        #[allow(clippy::expect_used)]
        let port = *ports.keys().next().expect("checked nonempty");

        Ok((protocol, port))
    }

    /// Opens the benign filter matching the report's identity.
    fn open_filter(&self, protocol: u8, port: u16) -> Result<BloomFilter> {
        let path = filter_path(
            &self.config.bloom_filter_dir,
            protocol,
            port,
            self.config.min_depth,
            self.config.max_depth,
        );
        log::debug!("filter file name: {path:?}");

        let filter = BloomFilter::from_file(&path, self.config.bloom_from_memory)?;

        let params = filter.params();
        if params.min_ngram != self.config.min_depth
            || params.max_ngram != self.config.max_depth
            || params.ip_protocol != protocol
            || params.port != port
        {
            log::error!("filter {path:?} does not match the configured n-gram window");
            return Err(Error::FilterMismatch);
        }

        Ok(filter)
    }

    fn rule_maker(&self, protocol: u8, port: u16) -> Result<RuleMaker> {
        let name = match protocol {
            1 => "icmp",
            2 => "igmp",
            6 => "tcp",
            17 => "udp",
            other => {
                log::error!("unknown attack protocol: {other}");
                return Err(Error::InvalidConfig("unknown attack protocol"));
            }
        };

        Ok(RuleMaker::new(&self.config.rule_action, name, port))
    }

    /// Single-attack mining: novel n-grams, coverage plateaus, and a
    /// substring-minimal sweep over all candidates.
    fn single_attack(&self) -> Result<Vec<Rule>> {
        log::debug!("entering single-attack extraction");

        let (protocol, port) = self.traffic_identity()?;
        let filter = self.open_filter(protocol, port)?;
        let mut maker = self.rule_maker(protocol, port)?;

        let min_depth = self.config.min_depth;
        let max_depth = self.config.max_depth;

        let mut fragments = Vec::new();
        let mut candidates: Vec<Vec<u8>> = Vec::new();

        for (index, packet) in self.report.packets().enumerate() {
            let payload = &packet.payload;
            if payload.len() < max_depth {
                continue;
            }

            let novel = novel_ngrams(&filter, payload, index + 1, min_depth, max_depth)?;
            candidates.extend(novel.iter().map(|n| n.content.clone()));

            let histogram = coverage_histogram(payload.len(), &novel);
            fragments.extend(local_maxima(payload, &histogram, index + 1));
        }

        let mut rules = Vec::new();
        let mut seen: BTreeSet<Vec<u8>> = BTreeSet::new();

        // Coverage-plateau fragments first
        for fragment in fragments {
            if fragment.content.len() < min_depth {
                continue;
            }
            if !seen.insert(fragment.content.clone()) {
                continue;
            }
            rules.push(maker.content_rule("generated signature", &fragment.content));
        }

        // Then the shortest representatives of every novel n-gram
        for signature in substring_minimal(&candidates) {
            if !seen.insert(signature.clone()) {
                continue;
            }
            rules.push(maker.content_rule("generated signature", &signature));
        }

        log::info!("single-attack extraction emitted {} rules", rules.len());

        Ok(rules)
    }

    /// Clustered mining: alignment dendrogram, per-cluster common
    /// segments, novelty filtering, longest-representative reduction.
    fn unsupervised_clustering(&self) -> Result<Vec<Rule>> {
        log::debug!("entering unsupervised clustering");

        let (protocol, port) = self.traffic_identity()?;
        let filter = self.open_filter(protocol, port)?;
        let mut maker = self.rule_maker(protocol, port)?;

        let payloads: Vec<Vec<u8>> = self
            .report
            .packets()
            .map(|packet| packet.payload.clone())
            .collect();

        let matrix = DistanceMatrix::build(&payloads, &self.scoring);
        let tree = Dendrogram::build(&matrix);
        let clusters = tree.find_disjoint_sets(self.config.level_percent_thresh);
        log::debug!("number of similar string sets: {}", clusters.len());

        let mut rules = Vec::new();

        for cluster in &clusters {
            if cluster.len() <= 1 {
                continue;
            }

            let subsequences = matrix.gather_subsequences(cluster);
            let segments = lcss::mine_segments(&subsequences);
            log::debug!(
                "cluster of {}: {} common segments",
                cluster.len(),
                segments.len(),
            );

            let retained = self.filter_novel_segments(&filter, &segments)?;
            log::debug!("{} segments survive the benign filter", retained.len());

            for signature in drop_contained(&retained) {
                rules.push(maker.content_rule("generated cluster signature", &signature));
            }

            // An ordered multi-segment signature additionally becomes
            // one pcre rule, gaps wildcarded
            if retained.len() >= 2 {
                rules.push(maker.pcre_rule("generated cluster signature", &retained));
            }
        }

        log::info!("clustered extraction emitted {} rules", rules.len());

        Ok(rules)
    }

    /// Keeps segments containing at least one n-gram unseen in benign
    /// traffic.
    fn filter_novel_segments(
        &self,
        filter: &BloomFilter,
        segments: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>> {
        let min_depth = self.config.min_depth;
        let max_depth = self.config.max_depth;

        let mut retained = Vec::new();

        'segments: for segment in segments {
            if segment.len() < min_depth {
                continue;
            }

            for depth in min_depth..=max_depth.min(segment.len()) {
                for window in segment.windows(depth) {
                    if !filter.contains(window)? {
                        retained.push(segment.clone());
                        continue 'segments;
                    }
                }
            }
        }

        Ok(retained)
    }
}
