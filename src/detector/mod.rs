// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Host-peering anomaly detector.
//!
//! Tracks the number of "peers" each host has over time. The detector
//! can flag, for example, a machine that usually talks to a handful of
//! other machines per minute and suddenly starts interacting with dozens
//! of them after joining a botnet.
//!
//! Data is collected by tracking who talks to whom within a generation
//! (60 seconds). At each generation boundary the per-host peer sets are
//! condensed into per-host counts, folded into per-host running
//! statistics, and tested for anomalies.

mod histogram;
mod host;
pub mod stats;

pub use histogram::{Histogram, ALPHA_FAST, ALPHA_SLOW};
pub use host::HostAddr;

use crate::net::LinkType;
use rustc_hash::{FxHashMap, FxHashSet};
use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    time::Duration,
};

/// The length of a single generation.
///
/// Too small a value makes the per-generation processing run too often.
pub const GENERATION_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum number of generations to keep state for a host without
/// seeing traffic to or from that host.
pub const MAX_EMPTY_GENERATIONS: u64 = 24 * 60;

/// Per-host peer tracking and anomaly flagging over pcap frames
pub struct AnomalyDetector {
    link_type: LinkType,

    /// Timestamp of the first packet ever observed
    first_packet: Option<Duration>,

    current_generation: u64,

    /// Who talked to whom in the current generation
    peers: FxHashMap<HostAddr, FxHashSet<HostAddr>>,

    /// Running per-host statistics
    histograms: FxHashMap<HostAddr, Histogram>,

    /// Eviction queue, smallest generation first.
    ///
    /// Entries are refreshed by pushing a new pair; a popped entry that
    /// does not match the host's registered last-seen generation (or
    /// whose host is already gone) is stale and discarded silently.
    last_seen: BinaryHeap<Reverse<(u64, HostAddr)>>,

    last_seen_generation: FxHashMap<HostAddr, u64>,

    /// Hosts whose latest datum tripped the anomaly test
    anomalous: FxHashSet<HostAddr>,

    dropped_packets: u64,
}

impl AnomalyDetector {
    /// A fresh detector for frames of the given link type.
    #[must_use]
    pub fn new(link_type: LinkType) -> Self {
        Self {
            link_type,
            first_packet: None,
            current_generation: 0,
            peers: FxHashMap::default(),
            histograms: FxHashMap::default(),
            last_seen: BinaryHeap::new(),
            last_seen_generation: FxHashMap::default(),
            anomalous: FxHashSet::default(),
            dropped_packets: 0,
        }
    }

    /// Feeds one captured frame into the detector.
    ///
    /// Truncated or non-IP frames are dropped; that is never fatal.
    pub fn process_packet(&mut self, timestamp: Duration, packet: &[u8]) {
        let first = *self.first_packet.get_or_insert(timestamp);

        let generation = generation_of(first, timestamp);
        if generation != self.current_generation {
            log::debug!(
                "done with generation {}, starting generation {generation}",
                self.current_generation,
            );
            self.current_generation = generation;

            self.roll_pending_hosts();
            self.cleanup();
        }

        let layer2_hlen = self.link_type.header_len(packet);

        let Some((src, dst)) = extract_addresses(packet, layer2_hlen) else {
            self.dropped_packets += 1;
            log::warn!("dropping unparsable frame (total {})", self.dropped_packets);
            return;
        };

        if self.current_generation > 0 {
            self.process_host(src);
            self.process_host(dst);
        }

        // Mark who peered with whom
        self.peers.entry(src).or_default().insert(dst);
        self.peers.entry(dst).or_default().insert(src);

        self.mark_seen(src);
        self.mark_seen(dst);
    }

    /// Whether the host's latest datum was flagged.
    #[must_use]
    pub fn is_anomalous(&self, host: &HostAddr) -> bool {
        self.anomalous.contains(host)
    }

    /// Currently flagged hosts.
    pub fn anomalous_hosts(&self) -> impl Iterator<Item = &HostAddr> {
        self.anomalous.iter()
    }

    /// Generation index of the most recent packet.
    #[must_use]
    pub fn current_generation(&self) -> u64 {
        self.current_generation
    }

    /// Number of frames dropped as unparsable.
    #[must_use]
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets
    }

    /// Running statistics of one host, if tracked.
    #[doc(hidden)]
    #[must_use]
    pub fn histogram(&self, host: &HostAddr) -> Option<&Histogram> {
        self.histograms.get(host)
    }

    /// Number of hosts with live statistics.
    #[doc(hidden)]
    #[must_use]
    pub fn tracked_host_count(&self) -> usize {
        self.histograms.len()
    }

    /// Rolls forward every host with an unfolded peer set.
    ///
    /// Runs at each generation boundary so completed peer sets are
    /// condensed even for hosts that stay quiet afterwards.
    fn roll_pending_hosts(&mut self) {
        if self.current_generation == 0 {
            return;
        }

        let pending: Vec<HostAddr> = self.peers.keys().copied().collect();
        for host in pending {
            self.process_host(host);
        }
    }

    /// Brings a host's histogram up to `current_generation - 1`.
    fn process_host(&mut self, host: HostAddr) {
        let histogram = self.histograms.entry(host).or_default();
        if histogram.generation >= self.current_generation {
            // Already up to date
            return;
        }

        // Peer count for the first generation not yet folded in
        let num_peers = self
            .peers
            .remove(&host)
            .map(|set| set.len() as u64)
            .unwrap_or_default();

        let mut flagged = push_and_test(histogram, num_peers);

        // Zero-fill any skipped empty generations
        while histogram.generation < self.current_generation {
            flagged = push_and_test(histogram, 0);
        }

        if flagged {
            self.anomalous.insert(host);
        } else {
            self.anomalous.remove(&host);
        }
    }

    fn mark_seen(&mut self, host: HostAddr) {
        let generation = self.current_generation;
        let previous = self.last_seen_generation.insert(host, generation);
        if previous != Some(generation) {
            self.last_seen.push(Reverse((generation, host)));
        }
    }

    /// Evicts hosts that have been dormant too long.
    fn cleanup(&mut self) {
        if self.current_generation <= MAX_EMPTY_GENERATIONS {
            log::debug!("not running long enough to require cleanup");
            return;
        }

        let horizon = self.current_generation - MAX_EMPTY_GENERATIONS;

        while let Some(Reverse((generation, host))) = self.last_seen.peek().copied() {
            if generation >= horizon {
                break;
            }
            self.last_seen.pop();

            // Stale entries are superseded by a fresher one for the
            // same host, or belong to an already-evicted host
            if self.last_seen_generation.get(&host) != Some(&generation) {
                continue;
            }

            log::debug!("removing histogram for {host}");
            self.peers.remove(&host);
            self.histograms.remove(&host);
            self.last_seen_generation.remove(&host);
            self.anomalous.remove(&host);
        }
    }
}

/// Folds one datum into the histogram and tests it.
fn push_and_test(histogram: &mut Histogram, num_peers: u64) -> bool {
    histogram.push_value(num_peers);
    histogram.generation += 1;
    check_for_anomalies(histogram, num_peers)
}

/// Tests a datum against all three running statistics.
fn check_for_anomalies(histogram: &Histogram, num_peers: u64) -> bool {
    stats::datum_is_anomalous(
        histogram.average,
        stats::stddev(histogram.mean_of_squares, histogram.average),
        num_peers,
    ) || stats::datum_is_anomalous(
        histogram.ema_fast,
        stats::stddev(histogram.ema_fast_squared, histogram.ema_fast),
        num_peers,
    ) || stats::datum_is_anomalous(
        histogram.ema_slow,
        stats::stddev(histogram.ema_slow_squared, histogram.ema_slow),
        num_peers,
    )
}

/// Generation index of `timestamp` relative to the first packet.
fn generation_of(first: Duration, timestamp: Duration) -> u64 {
    let elapsed = timestamp.saturating_sub(first);
    elapsed.as_secs() / GENERATION_INTERVAL.as_secs()
}

/// Pulls the source and destination addresses out of an IP packet.
fn extract_addresses(packet: &[u8], layer2_hlen: usize) -> Option<(HostAddr, HostAddr)> {
    let ip = packet.get(layer2_hlen..)?;
    let version = ip.first()? >> 4;

    match version {
        4 if ip.len() >= 20 => {
            let src = HostAddr::v4_from_slice(ip.get(12..)?)?;
            let dst = HostAddr::v4_from_slice(ip.get(16..)?)?;
            Some((src, dst))
        }
        6 if ip.len() >= 40 => {
            let src = HostAddr::v6_from_slice(ip.get(8..)?)?;
            let dst = HostAddr::v6_from_slice(ip.get(24..)?)?;
            Some((src, dst))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn v4_frame(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut frame = vec![0u8; 34];
        frame[12] = 0x08; // ETHERTYPE_IP
        frame[13] = 0x00;
        frame[14] = 0x45; // version 4, IHL 5
        frame[26..30].copy_from_slice(&src);
        frame[30..34].copy_from_slice(&dst);
        frame
    }

    fn at(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test]
    fn generation_math() {
        let t0 = at(100);
        assert_eq!(0, generation_of(t0, at(100)));
        assert_eq!(0, generation_of(t0, at(159)));
        assert_eq!(1, generation_of(t0, at(160)));
        assert_eq!(10, generation_of(t0, at(700)));
    }

    #[test]
    fn rollover_folds_generation_zero() {
        let a = HostAddr::V4([10, 0, 0, 1]);
        let b = HostAddr::V4([10, 0, 0, 2]);

        let mut detector = AnomalyDetector::new(LinkType::Ethernet);
        detector.process_packet(at(0), &v4_frame([10, 0, 0, 1], [10, 0, 0, 2]));
        detector.process_packet(at(61), &v4_frame([10, 0, 0, 1], [10, 0, 0, 3]));

        assert_eq!(1, detector.current_generation());

        let hist_a = detector.histogram(&a).expect("host A should be tracked");
        assert_eq!(1, hist_a.count);
        assert!((hist_a.average - 1.0).abs() < 1e-12);

        let hist_b = detector.histogram(&b).expect("host B should be tracked");
        assert_eq!(1, hist_b.count);
        assert!((hist_b.average - 1.0).abs() < 1e-12);
    }

    #[test]
    fn skipped_generations_are_zero_filled() {
        let a = HostAddr::V4([10, 0, 0, 1]);

        let mut detector = AnomalyDetector::new(LinkType::Ethernet);
        detector.process_packet(at(0), &v4_frame([10, 0, 0, 1], [10, 0, 0, 2]));
        // Quiet for generations 1..=4, reappears in generation 5
        detector.process_packet(at(5 * 60), &v4_frame([10, 0, 0, 1], [10, 0, 0, 2]));

        let hist = detector.histogram(&a).expect("host A should be tracked");
        // generation 0 datum (1 peer) + four empty generations
        assert_eq!(5, hist.count);
        assert!((hist.average - 0.2).abs() < 1e-12);
    }

    #[test]
    fn peer_burst_trips_anomaly() {
        let victim = [10, 0, 0, 1];
        let mut detector = AnomalyDetector::new(LinkType::Ethernet);

        // Quiet history: one peer per generation for a long stretch
        for generation in 0..100u64 {
            detector.process_packet(
                at(generation * 60),
                &v4_frame(victim, [10, 0, 0, 2]),
            );
        }

        // Burst: 40 distinct peers within one generation
        for peer in 0..40u8 {
            detector.process_packet(
                at(100 * 60),
                &v4_frame(victim, [192, 168, 1, peer]),
            );
        }

        // Roll the burst generation closed
        detector.process_packet(at(101 * 60), &v4_frame([172, 16, 0, 1], [172, 16, 0, 2]));

        assert!(detector.is_anomalous(&HostAddr::V4(victim)));
    }

    #[test]
    fn steady_host_is_not_anomalous() {
        let host = HostAddr::V4([10, 0, 0, 1]);
        let mut detector = AnomalyDetector::new(LinkType::Ethernet);

        for generation in 0..50u64 {
            detector.process_packet(
                at(generation * 60),
                &v4_frame([10, 0, 0, 1], [10, 0, 0, 2]),
            );
        }

        assert!(!detector.is_anomalous(&host));
    }

    #[test]
    fn dormant_hosts_are_evicted() {
        let transient = HostAddr::V4([10, 9, 9, 9]);
        let mut detector = AnomalyDetector::new(LinkType::Ethernet);

        detector.process_packet(at(0), &v4_frame([10, 9, 9, 9], [10, 9, 9, 8]));

        // Keep another flow alive long past the eviction horizon,
        // skipping most generations to keep the test quick
        let far = (MAX_EMPTY_GENERATIONS + 10) * 60;
        detector.process_packet(at(far), &v4_frame([10, 0, 0, 1], [10, 0, 0, 2]));
        detector.process_packet(at(far + 60), &v4_frame([10, 0, 0, 1], [10, 0, 0, 2]));

        assert!(detector.histogram(&transient).is_none());
        assert!(!detector.is_anomalous(&transient));
    }

    #[test]
    fn garbage_frames_are_counted_not_fatal() {
        let mut detector = AnomalyDetector::new(LinkType::Ethernet);
        detector.process_packet(at(0), &[0u8; 5]);
        detector.process_packet(at(0), &v4_frame([1, 2, 3, 4], [5, 6, 7, 8]));

        assert_eq!(1, detector.dropped_packets());
        assert_eq!(2, detector.last_seen_generation.len());
    }

    #[test]
    fn ipv6_addresses_are_tracked() {
        let mut frame = vec![0u8; 54];
        frame[12] = 0x86; // ETHERTYPE_IPV6
        frame[13] = 0xdd;
        frame[14] = 0x60;
        frame[22] = 0xfe; // src starts at offset 14 + 8
        frame[38] = 0xfe; // dst starts at offset 14 + 24
        frame[53] = 0x01;

        let mut detector = AnomalyDetector::new(LinkType::Ethernet);
        detector.process_packet(at(0), &frame);

        assert_eq!(0, detector.dropped_packets());
        assert_eq!(2, detector.peers.len());
    }
}
