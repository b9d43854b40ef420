// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod common;

use sigforge::bloom::{
    build::{build_from_pcaps, BuildStrategy},
    filter_path, BloomFilter,
};
use sigforge::{AsgEngine, Config, Packet};
use std::path::Path;
use test_log::test;

fn packet(dst_port: u16, payload: &[u8]) -> Packet {
    Packet {
        time: 0.0,
        protocol: 17,
        src_port: 40_000,
        dst_port,
        payload: payload.to_vec(),
        prob_attack: 1.0,
    }
}

/// Builds a benign filter from a synthetic pcap and installs it under
/// its canonical name.
fn install_benign_filter(
    dir: &Path,
    protocol: u8,
    port: u16,
    min_depth: usize,
    max_depth: usize,
    payloads: &[&[u8]],
) -> sigforge::Result<()> {
    let pcap = dir.join("benign.pcap");
    common::write_udp_pcap(&pcap, port, payloads)?;

    let filter = BloomFilter::with_capacity(100_000, 1e-6, protocol, port, min_depth, max_depth);
    let (filter, _) = build_from_pcaps(filter, &[&pcap], BuildStrategy::Direct)?;

    filter.flush(filter_path(dir, protocol, port, min_depth, max_depth))
}

#[test]
fn novel_content_survives_benign_filtering() -> sigforge::Result<()> {
    let dir = tempfile::tempdir()?;
    install_benign_filter(dir.path(), 17, 53, 4, 4, &[b"hello"])?;

    let config = Config::new(dir.path()).depth_window(4, 4);
    let mut engine = AsgEngine::new(config)?;
    engine.set_detector_event_flags(false, false)?;
    engine.append_attack()?;
    engine.append_packet(packet(53, b"hello world"))?;

    let rules = engine.extract()?;
    assert!(!rules.is_empty());

    let contents: Vec<&Vec<u8>> = rules.iter().flat_map(|r| r.contents.iter()).collect();

    // Everything fully inside benign "hello" was filtered out
    assert!(!contents.iter().any(|c| c.as_slice() == b"hell"));
    assert!(!contents.iter().any(|c| c.as_slice() == b"ello"));

    // The attack-specific tail survives
    assert!(contents.iter().any(|c| c.as_slice() == b"worl"));
    assert!(contents.iter().any(|c| c.as_slice() == b"orld"));

    // Hex content renders in the rule text
    assert!(rules.iter().any(|r| r.text.contains("|77 6f 72 6c|")));

    Ok(())
}

#[test]
fn rules_are_udp_alerts_with_sequential_sids() -> sigforge::Result<()> {
    let dir = tempfile::tempdir()?;
    install_benign_filter(dir.path(), 17, 53, 4, 4, &[b"hello"])?;

    let config = Config::new(dir.path()).depth_window(4, 4);
    let mut engine = AsgEngine::new(config)?;
    engine.set_detector_event_flags(false, false)?;
    engine.append_attack()?;
    engine.append_packet(packet(53, b"hello world"))?;

    let rules = engine.extract()?;

    for (i, rule) in rules.iter().enumerate() {
        assert!(rule.text.starts_with("alert udp any any -> any 53 "));
        assert_eq!(10_000 + i as u32, rule.sid);
        assert!(rule.text.contains(&format!("sid:{};", rule.sid)));
    }

    Ok(())
}

#[test]
fn clustering_separates_attack_families() -> sigforge::Result<()> {
    let dir = tempfile::tempdir()?;
    install_benign_filter(dir.path(), 17, 53, 3, 4, &[b"innocuous traffic"])?;

    let config = Config::new(dir.path())
        .depth_window(3, 4)
        .level_percent_thresh(0.5);
    let mut engine = AsgEngine::new(config)?;
    engine.set_detector_event_flags(true, false)?;
    engine.append_attack()?;
    engine.append_packet(packet(53, b"XabcY"))?;
    engine.append_packet(packet(53, b"XabcZ"))?;
    engine.append_packet(packet(53, b"QQQQQ"))?;

    let rules = engine.extract()?;

    // The two similar payloads form the only productive cluster
    assert_eq!(1, rules.len());
    assert_eq!(vec![b"Xabc".to_vec()], rules[0].contents);

    Ok(())
}

#[test]
fn clustering_mines_shared_exploit_strings() -> sigforge::Result<()> {
    let dir = tempfile::tempdir()?;
    install_benign_filter(
        dir.path(),
        6,
        80,
        4,
        6,
        &[b"GET /index.html HTTP/1.0", b"GET /style.css HTTP/1.0"],
    )?;

    let config = Config::new(dir.path())
        .depth_window(4, 6)
        .level_percent_thresh(0.5);
    let mut engine = AsgEngine::new(config)?;
    engine.set_detector_event_flags(true, false)?;
    engine.append_attack()?;

    // One attack family with a constant exploit marker
    engine.append_packet(Packet {
        protocol: 6,
        ..packet(80, b"GET /cgi-bin/EVILPAYLOADrun=1 HTTP/1.0")
    })?;
    engine.append_packet(Packet {
        protocol: 6,
        ..packet(80, b"GET /cgi-bin/EVILPAYLOADrun=2 HTTP/1.0")
    })?;
    engine.append_packet(Packet {
        protocol: 6,
        ..packet(80, b"GET /cgi-bin/EVILPAYLOADrun=3 HTTP/1.0")
    })?;

    let rules = engine.extract()?;
    assert!(!rules.is_empty());

    // Some emitted content must carry the exploit marker
    let marker = b"EVILPAYLOAD";
    assert!(rules.iter().any(|rule| {
        rule.contents.iter().any(|content| {
            content
                .windows(marker.len())
                .any(|window| window == marker.as_slice())
        })
    }));

    Ok(())
}

#[test]
fn multi_segment_cluster_also_emits_a_pcre_rule() -> sigforge::Result<()> {
    let dir = tempfile::tempdir()?;
    install_benign_filter(dir.path(), 17, 53, 3, 4, &[b"innocuous traffic"])?;

    let config = Config::new(dir.path())
        .depth_window(3, 4)
        .level_percent_thresh(0.5);
    let mut engine = AsgEngine::new(config)?;
    engine.set_detector_event_flags(true, false)?;
    engine.append_attack()?;

    // Two constant regions around a variable middle
    engine.append_packet(packet(53, b"AAAA123BBBB"))?;
    engine.append_packet(packet(53, b"AAAA789BBBB"))?;
    engine.append_packet(packet(53, b"AAAA555BBBB"))?;

    let rules = engine.extract()?;

    // Two content rules (one per segment) plus one ordered pcre rule
    assert_eq!(3, rules.len());

    let contents: Vec<&Vec<u8>> = rules.iter().flat_map(|r| r.contents.iter()).collect();
    assert!(contents.iter().any(|c| c.as_slice() == b"AAAA"));
    assert!(contents.iter().any(|c| c.as_slice() == b"BBBB"));

    assert!(rules
        .iter()
        .any(|rule| rule.text.contains("pcre:\"/AAAA.*BBBB/\";")));

    Ok(())
}

#[test]
fn second_report_needs_a_fresh_engine() -> sigforge::Result<()> {
    let dir = tempfile::tempdir()?;
    install_benign_filter(dir.path(), 17, 53, 4, 4, &[b"hello"])?;

    let mut engine = AsgEngine::new(Config::new(dir.path()).depth_window(4, 4))?;
    engine.set_detector_event_flags(false, false)?;
    engine.append_attack()?;
    engine.append_packet(packet(53, b"hello world"))?;
    engine.extract()?;

    assert!(engine.extract().is_err());
    assert!(engine.append_attack().is_err());

    // A fresh engine starts its SID range over
    let mut engine = AsgEngine::new(Config::new(dir.path()).depth_window(4, 4))?;
    engine.set_detector_event_flags(false, false)?;
    engine.append_attack()?;
    engine.append_packet(packet(53, b"hello world"))?;
    let rules = engine.extract()?;

    assert_eq!(10_000, rules[0].sid);

    Ok(())
}
