// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod common;

use sigforge::bloom::{
    build::{build_from_pcaps, BuildStrategy},
    BloomFilter,
};
use test_log::test;

fn payload_corpus() -> Vec<Vec<u8>> {
    let mut payloads = vec![
        b"GET /index.html HTTP/1.1".to_vec(),
        b"Host: www.example.test".to_vec(),
        b"User-Agent: curl/8.0".to_vec(),
        b"GET /index.html HTTP/1.1".to_vec(),
    ];
    // Some binary padding with repeated regions for the LRU to chew on
    payloads.push((0u8..=255).collect());
    payloads.push([0x41u8; 300].to_vec());
    payloads
}

#[test]
fn threaded_and_direct_builds_are_identical() -> sigforge::Result<()> {
    let dir = tempfile::tempdir()?;
    let pcap_a = dir.path().join("a.pcap");
    let pcap_b = dir.path().join("b.pcap");

    let corpus = payload_corpus();
    let refs: Vec<&[u8]> = corpus.iter().map(Vec::as_slice).collect();
    let (first, second) = refs.split_at(3);

    common::write_udp_pcap(&pcap_a, 53, first)?;
    common::write_udp_pcap(&pcap_b, 53, second)?;
    let inputs = [&pcap_a, &pcap_b];

    let direct = BloomFilter::with_capacity(100_000, 1e-5, 17, 53, 4, 8);
    let (direct, direct_report) = build_from_pcaps(direct, &inputs, BuildStrategy::Direct)?;

    for hashers in [1, 2, 4] {
        let threaded = BloomFilter::with_capacity(100_000, 1e-5, 17, 53, 4, 8);
        let (threaded, threaded_report) =
            build_from_pcaps(threaded, &inputs, BuildStrategy::Pipelined { hashers })?;

        assert_eq!(direct_report, threaded_report);

        let direct_path = dir.path().join("direct.bloom");
        let threaded_path = dir.path().join(format!("threaded-{hashers}.bloom"));
        direct.flush(&direct_path)?;
        threaded.flush(&threaded_path)?;

        // The flushed filter is a deterministic function of the input
        // stream, independent of thread count and scheduling
        assert_eq!(
            std::fs::read(&direct_path)?,
            std::fs::read(&threaded_path)?,
            "with {hashers} hashers",
        );
    }

    Ok(())
}

#[test]
fn threaded_build_serves_lookups_after_finish() -> sigforge::Result<()> {
    let dir = tempfile::tempdir()?;
    let pcap = dir.path().join("traffic.pcap");

    common::write_udp_pcap(&pcap, 9, &[b"the quick brown fox jumps over the lazy dog"])?;

    let filter = BloomFilter::with_capacity(10_000, 1e-5, 17, 9, 5, 5);
    let (filter, _) = build_from_pcaps(filter, &[&pcap], BuildStrategy::Pipelined { hashers: 2 })?;

    assert!(filter.contains(b"quick")?);
    assert!(filter.contains(b"brown")?);
    assert!(filter.contains(b"k bro")?);
    assert!(!filter.contains(b"kcirb")?);

    Ok(())
}
