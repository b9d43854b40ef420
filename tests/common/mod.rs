// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![allow(dead_code)]

use sigforge::net::{LinkType, PcapWriter};
use std::path::Path;
use std::time::Duration;

/// Builds an Ethernet/IPv4/UDP frame around `payload`.
pub fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let total_len = 20 + 8 + payload.len();
    let mut frame = vec![0u8; 14 + total_len];

    frame[12] = 0x08; // ETHERTYPE_IP

    let ip = &mut frame[14..];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    ip[8] = 64;
    ip[9] = 17; // udp
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&[10, 0, 0, 2]);

    let udp = &mut ip[20..];
    udp[0..2].copy_from_slice(&src_port.to_be_bytes());
    udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    udp[4..6].copy_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    udp[8..].copy_from_slice(payload);

    frame
}

/// Builds a minimal Ethernet/IPv4 frame between two v4 hosts.
pub fn v4_frame(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
    let mut frame = vec![0u8; 34];
    frame[12] = 0x08;
    frame[14] = 0x45;
    frame[26..30].copy_from_slice(&src);
    frame[30..34].copy_from_slice(&dst);
    frame
}

/// Writes a pcap savefile holding one UDP frame per payload.
pub fn write_udp_pcap(
    path: &Path,
    dst_port: u16,
    payloads: &[&[u8]],
) -> sigforge::Result<()> {
    let mut writer = PcapWriter::create(path, LinkType::Ethernet)?;
    for (i, payload) in payloads.iter().enumerate() {
        let frame = udp_frame(40_000 + i as u16, dst_port, payload);
        writer.write_frame(Duration::from_secs(i as u64), &frame)?;
    }
    writer.finish()
}
