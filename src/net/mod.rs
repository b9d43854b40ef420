// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Packet plumbing: link-layer framing, IPv4 payload extraction and a
//! pcap savefile codec.

mod link;
mod payload;
mod pcap;

pub use link::LinkType;
pub use payload::{extract_ipv4_payload, L4Payload};
pub use pcap::{Frame, PcapReader, PcapWriter};
