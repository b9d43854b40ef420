// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The packet report handed over by the external detector.

/// One suspicious packet handed over by the detector
#[derive(Clone, Debug)]
pub struct Packet {
    /// Capture time, seconds since the epoch
    pub time: f64,

    /// IP protocol number
    pub protocol: u8,

    /// Layer-4 source port
    pub src_port: u16,

    /// Layer-4 destination port
    pub dst_port: u16,

    /// Layer-4 payload bytes
    pub payload: Vec<u8>,

    /// Detector's confidence that this packet belongs to the attack
    pub prob_attack: f32,
}

/// Ordered list of attacks, each an ordered list of packets
#[derive(Debug, Default)]
pub struct DetectorReport {
    attacks: Vec<Vec<Packet>>,
}

impl DetectorReport {
    /// Opens a new (initially empty) attack group.
    pub fn append_attack(&mut self) {
        self.attacks.push(Vec::new());
    }

    /// Appends a packet to the most recently opened attack.
    ///
    /// Returns `false` if no attack group is open.
    pub fn append_packet(&mut self, packet: Packet) -> bool {
        let Some(attack) = self.attacks.last_mut() else {
            return false;
        };
        attack.push(packet);
        true
    }

    /// The attack groups, in arrival order.
    #[must_use]
    pub fn attacks(&self) -> &[Vec<Packet>] {
        &self.attacks
    }

    /// Whether the report carries no packets at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attacks.iter().all(Vec::is_empty)
    }

    /// All packets across all attacks, in report order.
    pub fn packets(&self) -> impl Iterator<Item = &Packet> {
        self.attacks.iter().flatten()
    }
}
