// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Link-layer framing of a capture source
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkType {
    /// Ethernet II, optionally 802.1Q-tagged
    Ethernet,

    /// Linux cooked capture (SLL)
    LinuxSll,

    /// No layer-2 framing; the IP header starts at offset 0
    Raw,
}

impl LinkType {
    /// Length of the layer-2 header at the start of `packet`.
    ///
    /// For a truncated Ethernet header the capture length itself is
    /// returned, which makes every downstream bounds check fail and the
    /// packet get dropped.
    #[must_use]
    pub fn header_len(self, packet: &[u8]) -> usize {
        match self {
            Self::Ethernet => {
                if packet.len() < 14 {
                    return packet.len();
                }

                // Ethertype, length, or 802.1Q tag protocol identifier
                let ethertypeish = u16::from_be_bytes([packet[12], packet[13]]);
                if ethertypeish == 0x8100 {
                    if packet.len() < 18 {
                        packet.len()
                    } else {
                        18
                    }
                } else {
                    14
                }
            }
            Self::LinuxSll => 16,
            Self::Raw => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn ethernet_header_len() {
        let mut frame = vec![0u8; 60];
        frame[12] = 0x08;
        frame[13] = 0x00;
        assert_eq!(14, LinkType::Ethernet.header_len(&frame));
    }

    #[test]
    fn ethernet_vlan_header_len() {
        let mut frame = vec![0u8; 60];
        frame[12] = 0x81;
        frame[13] = 0x00;
        assert_eq!(18, LinkType::Ethernet.header_len(&frame));
    }

    #[test]
    fn truncated_ethernet_header() {
        let frame = [0u8; 9];
        assert_eq!(9, LinkType::Ethernet.header_len(&frame));
    }

    #[test]
    fn fixed_length_links() {
        let frame = [0u8; 64];
        assert_eq!(16, LinkType::LinuxSll.header_len(&frame));
        assert_eq!(0, LinkType::Raw.header_len(&frame));
    }
}
