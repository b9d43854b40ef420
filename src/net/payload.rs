// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

const ETHERTYPE_IP: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

/// Layer-4 payload view into a captured Ethernet frame
#[derive(Debug, Eq, PartialEq)]
pub struct L4Payload<'a> {
    /// IP protocol number (6 or 17)
    pub protocol: u8,

    /// Layer-4 source port
    pub src_port: u16,

    /// Layer-4 destination port
    pub dst_port: u16,

    /// Payload bytes after the layer-4 header
    pub payload: &'a [u8],
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Extracts the TCP or UDP payload of an IPv4-over-Ethernet frame.
///
/// Accepts a plain or single-802.1Q-tagged Ethernet frame carrying an
/// unfragmented IPv4 datagram. Anything else (other ethertypes, IPv6,
/// fragments, short captures, other layer-4 protocols) yields `None`;
/// the caller drops the packet and moves on.
#[must_use]
pub fn extract_ipv4_payload(frame: &[u8]) -> Option<L4Payload<'_>> {
    let ethertype = read_u16(frame, 12)?;

    let ip = match ethertype {
        ETHERTYPE_IP => frame.get(14..)?,
        ETHERTYPE_VLAN => {
            // Peek past the tag for a subsequent IPv4 ethertype
            if read_u16(frame, 16)? != ETHERTYPE_IP {
                log::warn!("VLAN frame does not carry IPv4");
                return None;
            }
            frame.get(18..)?
        }
        other => {
            log::warn!("not ETHERTYPE_IP or ETHERTYPE_VLAN: {other:#06x}");
            return None;
        }
    };

    let vhl = *ip.first()?;
    if vhl >> 4 != 4 {
        log::warn!("unsupported IP version: {}", vhl >> 4);
        return None;
    }

    let ihl = usize::from(vhl & 0x0f) * 4;
    if ihl < 20 {
        log::warn!("IP header is truncated");
        return None;
    }

    let total_len = usize::from(read_u16(ip, 2)?);
    if ip.len() < total_len || total_len < ihl {
        log::warn!("capture length is less than the packet length");
        return None;
    }

    // More-fragments flag or a nonzero fragment offset: skip
    let flags_frag = read_u16(ip, 6)?;
    if flags_frag & 0x2000 != 0 || flags_frag & 0x1fff != 0 {
        log::warn!("datagram fragmented");
        return None;
    }

    let protocol = *ip.get(9)?;
    let l4 = ip.get(ihl..total_len)?;

    match protocol {
        IPPROTO_UDP => {
            let src_port = read_u16(l4, 0)?;
            let dst_port = read_u16(l4, 2)?;
            // UDP headers are always 8 bytes
            let payload = l4.get(8..)?;

            Some(L4Payload {
                protocol,
                src_port,
                dst_port,
                payload,
            })
        }
        IPPROTO_TCP => {
            let src_port = read_u16(l4, 0)?;
            let dst_port = read_u16(l4, 2)?;

            let data_offset = usize::from(*l4.get(12)? >> 4) * 4;
            if data_offset < 20 {
                log::warn!("TCP header is truncated");
                return None;
            }
            let payload = l4.get(data_offset..)?;

            Some(L4Payload {
                protocol,
                src_port,
                dst_port,
                payload,
            })
        }
        _ => {
            log::warn!("not TCP or UDP (protocol {protocol})");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    /// Builds an Ethernet/IPv4/UDP frame around `payload`.
    pub fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let total_len = 20 + 8 + payload.len();
        let mut frame = vec![0u8; 14 + total_len];

        frame[12] = 0x08; // ETHERTYPE_IP

        let ip = &mut frame[14..];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        ip[8] = 64; // ttl
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

    /// Builds an Ethernet/IPv4/TCP frame around `payload`.
    pub fn tcp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let total_len = 20 + 20 + payload.len();
        let mut frame = vec![0u8; 14 + total_len];

        frame[12] = 0x08;

        let ip = &mut frame[14..];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        ip[8] = 64;
        ip[9] = 6; // tcp
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);

        let tcp = &mut ip[20..];
        tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
        tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
        tcp[12] = 0x50; // data offset 5 words
        tcp[20..].copy_from_slice(payload);

        frame
    }
}
