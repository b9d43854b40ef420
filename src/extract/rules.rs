// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Rule record assembly.
//!
//! Rules are shaped as Suricata/Snort `alert ...` lines with hex
//! `content:"|..|"` fragments. The SID counter is per run, threaded
//! through the extractor state rather than global.

/// First SID of the custom rule range.
pub const SID_OFFSET: u32 = 10_000;

/// Longest single `content` fragment; longer matches are split.
pub const MAX_CONTENT_LEN: usize = 255;

/// One emitted IDS rule
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rule {
    /// Signature id
    pub sid: u32,

    /// Revision number
    pub rev: u32,

    /// The full rule line
    pub text: String,

    /// The raw byte strings behind the rule's content fragments
    pub contents: Vec<Vec<u8>>,
}

/// Builds `alert` rules for one `(protocol, port)` pair
pub struct RuleMaker {
    action: String,
    protocol: String,
    src_ip: String,
    src_port: String,
    dst_ip: String,
    dst_port: String,
    next_sid: u32,
}

impl RuleMaker {
    /// A maker for rules targeting one destination port.
    #[must_use]
    pub fn new(action: &str, protocol: &str, dst_port: u16) -> Self {
        Self {
            action: action.into(),
            protocol: protocol.into(),
            src_ip: "any".into(),
            src_port: "any".into(),
            dst_ip: "any".into(),
            dst_port: dst_port.to_string(),
            next_sid: SID_OFFSET,
        }
    }

    /// Next SID to be assigned.
    #[must_use]
    pub fn next_sid(&self) -> u32 {
        self.next_sid
    }

    /// Emits a content rule for one signature byte string.
    ///
    /// Signatures longer than [`MAX_CONTENT_LEN`] are split into
    /// multiple `content` fragments of the same rule.
    pub fn content_rule(&mut self, msg: &str, signature: &[u8]) -> Rule {
        let sid = self.next_sid;
        self.next_sid += 1;
        let rev = 1;

        let contents: Vec<Vec<u8>> = signature
            .chunks(MAX_CONTENT_LEN)
            .map(<[u8]>::to_vec)
            .collect();

        let content_options: String = contents
            .iter()
            .map(|fragment| format!("content:\"|{}|\"; ", hex_bytes(fragment)))
            .collect();

        let text = format!(
            "{} {} {} {} -> {} {} (msg:\"{msg}\"; {content_options}sid:{sid}; rev:{rev};)",
            self.action, self.protocol, self.src_ip, self.src_port, self.dst_ip, self.dst_port,
        );

        Rule {
            sid,
            rev,
            text,
            contents,
        }
    }
}

impl RuleMaker {
    /// Emits a pcre rule matching an ordered list of segments with
    /// arbitrary gaps between them.
    ///
    /// Useful when a cluster yields several common segments whose
    /// relative order is part of the signature.
    pub fn pcre_rule(&mut self, msg: &str, segments: &[Vec<u8>]) -> Rule {
        let sid = self.next_sid;
        self.next_sid += 1;
        let rev = 1;

        let pattern = pcre_pattern(segments);

        let text = format!(
            "{} {} {} {} -> {} {} (msg:\"{msg}\"; pcre:\"/{pattern}/\"; sid:{sid}; rev:{rev};)",
            self.action, self.protocol, self.src_ip, self.src_port, self.dst_ip, self.dst_port,
        );

        Rule {
            sid,
            rev,
            text,
            contents: segments.to_vec(),
        }
    }
}

/// Joins byte segments into a pcre pattern with `.*` gaps.
#[must_use]
pub fn pcre_pattern(segments: &[Vec<u8>]) -> String {
    let mut pattern = String::new();

    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            pattern.push_str(".*");
        }
        for &byte in segment {
            pcre_escape_into(&mut pattern, byte);
        }
    }

    pattern
}

/// Regex metacharacters and non-printables go out as `\xHH`.
fn pcre_escape_into(pattern: &mut String, byte: u8) {
    let is_plain = byte.is_ascii_alphanumeric()
        || matches!(byte, b' ' | b'_' | b'-' | b',' | b':' | b';' | b'=' | b'!' | b'%' | b'@');

    if is_plain {
        pattern.push(char::from(byte));
    } else {
        pattern.push_str(&format!("\\x{byte:02x}"));
    }
}

/// Space-separated lowercase hex rendering of a byte string.
#[must_use]
pub fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
