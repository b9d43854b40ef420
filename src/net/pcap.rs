// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{net::LinkType, DecodeError};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::File,
    io::{BufReader, BufWriter, ErrorKind, Read, Write},
    path::Path,
    time::Duration,
};

const MAGIC_USEC: u32 = 0xa1b2_c3d4;
const MAGIC_NSEC: u32 = 0xa1b2_3c4d;

const LINKTYPE_ETHERNET: u32 = 1;
const LINKTYPE_RAW: u32 = 101;
const LINKTYPE_LINUX_SLL: u32 = 113;

/// One captured frame from a savefile
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// Capture time since the epoch
    pub timestamp: Duration,

    /// Original length on the wire; may exceed `data.len()` if the
    /// capture was truncated by the snap length
    pub wirelen: u32,

    /// Captured bytes, starting at the link layer
    pub data: Vec<u8>,
}

/// Reader for classic pcap savefiles
///
/// Handles both byte orders and both timestamp resolutions.
pub struct PcapReader<R> {
    reader: R,
    swapped: bool,
    nanosecond: bool,
    link_type: LinkType,
}

impl PcapReader<BufReader<File>> {
    /// Opens a savefile from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> PcapReader<R> {
    /// Reads and validates the global header.
    pub fn new(mut reader: R) -> crate::Result<Self> {
        let magic = reader.read_u32::<LittleEndian>().map_err(DecodeError::Io)?;

        let (swapped, nanosecond) = match magic {
            MAGIC_USEC => (false, false),
            MAGIC_NSEC => (false, true),
            m if m.swap_bytes() == MAGIC_USEC => (true, false),
            m if m.swap_bytes() == MAGIC_NSEC => (true, true),
            _ => {
                return Err(DecodeError::InvalidHeader("pcap magic").into());
            }
        };

        let mut rest = [0u8; 16];
        reader.read_exact(&mut rest).map_err(DecodeError::Io)?;

        let mut this = Self {
            reader,
            swapped,
            nanosecond,
            link_type: LinkType::Ethernet,
        };

        let network = this.read_u32()?;
        this.link_type = match network {
            LINKTYPE_ETHERNET => LinkType::Ethernet,
            LINKTYPE_RAW => LinkType::Raw,
            LINKTYPE_LINUX_SLL => LinkType::LinuxSll,
            _ => {
                log::error!("unsupported data-link protocol: {network}");
                return Err(DecodeError::InvalidHeader("pcap link type").into());
            }
        };

        Ok(this)
    }

    /// Link type declared by the savefile.
    #[must_use]
    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    fn read_u32(&mut self) -> crate::Result<u32> {
        let value = if self.swapped {
            self.reader.read_u32::<BigEndian>()
        } else {
            self.reader.read_u32::<LittleEndian>()
        };
        Ok(value.map_err(DecodeError::Io)?)
    }

    /// Reads the next frame, or `None` at a clean end of file.
    pub fn next_frame(&mut self) -> crate::Result<Option<Frame>> {
        let ts_sec = if self.swapped {
            self.reader.read_u32::<BigEndian>()
        } else {
            self.reader.read_u32::<LittleEndian>()
        };

        let ts_sec = match ts_sec {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(DecodeError::Io(e).into()),
        };

        let ts_frac = self.read_u32()?;
        let caplen = self.read_u32()?;
        let wirelen = self.read_u32()?;

        let nanos = if self.nanosecond {
            ts_frac
        } else {
            ts_frac.saturating_mul(1_000)
        };
        let timestamp = Duration::new(u64::from(ts_sec), nanos);

        let mut data = vec![0u8; caplen as usize];
        self.reader
            .read_exact(&mut data)
            .map_err(|_| DecodeError::UnexpectedEof)?;

        Ok(Some(Frame {
            timestamp,
            wirelen,
            data,
        }))
    }

    /// Iterates the remaining frames.
    pub fn frames(mut self) -> impl Iterator<Item = crate::Result<Frame>> {
        std::iter::from_fn(move || self.next_frame().transpose())
    }
}

/// Writer for classic little-endian microsecond savefiles
pub struct PcapWriter<W: Write> {
    writer: W,
}

impl PcapWriter<BufWriter<File>> {
    /// Creates a savefile on disk.
    pub fn create<P: AsRef<Path>>(path: P, link_type: LinkType) -> crate::Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::new(BufWriter::new(file), link_type)
    }
}

impl<W: Write> PcapWriter<W> {
    /// Writes the global header.
    pub fn new(mut writer: W, link_type: LinkType) -> crate::Result<Self> {
        writer.write_u32::<LittleEndian>(MAGIC_USEC)?;
        writer.write_u16::<LittleEndian>(2)?; // major
        writer.write_u16::<LittleEndian>(4)?; // minor
        writer.write_u32::<LittleEndian>(0)?; // thiszone
        writer.write_u32::<LittleEndian>(0)?; // sigfigs
        writer.write_u32::<LittleEndian>(65_535)?; // snaplen

        let network = match link_type {
            LinkType::Ethernet => LINKTYPE_ETHERNET,
            LinkType::Raw => LINKTYPE_RAW,
            LinkType::LinuxSll => LINKTYPE_LINUX_SLL,
        };
        writer.write_u32::<LittleEndian>(network)?;

        Ok(Self { writer })
    }

    /// Appends one frame.
    pub fn write_frame(&mut self, timestamp: Duration, data: &[u8]) -> crate::Result<()> {
        self.writer
            .write_u32::<LittleEndian>(timestamp.as_secs() as u32)?;
        self.writer
            .write_u32::<LittleEndian>(timestamp.subsec_micros())?;
        self.writer.write_u32::<LittleEndian>(data.len() as u32)?;
        self.writer.write_u32::<LittleEndian>(data.len() as u32)?;
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn finish(mut self) -> crate::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn pcap_round_trip() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("capture.pcap");

        let frames = [
            (Duration::new(10, 500_000_000), vec![1u8, 2, 3, 4]),
            (Duration::new(11, 0), vec![5u8; 60]),
        ];

        let mut writer = PcapWriter::create(&path, LinkType::Ethernet)?;
        for (timestamp, data) in &frames {
            writer.write_frame(*timestamp, data)?;
        }
        writer.finish()?;

        let reader = PcapReader::open(&path)?;
        assert_eq!(LinkType::Ethernet, reader.link_type());

        let restored: Vec<Frame> = reader.frames().collect::<crate::Result<_>>()?;
        assert_eq!(2, restored.len());
        assert_eq!(frames[0].0, restored[0].timestamp);
        assert_eq!(frames[0].1, restored[0].data);
        assert_eq!(60, restored[1].wirelen);

        Ok(())
    }

    #[test]
    fn pcap_big_endian_and_nanosecond_variants() -> crate::Result<()> {
        // Hand-built big-endian microsecond file
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC_USEC.to_be_bytes());
        buf.extend_from_slice(&2u16.to_be_bytes());
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&65_535u32.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes()); // ethernet
        buf.extend_from_slice(&7u32.to_be_bytes()); // ts_sec
        buf.extend_from_slice(&250u32.to_be_bytes()); // ts_usec
        buf.extend_from_slice(&3u32.to_be_bytes()); // caplen
        buf.extend_from_slice(&3u32.to_be_bytes()); // wirelen
        buf.extend_from_slice(&[9, 9, 9]);

        let mut reader = PcapReader::new(buf.as_slice())?;
        let frame = reader.next_frame()?.expect("one frame");
        assert_eq!(Duration::new(7, 250_000), frame.timestamp);
        assert_eq!(vec![9, 9, 9], frame.data);

        // Little-endian nanosecond file
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC_NSEC.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&250u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(0xaa);

        let mut reader = PcapReader::new(buf.as_slice())?;
        let frame = reader.next_frame()?.expect("one frame");
        assert_eq!(Duration::new(7, 250), frame.timestamp);

        Ok(())
    }

    #[test]
    fn pcap_link_types_round_trip() -> crate::Result<()> {
        for link_type in [LinkType::Ethernet, LinkType::Raw, LinkType::LinuxSll] {
            let mut buf = Vec::new();
            {
                let mut writer = PcapWriter::new(&mut buf, link_type)?;
                writer.write_frame(Duration::ZERO, &[1, 2, 3])?;
                writer.finish()?;
            }

            let reader = PcapReader::new(buf.as_slice())?;
            assert_eq!(link_type, reader.link_type());
        }
        Ok(())
    }

    #[test]
    fn pcap_rejects_garbage_magic() {
        let buf = [0u8; 24];
        assert!(PcapReader::new(buf.as_slice()).is_err());
    }

    #[test]
    fn pcap_truncated_record_is_an_error() -> crate::Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC_USEC.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&100u32.to_le_bytes()); // caplen 100
        buf.extend_from_slice(&100u32.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3]); // only 3 bytes follow

        let mut reader = PcapReader::new(buf.as_slice())?;
        assert!(reader.next_frame().is_err());

        Ok(())
    }
}
