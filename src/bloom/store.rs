// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    bit_array::{enable_bit, has_bit, BitArray},
    bloom::params::HEADER_LEN,
};
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    sync::Mutex,
};

/// Where a filter's bit payload lives
///
/// Memory mode serves every query from RAM; disk mode keeps the filter
/// file open and touches one byte per bit probe, which keeps the
/// resident set tiny for filters far larger than memory.
pub enum BitStore {
    /// Whole payload resident in memory
    Memory(BitArray),

    /// Open filter file, probed with seeks
    Disk(Mutex<File>),
}

impl std::fmt::Debug for BitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(bits) => write!(f, "BitStore::Memory({} B)", bits.bytes().len()),
            Self::Disk(_) => write!(f, "BitStore::Disk"),
        }
    }
}

impl BitStore {
    /// An all-zero in-memory payload of `payload_len` bytes.
    #[must_use]
    pub fn zeroed(payload_len: usize) -> Self {
        Self::Memory(BitArray::with_capacity(payload_len))
    }

    /// Reads the bit at `idx`.
    pub fn get(&self, idx: u64) -> crate::Result<bool> {
        match self {
            Self::Memory(bits) => Ok(bits.get(idx as usize)),
            Self::Disk(file) => {
                #[allow(clippy::expect_used)]
                let mut file = file.lock().expect("lock is poisoned");

                file.seek(SeekFrom::Start(HEADER_LEN as u64 + (idx >> 3)))?;
                let mut byte = [0u8];
                file.read_exact(&mut byte)?;

                Ok(has_bit(byte[0], idx as usize))
            }
        }
    }

    /// Sets the bit at `idx`.
    pub fn set(&mut self, idx: u64) -> crate::Result<()> {
        match self {
            Self::Memory(bits) => {
                bits.enable(idx as usize);
                Ok(())
            }
            Self::Disk(file) => {
                #[allow(clippy::expect_used)]
                let file = file.get_mut().expect("lock is poisoned");

                let offset = HEADER_LEN as u64 + (idx >> 3);
                file.seek(SeekFrom::Start(offset))?;
                let mut byte = [0u8];
                file.read_exact(&mut byte)?;

                byte[0] = enable_bit(byte[0], idx as usize);

                file.seek(SeekFrom::Start(offset))?;
                file.write_all(&byte)?;
                Ok(())
            }
        }
    }

    /// Copies out the whole bit payload.
    pub fn read_payload(&self, payload_len: usize) -> crate::Result<Vec<u8>> {
        match self {
            Self::Memory(bits) => Ok(bits.bytes().to_vec()),
            Self::Disk(file) => {
                #[allow(clippy::expect_used)]
                let mut file = file.lock().expect("lock is poisoned");

                file.seek(SeekFrom::Start(HEADER_LEN as u64))?;
                let mut payload = vec![0u8; payload_len];
                file.read_exact(&mut payload)?;
                Ok(payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn memory_store_set_get() -> crate::Result<()> {
        let mut store = BitStore::zeroed(4);
        assert!(!store.get(17)?);
        store.set(17)?;
        assert!(store.get(17)?);
        assert!(!store.get(16)?);
        Ok(())
    }

    #[test]
    fn disk_store_set_get() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bits");

        {
            let mut file = File::create(&path)?;
            file.write_all(&vec![0u8; HEADER_LEN + 8])?;
        }

        let file = File::options().read(true).write(true).open(&path)?;
        let mut store = BitStore::Disk(Mutex::new(file));

        assert!(!store.get(42)?);
        store.set(42)?;
        assert!(store.get(42)?);
        assert!(!store.get(43)?);

        // bit 42 lands in payload byte 5, mask 0b100
        let payload = store.read_payload(8)?;
        assert_eq!(0b0000_0100, payload[5]);

        Ok(())
    }
}
