// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Byte-level hashing.
//!
//! The filter hash is a seeded, platform-independent 128-bit hash in the
//! `MurmurHash3` x86/128 lineage, computed with fixed-width arithmetic
//! only, so the same bytes hash to the same value on every machine and
//! build. Persisted filters are keyed to it; treat any change as an
//! on-disk format break.

mod seeds;

pub use seeds::HASH_SEEDS;

use byteorder::{ByteOrder, LittleEndian};

const C1: u32 = 0x239b_961b;
const C2: u32 = 0xab0e_d9e5;
const C3: u32 = 0x38b3_4ae5;
const C4: u32 = 0xa1e3_8b93;

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Seeded 128-bit hash of a byte span, as `(low, high)` halves.
///
/// Stable across runs, platforms and compiler versions.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn hash128(data: &[u8], seed: u32) -> (u64, u64) {
    let len = data.len();

    let mut h1 = seed;
    let mut h2 = seed;
    let mut h3 = seed;
    let mut h4 = seed;

    for block in data.chunks_exact(16) {
        let mut k1 = LittleEndian::read_u32(&block[0..4]);
        let mut k2 = LittleEndian::read_u32(&block[4..8]);
        let mut k3 = LittleEndian::read_u32(&block[8..12]);
        let mut k4 = LittleEndian::read_u32(&block[12..16]);

        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(19).wrapping_add(h2).wrapping_mul(5).wrapping_add(0x561c_cd1b);

        k2 = k2.wrapping_mul(C2).rotate_left(16).wrapping_mul(C3);
        h2 ^= k2;
        h2 = h2.rotate_left(17).wrapping_add(h3).wrapping_mul(5).wrapping_add(0x0bca_a747);

        k3 = k3.wrapping_mul(C3).rotate_left(17).wrapping_mul(C4);
        h3 ^= k3;
        h3 = h3.rotate_left(15).wrapping_add(h4).wrapping_mul(5).wrapping_add(0x96cd_1c35);

        k4 = k4.wrapping_mul(C4).rotate_left(18).wrapping_mul(C1);
        h4 ^= k4;
        h4 = h4.rotate_left(13).wrapping_add(h1).wrapping_mul(5).wrapping_add(0x32ac_3b17);
    }

    let tail = &data[(len / 16) * 16..];
    let t = tail.len();

    let mut k1 = 0u32;
    let mut k2 = 0u32;
    let mut k3 = 0u32;
    let mut k4 = 0u32;

    if t >= 13 {
        if t >= 15 {
            k4 ^= u32::from(tail[14]) << 16;
        }
        if t >= 14 {
            k4 ^= u32::from(tail[13]) << 8;
        }
        k4 ^= u32::from(tail[12]);
        k4 = k4.wrapping_mul(C4).rotate_left(18).wrapping_mul(C1);
        h4 ^= k4;
    }
    if t >= 9 {
        if t >= 12 {
            k3 ^= u32::from(tail[11]) << 24;
        }
        if t >= 11 {
            k3 ^= u32::from(tail[10]) << 16;
        }
        if t >= 10 {
            k3 ^= u32::from(tail[9]) << 8;
        }
        k3 ^= u32::from(tail[8]);
        k3 = k3.wrapping_mul(C3).rotate_left(17).wrapping_mul(C4);
        h3 ^= k3;
    }
    if t >= 5 {
        if t >= 8 {
            k2 ^= u32::from(tail[7]) << 24;
        }
        if t >= 7 {
            k2 ^= u32::from(tail[6]) << 16;
        }
        if t >= 6 {
            k2 ^= u32::from(tail[5]) << 8;
        }
        k2 ^= u32::from(tail[4]);
        k2 = k2.wrapping_mul(C2).rotate_left(16).wrapping_mul(C3);
        h2 ^= k2;
    }
    if t >= 1 {
        if t >= 4 {
            k1 ^= u32::from(tail[3]) << 24;
        }
        if t >= 3 {
            k1 ^= u32::from(tail[2]) << 16;
        }
        if t >= 2 {
            k1 ^= u32::from(tail[1]) << 8;
        }
        k1 ^= u32::from(tail[0]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= len as u32;
    h2 ^= len as u32;
    h3 ^= len as u32;
    h4 ^= len as u32;

    h1 = h1.wrapping_add(h2).wrapping_add(h3).wrapping_add(h4);
    h2 = h2.wrapping_add(h1);
    h3 = h3.wrapping_add(h1);
    h4 = h4.wrapping_add(h1);

    h1 = fmix32(h1);
    h2 = fmix32(h2);
    h3 = fmix32(h3);
    h4 = fmix32(h4);

    h1 = h1.wrapping_add(h2).wrapping_add(h3).wrapping_add(h4);
    h2 = h2.wrapping_add(h1);
    h3 = h3.wrapping_add(h1);
    h4 = h4.wrapping_add(h1);

    let low = u64::from(h1) | (u64::from(h2) << 32);
    let high = u64::from(h3) | (u64::from(h4) << 32);

    (low, high)
}

/// Content key for payload interning (not part of the disk contract).
#[must_use]
pub fn payload_key(bytes: &[u8]) -> u128 {
    xxhash_rust::xxh3::xxh3_128(bytes)
}
