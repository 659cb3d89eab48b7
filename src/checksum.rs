//! Checksum algorithms for derived checksum fields.

use flate2::read::DeflateDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// CRC-32 (IEEE 802.3), as used by PNG chunks and gzip trailers.
    Crc32,
    /// Adler-32, as used by zlib stream trailers.
    Adler32,
}

/// How covered bytes are fed to the algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumInput {
    #[default]
    Raw,
    /// Covered bytes are raw DEFLATE data; the checksum is over the inflated output.
    Inflate,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Crc32 => f.write_str("crc32"),
            ChecksumAlgorithm::Adler32 => f.write_str("adler32"),
        }
    }
}

const ADLER_MOD: u32 = 65521;

pub fn adler32(data: &[u8]) -> u32 {
    let (mut a, mut b) = (1u32, 0u32);
    // 5552 is the largest n such that 255n(n+1)/2 + (n+1)(MOD-1) fits in u32.
    for block in data.chunks(5552) {
        for &byte in block {
            a += byte as u32;
            b += a;
        }
        a %= ADLER_MOD;
        b %= ADLER_MOD;
    }
    (b << 16) | a
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

/// Compute `algorithm` over the concatenation of `regions`.
pub fn compute(
    algorithm: ChecksumAlgorithm,
    input: ChecksumInput,
    regions: &[&[u8]],
) -> std::io::Result<u32> {
    let joined: Vec<u8> = regions.concat();
    let data = match input {
        ChecksumInput::Raw => joined,
        ChecksumInput::Inflate => {
            let mut out = Vec::new();
            DeflateDecoder::new(joined.as_slice()).read_to_end(&mut out)?;
            out
        }
    };
    Ok(match algorithm {
        ChecksumAlgorithm::Crc32 => crc32(&data),
        ChecksumAlgorithm::Adler32 => adler32(&data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn known_vectors() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(adler32(b""), 1);
    }

    #[test]
    fn adler_long_input_matches_naive() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let (mut a, mut b) = (1u64, 0u64);
        for &x in &data {
            a = (a + x as u64) % ADLER_MOD as u64;
            b = (b + a) % ADLER_MOD as u64;
        }
        assert_eq!(adler32(&data), ((b << 16) | a) as u32);
    }

    #[test]
    fn regions_are_concatenated() {
        let whole = compute(ChecksumAlgorithm::Crc32, ChecksumInput::Raw, &[b"IHDR", b"data"]).unwrap();
        assert_eq!(whole, crc32(b"IHDRdata"));
    }

    #[test]
    fn inflate_input() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello hello hello").unwrap();
        let deflated = enc.finish().unwrap();
        let sum = compute(ChecksumAlgorithm::Adler32, ChecksumInput::Inflate, &[&deflated]).unwrap();
        assert_eq!(sum, adler32(b"hello hello hello"));
        assert!(compute(ChecksumAlgorithm::Adler32, ChecksumInput::Inflate, &[b"\xff\xff\xff"]).is_err());
    }
}
