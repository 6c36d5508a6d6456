//! CHECKSUM and DATASUM keywords for the compressed table HDU.
//!
//! Both use the 32-bit ones-complement sum of the big-endian words of the
//! HDU. DATASUM is the sum of the data unit as a decimal string. CHECKSUM is
//! a 16-character ASCII encoding chosen so the whole HDU sums to negative
//! zero.

use alloc::string::{String, ToString};

use crate::header::{serialize_header, Header};
use crate::value::Value;

/// End-around fold of a wide sum into 32 bits.
fn fold(mut sum: u64) -> u32 {
    while sum >> 32 != 0 {
        sum = (sum & 0xFFFF_FFFF) + (sum >> 32);
    }
    sum as u32
}

/// Ones-complement addition of two 32-bit sums.
pub fn ones_complement_add(a: u32, b: u32) -> u32 {
    fold(a as u64 + b as u64)
}

/// Ones-complement sum of `data` taken as big-endian 32-bit words.
///
/// A trailing partial word is zero-extended, so the sum of unpadded data
/// equals the sum of the same data padded to whole blocks.
pub fn checksum_blocks(data: &[u8]) -> u32 {
    let mut words = data.chunks_exact(4);
    let mut sum: u64 = 0;
    for w in words.by_ref() {
        sum += u32::from_be_bytes([w[0], w[1], w[2], w[3]]) as u64;
    }
    let rest = words.remainder();
    if !rest.is_empty() {
        let mut last = [0u8; 4];
        last[..rest.len()].copy_from_slice(rest);
        sum += u32::from_be_bytes(last) as u64;
    }
    fold(sum)
}

/// Punctuation between the digits and the letters is never emitted.
fn is_excluded(c: u8) -> bool {
    matches!(c, 0x3a..=0x40 | 0x5b..=0x60)
}

/// Encode a 32-bit sum as 16 ASCII characters, optionally complemented
/// first.
pub fn encode_checksum(sum: u32, complement: bool) -> [u8; 16] {
    let value = if complement { !sum } else { sum };
    let mut out = [0u8; 16];
    for (i, byte) in value.to_be_bytes().into_iter().enumerate() {
        let q = byte / 4 + b'0';
        let mut ch = [q + byte % 4, q, q, q];
        for pair in ch.chunks_exact_mut(2) {
            while is_excluded(pair[0]) || is_excluded(pair[1]) {
                pair[0] += 1;
                pair[1] -= 1;
            }
        }
        for (j, &c) in ch.iter().enumerate() {
            out[4 * j + i] = c;
        }
    }
    out.rotate_right(1);
    out
}

/// Inverse of [`encode_checksum`].
pub fn decode_checksum(ascii: &[u8; 16], complement: bool) -> u32 {
    let mut chars = *ascii;
    chars.rotate_left(1);
    let mut hi: u64 = 0;
    let mut lo: u64 = 0;
    for quad in chars.chunks_exact(4) {
        let c = |k: usize| quad[k].wrapping_sub(b'0') as u64;
        hi += (c(0) << 8) + c(1);
        lo += (c(2) << 8) + c(3);
    }
    let sum = fold((hi << 16) + lo);
    if complement {
        !sum
    } else {
        sum
    }
}

/// Write DATASUM for `data` and a CHECKSUM that makes the header plus data
/// sum to negative zero. Existing keywords are updated in place.
pub fn stamp_checksum(header: &mut Header, data: &[u8]) {
    let datasum = checksum_blocks(data);
    header.set(
        "CHECKSUM",
        Value::String(String::from("0000000000000000")),
        Some("HDU checksum"),
    );
    header.set(
        "DATASUM",
        Value::String(datasum.to_string()),
        Some("data unit checksum"),
    );
    let total = ones_complement_add(checksum_blocks(&serialize_header(header)), datasum);
    let encoded: String = encode_checksum(total, true)
        .iter()
        .map(|&b| b as char)
        .collect();
    header.set("CHECKSUM", Value::String(encoded), Some("HDU checksum"));
}

/// Outcome of checking an HDU. `None` means the keyword is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumStatus {
    pub checksum: Option<bool>,
    pub datasum: Option<bool>,
}

impl ChecksumStatus {
    /// No present keyword failed.
    pub fn is_ok(&self) -> bool {
        self.checksum != Some(false) && self.datasum != Some(false)
    }
}

/// Check the CHECKSUM and DATASUM of an HDU against its serialized header
/// and its data.
pub fn verify(header: &Header, header_bytes: &[u8], data: &[u8]) -> ChecksumStatus {
    let datasum = checksum_blocks(data);
    let checksum = header.contains("CHECKSUM").then(|| {
        let total = ones_complement_add(checksum_blocks(header_bytes), datasum);
        total == 0 || total == u32::MAX
    });
    let datasum = header.get_string("DATASUM").map(|s| {
        s.trim()
            .parse::<u64>()
            .is_ok_and(|stored| stored == datasum as u64)
    });
    ChecksumStatus { checksum, datasum }
}
