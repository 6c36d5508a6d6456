use alloc::vec::Vec;

use super::{ByteWidth, CodecParams, CompressionAlgorithm, PixelCodec};
use crate::endian;
use crate::error::{Error, Result};

/// NOCOMPRESS: integers stored verbatim as big-endian bytes of their width.
///
/// The engine writes these bytes to the UNCOMPRESSED_DATA column rather than
/// COMPRESSED_DATA.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompressCodec;

impl PixelCodec for NoCompressCodec {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::NoCompress
    }

    fn accepts(&self, _width: ByteWidth) -> bool {
        true
    }

    fn max_encoded_len(&self, count: usize, width: ByteWidth, _params: &CodecParams) -> usize {
        count * width.bytes()
    }

    fn encode(&self, values: &[i32], width: ByteWidth, _params: &CodecParams) -> Result<Vec<u8>> {
        Ok(match width {
            ByteWidth::One => values.iter().map(|&v| v as u8).collect(),
            ByteWidth::Two => {
                let shorts: Vec<i16> = values.iter().map(|&v| v as i16).collect();
                endian::to_be_bytes(&shorts)
            }
            ByteWidth::Four => endian::to_be_bytes(values),
        })
    }

    fn decode(
        &self,
        bytes: &[u8],
        count: usize,
        width: ByteWidth,
        _params: &CodecParams,
    ) -> Result<Vec<i32>> {
        if bytes.len() != count * width.bytes() {
            return Err(Error::CorruptRecord {
                expected: count * width.bytes(),
                found: bytes.len(),
            });
        }
        Ok(match width {
            ByteWidth::One => bytes.iter().map(|&b| b as i32).collect(),
            ByteWidth::Two => endian::from_be_bytes::<i16>(bytes)?
                .into_iter()
                .map(i32::from)
                .collect(),
            ByteWidth::Four => endian::from_be_bytes::<i32>(bytes)?,
        })
    }
}
