//! Sector decompression.
//!
//! A compressed sector starts with a one-byte mask naming the codec(s) that
//! produced it.  Only single-codec masks for zlib, bzip2 and LZMA are
//! decoded; anything else fails with [`ErrorCode::Unpack`].

use std::io::{Cursor, Read};

use bzip2::read::BzDecoder;
use flate2::read::ZlibDecoder;
use lzma_rs::decompress::{Options, UnpackedSize};
use tracing::debug;

use crate::error::{EngineResult, ErrorCode};

pub const MASK_HUFFMAN:      u8 = 0x01;
pub const MASK_ZLIB:         u8 = 0x02;
pub const MASK_PKWARE:       u8 = 0x08;
pub const MASK_BZIP2:        u8 = 0x10;
pub const MASK_LZMA:         u8 = 0x12;
pub const MASK_SPARSE:       u8 = 0x20;
pub const MASK_ADPCM_MONO:   u8 = 0x40;
pub const MASK_ADPCM_STEREO: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorCodec {
    Zlib,
    Bzip2,
    Lzma,
}

impl SectorCodec {
    pub fn from_mask(mask: u8) -> Option<Self> {
        match mask {
            MASK_ZLIB  => Some(SectorCodec::Zlib),
            MASK_BZIP2 => Some(SectorCodec::Bzip2),
            MASK_LZMA  => Some(SectorCodec::Lzma),
            _          => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SectorCodec::Zlib  => "zlib",
            SectorCodec::Bzip2 => "bzip2",
            SectorCodec::Lzma  => "lzma",
        }
    }

    /// Decode `data` (mask byte already stripped) into `out`, which must be
    /// filled exactly.
    pub fn decompress(self, data: &[u8], out: &mut [u8]) -> EngineResult<()> {
        let decoded = match self {
            SectorCodec::Zlib  => read_exact_stream(ZlibDecoder::new(data), out),
            SectorCodec::Bzip2 => read_exact_stream(BzDecoder::new(data), out),
            SectorCodec::Lzma  => decompress_lzma(data, out),
        };
        decoded.map_err(|reason| {
            debug!(codec = self.name(), %reason, "sector decompression failed");
            ErrorCode::Unpack
        })
    }
}

fn read_exact_stream<R: Read>(mut decoder: R, out: &mut [u8]) -> Result<(), String> {
    decoder.read_exact(out).map_err(|e| e.to_string())?;
    let mut probe = [0u8; 1];
    match decoder.read(&mut probe) {
        Ok(0) => Ok(()),
        Ok(_) => Err("stream longer than sector".to_owned()),
        Err(e) => Err(e.to_string()),
    }
}

/// LZMA sectors carry a filter byte and the 5-byte properties header but no
/// size field; the size comes from the sector layout.
fn decompress_lzma(data: &[u8], out: &mut [u8]) -> Result<(), String> {
    let stream = data.get(1..).ok_or("empty lzma sector")?;
    let options = Options {
        unpacked_size: UnpackedSize::UseProvided(Some(out.len() as u64)),
        ..Options::default()
    };
    let mut decoded = Vec::with_capacity(out.len());
    lzma_rs::lzma_decompress_with_options(&mut Cursor::new(stream), &mut decoded, &options)
        .map_err(|e| e.to_string())?;
    if decoded.len() != out.len() {
        return Err(format!("lzma produced {} of {} bytes", decoded.len(), out.len()));
    }
    out.copy_from_slice(&decoded);
    Ok(())
}

/// Decode one stored sector.
///
/// A sector whose stored size equals its decoded size was kept raw even in a
/// compressed file.  Imploded sectors have no mask byte.
pub fn decode_sector(stored: &[u8], out: &mut [u8], compressed: bool, imploded: bool) -> EngineResult<()> {
    if stored.len() == out.len() || !(compressed || imploded) {
        if stored.len() != out.len() {
            return Err(ErrorCode::Read);
        }
        out.copy_from_slice(stored);
        return Ok(());
    }
    if imploded {
        debug!("imploded sectors are not supported");
        return Err(ErrorCode::Unpack);
    }
    let (&mask, body) = stored.split_first().ok_or(ErrorCode::Unpack)?;
    match SectorCodec::from_mask(mask) {
        Some(codec) => codec.decompress(body, out),
        None => {
            debug!(mask = format_args!("{mask:#04x}"), "unsupported compression mask");
            Err(ErrorCode::Unpack)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::ZlibEncoder::new(vec![MASK_ZLIB], flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn bzip2(data: &[u8]) -> Vec<u8> {
        let mut enc = bzip2::write::BzEncoder::new(vec![MASK_BZIP2], bzip2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Sector form: mask, filter byte, properties, stream without the size.
    fn lzma(data: &[u8]) -> Vec<u8> {
        let mut stream = Vec::new();
        lzma_rs::lzma_compress(&mut &data[..], &mut stream).unwrap();
        let mut out = vec![MASK_LZMA, 0];
        out.extend_from_slice(&stream[..5]);
        out.extend_from_slice(&stream[13..]);
        out
    }

    #[test]
    fn zlib_bzip2_and_lzma_sectors_decode() {
        let data = b"the quick brown fox ".repeat(40);
        for stored in [zlib(&data), bzip2(&data), lzma(&data)] {
            assert!(stored.len() < data.len());
            let mut out = vec![0u8; data.len()];
            decode_sector(&stored, &mut out, true, false).unwrap();
            assert_eq!(out, data);
        }
    }

    #[test]
    fn equal_size_sector_is_raw() {
        let mut out = [0u8; 4];
        decode_sector(&[MASK_ZLIB, 1, 2, 3], &mut out, true, false).unwrap();
        assert_eq!(out, [MASK_ZLIB, 1, 2, 3]);
    }

    #[test]
    fn unsupported_masks_fail_with_unpack() {
        let mut out = [0u8; 64];
        for mask in [MASK_HUFFMAN, MASK_PKWARE, MASK_SPARSE, MASK_ADPCM_MONO | MASK_HUFFMAN] {
            assert_eq!(decode_sector(&[mask, 0, 0], &mut out, true, false), Err(ErrorCode::Unpack));
        }
        assert_eq!(decode_sector(&[0, 0], &mut out, false, true), Err(ErrorCode::Unpack));
    }

    #[test]
    fn corrupt_stream_fails_with_unpack() {
        let mut out = [0u8; 64];
        assert_eq!(decode_sector(&[MASK_ZLIB, 9, 9, 9], &mut out, true, false), Err(ErrorCode::Unpack));
        assert_eq!(decode_sector(&[MASK_LZMA, 0, 1], &mut out, true, false), Err(ErrorCode::Unpack));
    }

    #[test]
    fn short_stream_fails_with_unpack() {
        let stored = zlib(b"abc");
        let mut out = [0u8; 10];
        assert_eq!(decode_sector(&stored, &mut out, true, false), Err(ErrorCode::Unpack));
    }
}
