//! Tile bitmap codec.
//!
//! A tile of side `S` is packed into an `S * S` bit array. The bit for local
//! cell `(x, y)` is at position `y * S + x`, stored LSB-first: byte
//! `position / 8`, bit `position % 8`.
//!
//! The wire container is `[format version: u8][payload]`. Version `0x01`
//! carries the raw bitmap compressed with raw DEFLATE at a fixed level.

use crate::geometry::{Bounds, Cell};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use thiserror::Error;

pub const FORMAT_DEFLATE: u8 = 0x01;

/// Fixed so that identical bitmaps always produce identical containers.
const COMPRESSION_LEVEL: u32 = 6;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Empty tile container")]
    Empty,

    #[error("Unsupported tile format version 0x{0:02x}")]
    UnsupportedVersion(u8),

    #[error("Tile payload could not be (de)compressed: {0}")]
    Compression(#[from] io::Error),

    #[error("Tile bitmap has {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// One bit per cell of a square tile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    size: u32,
    bits: Vec<u8>,
}

impl Bitmap {
    pub fn byte_len(size: u32) -> usize {
        (size as usize * size as usize).div_ceil(8)
    }

    pub fn new(size: u32) -> Self {
        Bitmap {
            size,
            bits: vec![0u8; Bitmap::byte_len(size)],
        }
    }

    pub fn from_bytes(size: u32, bits: Vec<u8>) -> Result<Self, CodecError> {
        let expected = Bitmap::byte_len(size);
        if bits.len() != expected {
            return Err(CodecError::LengthMismatch {
                expected,
                actual: bits.len(),
            });
        }
        Ok(Bitmap { size, bits })
    }

    /// Rasterizes every cell of `cells` that falls inside `window`.
    ///
    /// `window` is the tile's bounds; its width must equal `size`.
    pub fn from_cells<'a>(
        window: &Bounds,
        size: u32,
        cells: impl IntoIterator<Item = &'a Cell>,
    ) -> Self {
        let mut bitmap = Bitmap::new(size);
        for cell in cells {
            if window.contains(*cell) {
                bitmap.set((cell.x - window.min_x) as u32, (cell.y - window.min_y) as u32);
            }
        }
        bitmap
    }

    fn position(&self, x: u32, y: u32) -> usize {
        y as usize * self.size as usize + x as usize
    }

    pub fn set(&mut self, x: u32, y: u32) {
        let pos = self.position(x, y);
        self.bits[pos / 8] |= 1 << (pos % 8);
    }

    #[cfg(test)]
    pub fn get(&self, x: u32, y: u32) -> bool {
        let pos = self.position(x, y);
        self.bits[pos / 8] & (1 << (pos % 8)) != 0
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    #[cfg(test)]
    pub fn count_ones(&self) -> u32 {
        self.bits.iter().map(|byte| byte.count_ones()).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&byte| byte == 0)
    }
}

/// Frames and compresses a bitmap into the wire container.
pub fn encode(bitmap: &Bitmap) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(bitmap.as_bytes().len() / 4 + 8);
    out.push(FORMAT_DEFLATE);
    let mut encoder = DeflateEncoder::new(out, Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(bitmap.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Rasterizes and encodes the markers of one tile window.
pub fn encode_cells<'a>(
    window: &Bounds,
    size: u32,
    cells: impl IntoIterator<Item = &'a Cell>,
) -> Result<(Bitmap, Vec<u8>), CodecError> {
    let bitmap = Bitmap::from_cells(window, size, cells);
    let container = encode(&bitmap)?;
    Ok((bitmap, container))
}

/// Inverse of [`encode`] for a tile of side `size`.
pub fn decode(container: &[u8], size: u32) -> Result<Bitmap, CodecError> {
    let (&version, payload) = container.split_first().ok_or(CodecError::Empty)?;
    match version {
        FORMAT_DEFLATE => {
            let expected = Bitmap::byte_len(size);
            let mut bits = Vec::with_capacity(expected);
            // one spare byte so oversized payloads are detected without inflating them fully
            DeflateDecoder::new(payload)
                .take(expected as u64 + 1)
                .read_to_end(&mut bits)?;
            Bitmap::from_bytes(size, bits)
        }
        other => Err(CodecError::UnsupportedVersion(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: u32 = 64;

    fn tile_window() -> Bounds {
        Bounds::new(0, 0, S as i32 - 1, S as i32 - 1)
    }

    /// Set cells as local `(x, y)` offsets, row by row.
    fn ones(bitmap: &Bitmap) -> Vec<(u32, u32)> {
        let size = bitmap.size();
        (0..size)
            .flat_map(|y| (0..size).map(move |x| (x, y)))
            .filter(|&(x, y)| bitmap.get(x, y))
            .collect()
    }

    #[test]
    fn test_bit_layout_is_lsb_first() {
        let mut bitmap = Bitmap::new(S);
        bitmap.set(0, 0);
        bitmap.set(9, 0);
        bitmap.set(0, 1);
        assert_eq!(bitmap.as_bytes()[0], 0b0000_0001);
        assert_eq!(bitmap.as_bytes()[1], 0b0000_0010);
        // (0, 1) is position 64, the first bit of byte 8
        assert_eq!(bitmap.as_bytes()[8], 0b0000_0001);
    }

    #[test]
    fn test_single_top_left_marker() {
        let cells = [Cell::new(0, 0)];
        let (bitmap, container) = encode_cells(&tile_window(), S, &cells).unwrap();
        assert_eq!(bitmap.count_ones(), 1);
        assert_eq!(container[0], FORMAT_DEFLATE);

        let decoded = decode(&container, S).unwrap();
        assert_eq!(decoded, bitmap);
        assert_eq!(ones(&decoded), vec![(0, 0)]);
    }

    #[test]
    fn test_empty_and_full_tiles_round_trip() {
        let empty = Bitmap::new(S);
        assert_eq!(decode(&encode(&empty).unwrap(), S).unwrap(), empty);

        let all: Vec<Cell> = tile_window().cells().collect();
        let (full, container) = encode_cells(&tile_window(), S, &all).unwrap();
        assert_eq!(full.count_ones(), S * S);
        assert!(full.as_bytes().iter().all(|&b| b == 0xff));
        assert_eq!(decode(&container, S).unwrap(), full);
    }

    #[test]
    fn test_round_trip_offset_window() {
        let window = Bounds::new(-128, 64, -65, 127);
        let cells = [Cell::new(-128, 64), Cell::new(-65, 127), Cell::new(-100, 90), Cell::new(0, 0)];
        let (bitmap, container) = encode_cells(&window, S, &cells).unwrap();
        assert_eq!(bitmap.count_ones(), 3);
        let decoded = decode(&container, S).unwrap();
        assert_eq!(ones(&decoded), vec![(0, 0), (28, 26), (63, 63)]);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let cells = [Cell::new(3, 4), Cell::new(40, 2), Cell::new(63, 0)];
        let (_, first) = encode_cells(&tile_window(), S, &cells).unwrap();
        let (_, second) = encode_cells(&tile_window(), S, cells.iter().rev()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut container = encode(&Bitmap::new(S)).unwrap();
        container[0] = 0x02;
        assert!(matches!(decode(&container, S), Err(CodecError::UnsupportedVersion(0x02))));
        assert!(matches!(decode(&[], S), Err(CodecError::Empty)));
    }

    #[test]
    fn test_rejects_wrong_size() {
        let container = encode(&Bitmap::new(32)).unwrap();
        assert!(matches!(
            decode(&container, S),
            Err(CodecError::LengthMismatch { expected: 512, actual: 128 })
        ));
        let container = encode(&Bitmap::new(S)).unwrap();
        assert!(matches!(
            decode(&container, 32),
            Err(CodecError::LengthMismatch { expected: 128, actual: 129 })
        ));
    }
}
