//! Geohash Engine
//!
//! Bit-level geohash encoding shared by record indexing, partitioning,
//! neighbor enumeration, and polygon covering.
//!
//! ## Mechanism
//! - **Encoding**: longitude and latitude intervals are bisected
//!   alternately (longitude on even bit positions), 5 bits per base-32
//!   character, packed MSB-first.
//! - **Tie-break**: the high branch is taken only on strict `>`, so a point
//!   exactly on a cell boundary belongs to the cell to the south/west.
//!   Every consumer of stored data depends on this rule staying put.
//! - **Covering**: polygon-to-cell covers run on a projected integer grid
//!   (see `grid`) so the results are deterministic across platforms.

pub mod cover;
pub mod grid;


use crate::error::{NodeError, Result};
use crate::model::SpatialRange;

/// The geohash base-32 alphabet. Array index = 5-bit character value.
pub const ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

pub const BITS_PER_CHAR: usize = 5;

/// A u64 fits 12 characters worth of precision.
pub const MAX_PRECISION: usize = 12;

fn char_index(c: char) -> Option<u8> {
    let c = c.to_ascii_lowercase();
    ALPHABET.iter().position(|&b| b as char == c).map(|i| i as u8)
}

/// Wrap out-of-range coordinates back into `[-90, 90] x [-180, 180]` by
/// repeatedly folding over the opposite edge.
pub fn normalize(mut lat: f64, mut lon: f64) -> (f64, f64) {
    while lat < -90.0 || lat > 90.0 {
        lat = if lat < -90.0 { 180.0 + lat } else { -180.0 + lat };
    }
    while lon < -180.0 || lon > 180.0 {
        lon = if lon < -180.0 { 360.0 + lon } else { -360.0 + lon };
    }
    (lat, lon)
}

/// Encode a coordinate pair into a geohash of `precision` characters.
pub fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let precision = precision.clamp(1, MAX_PRECISION);
    let (lat, lon) = normalize(lat, lon);

    // Interval state indexed by bit parity: 0 = longitude, 1 = latitude.
    let mut high = [180.0f64, 90.0];
    let mut low = [-180.0f64, -90.0];
    let value = [lon, lat];

    let mut hash = String::with_capacity(precision);
    for p in 0..precision {
        let mut char_bits = 0usize;
        for b in 0..BITS_PER_CHAR {
            let axis = (p * BITS_PER_CHAR + b) % 2;
            char_bits <<= 1;
            let middle = (high[axis] + low[axis]) / 2.0;
            if value[axis] > middle {
                char_bits |= 1;
                low[axis] = middle;
            } else {
                high[axis] = middle;
            }
        }
        hash.push(ALPHABET[char_bits] as char);
    }
    hash
}

/// Decode a geohash to the bounding box it denotes.
pub fn decode(hash: &str) -> Result<SpatialRange> {
    let bits = hash_bits(hash)?;
    let (lon_lo, lon_hi) = decode_axis(&bits, 0, -180.0, 180.0);
    let (lat_lo, lat_hi) = decode_axis(&bits, 1, -90.0, 90.0);
    Ok(SpatialRange::new(lat_lo, lat_hi, lon_lo, lon_hi))
}

/// Interpret a geohash as an unsigned integer, 5 bits per character,
/// MSB-first. Only the first 12 characters participate, which keeps the
/// function order-preserving on any fixed length up to 12.
pub fn hash_to_long(hash: &str) -> Result<u64> {
    let mut long_form = 0u64;
    for c in hash.chars().take(MAX_PRECISION) {
        let idx = char_index(c).ok_or_else(|| invalid_char(c))?;
        long_form = (long_form << BITS_PER_CHAR) | idx as u64;
    }
    Ok(long_form)
}

/// The eight compass directions, in the order neighbors are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    NorthWest,
    North,
    NorthEast,
    West,
    East,
    SouthWest,
    South,
    SouthEast,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::NorthWest,
        Direction::North,
        Direction::NorthEast,
        Direction::West,
        Direction::East,
        Direction::SouthWest,
        Direction::South,
        Direction::SouthEast,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::NorthWest => Direction::SouthEast,
            Direction::North => Direction::South,
            Direction::NorthEast => Direction::SouthWest,
            Direction::West => Direction::East,
            Direction::East => Direction::West,
            Direction::SouthWest => Direction::NorthEast,
            Direction::South => Direction::North,
            Direction::SouthEast => Direction::NorthWest,
        }
    }
}

/// The same-precision neighbor of `hash` in the given direction, computed
/// by re-encoding the cell center offset by the cell extent. Crossing the
/// antimeridian or a pole wraps through `normalize`.
pub fn neighbor(hash: &str, direction: Direction) -> Result<String> {
    let hash = hash.trim();
    if hash.is_empty() {
        return Err(NodeError::Validation("empty geohash".into()));
    }
    let precision = hash.chars().count();
    let range = decode(hash)?;
    let center = range.center();
    let half_w = range.lon_hi - center.lon;
    let half_h = range.lat_hi - center.lat;
    let (lat, lon) = match direction {
        Direction::NorthWest => (range.lat_hi + half_h, range.lon_lo - half_w),
        Direction::North => (range.lat_hi + half_h, center.lon),
        Direction::NorthEast => (range.lat_hi + half_h, range.lon_hi + half_w),
        Direction::West => (center.lat, range.lon_lo - half_w),
        Direction::East => (center.lat, range.lon_hi + half_w),
        Direction::SouthWest => (range.lat_lo - half_h, range.lon_lo - half_w),
        Direction::South => (range.lat_lo - half_h, center.lon),
        Direction::SouthEast => (range.lat_lo - half_h, range.lon_hi + half_w),
    };
    Ok(encode(lat, lon, precision))
}

/// All eight neighbors of `hash`, ordered NW, N, NE, W, E, SW, S, SE.
pub fn neighbors(hash: &str) -> Result<Vec<String>> {
    Direction::ALL
        .iter()
        .map(|&d| neighbor(hash, d))
        .collect()
}

/// A geohash cell at bit (rather than character) granularity, used by the
/// prefix-refinement cover. Appending a bit splits the cell in half along
/// the next alternating axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitHash {
    bits: Vec<bool>,
}

impl BitHash {
    /// The whole-world cell.
    pub fn root() -> Self {
        Self { bits: Vec::new() }
    }

    pub fn from_hash(hash: &str) -> Result<Self> {
        Ok(Self {
            bits: hash_bits(hash)?,
        })
    }

    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    pub fn child(&self, high: bool) -> BitHash {
        let mut bits = self.bits.clone();
        bits.push(high);
        BitHash { bits }
    }

    /// Bounding box of this cell.
    pub fn range(&self) -> SpatialRange {
        let (lon_lo, lon_hi) = decode_axis(&self.bits, 0, -180.0, 180.0);
        let (lat_lo, lat_hi) = decode_axis(&self.bits, 1, -90.0, 90.0);
        SpatialRange::new(lat_lo, lat_hi, lon_lo, lon_hi)
    }

    /// The lexicographically smallest and largest `precision`-character
    /// geohashes inside this cell, obtained by padding the remaining bits
    /// with zeroes and ones.
    pub fn cell_range(&self, precision: usize) -> (String, String) {
        let total = precision * BITS_PER_CHAR;
        let mut min_bits = self.bits.clone();
        let mut max_bits = self.bits.clone();
        min_bits.truncate(total);
        max_bits.truncate(total);
        while min_bits.len() < total {
            min_bits.push(false);
            max_bits.push(true);
        }
        (pack_bits(&min_bits), pack_bits(&max_bits))
    }
}

fn pack_bits(bits: &[bool]) -> String {
    bits.chunks(BITS_PER_CHAR)
        .map(|chunk| {
            let mut v = 0usize;
            for &bit in chunk {
                v = (v << 1) | bit as usize;
            }
            ALPHABET[v] as char
        })
        .collect()
}

fn hash_bits(hash: &str) -> Result<Vec<bool>> {
    let mut bits = Vec::with_capacity(hash.len() * BITS_PER_CHAR);
    for c in hash.chars() {
        let idx = char_index(c).ok_or_else(|| invalid_char(c))?;
        for j in (0..BITS_PER_CHAR).rev() {
            bits.push((idx >> j) & 1 == 1);
        }
    }
    Ok(bits)
}

fn decode_axis(bits: &[bool], offset: usize, mut low: f64, mut high: f64) -> (f64, f64) {
    let mut i = offset;
    while i < bits.len() {
        let middle = (high + low) / 2.0;
        if bits[i] {
            low = middle;
        } else {
            high = middle;
        }
        i += 2;
    }
    (low, high)
}

fn invalid_char(c: char) -> NodeError {
    NodeError::Validation(format!("invalid geohash character '{}'", c))
}
