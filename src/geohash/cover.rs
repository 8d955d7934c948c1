//! Polygon-to-geohash covering.
//!
//! Two algorithms, chosen by polygon size:
//! - flood fill at a fixed precision, seeded from the first vertex;
//! - recursive binary prefix refinement, which emits far fewer cells for
//!   sparse polygons and bounds the flood fill's breadth-first blowup.

use super::grid::{GridPolygon, GridRect, GRID_WIDTH};
use super::{decode, encode, hash_to_long, neighbors, BitHash, BITS_PER_CHAR};
use crate::error::{NodeError, Result};
use crate::model::Coordinates;
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Above this many bounding-box cells at the target precision the engine
/// prefers prefix refinement over flood fill.
pub const PREFIX_SWITCH_CELLS: u64 = 64;

/// Every geohash of `precision` characters whose cell intersects the
/// polygon, found by flooding outward from the first vertex's cell.
///
/// If the seed cell already contains the polygon's bounding box it is the
/// entire cover. Cells are enqueued through a visited set, so each is
/// examined once.
pub fn intersecting_hashes(polygon: &[Coordinates], precision: usize) -> Result<Vec<String>> {
    let geometry = GridPolygon::new(polygon)?;
    let bbox = geometry.bounds();
    let seed = encode(polygon[0].lat, polygon[0].lon, precision);

    let mut hashes = BTreeSet::new();
    let mut queue = VecDeque::new();
    let mut seen = HashSet::new();
    seen.insert(seed.clone());
    queue.push_back(seed.clone());

    while let Some(hash) = queue.pop_front() {
        let rect = cell_rect(&hash)?;
        if hash == seed && rect.contains_rect(&bbox) {
            hashes.insert(hash);
            break;
        }
        if geometry.intersects_rect(&rect) {
            hashes.insert(hash.clone());
            for n in neighbors(&hash)? {
                if seen.insert(n.clone()) {
                    queue.push_back(n);
                }
            }
        }
    }
    Ok(hashes.into_iter().collect())
}

/// Variable-length binary prefixes whose union covers the polygon.
/// Recursion stops early wherever the polygon fully contains a cell, and
/// otherwise bottoms out at `precision` characters worth of bits.
pub fn prefix_hashes(polygon: &[Coordinates], precision: usize) -> Result<Vec<BitHash>> {
    let geometry = GridPolygon::new(polygon)?;
    let mut out = Vec::new();
    refine(&geometry, BitHash::root(), precision * BITS_PER_CHAR, &mut out);
    Ok(out)
}

fn refine(geometry: &GridPolygon, cell: BitHash, max_bits: usize, out: &mut Vec<BitHash>) {
    if cell.bit_len() >= max_bits {
        out.push(cell);
        return;
    }
    let rect = GridRect::from_range(&cell.range());
    if geometry.contains_rect(&rect) {
        out.push(cell);
        return;
    }
    for high in [false, true] {
        let child = cell.child(high);
        let child_rect = GridRect::from_range(&child.range());
        if geometry.intersects_rect(&child_rect) {
            refine(geometry, child, max_bits, out);
        }
    }
}

/// The set of group indexes a polygon's cover maps to, with each cell's
/// `hash_to_long` reduced modulo `group_count`.
///
/// Small polygons flood-fill and hash each cell directly. Large ones go
/// through prefix refinement without materializing the cover: a prefix's
/// cells form one contiguous integer range, a range at least `group_count`
/// long touches every group, and recursion stops as soon as the group set
/// saturates. The refinement depth is capped where unsplit cells already
/// span `group_count` hash values; the resulting cover can only widen,
/// which for query placement is a superset, never a miss.
pub fn covered_groups(
    polygon: &[Coordinates],
    precision: usize,
    group_count: usize,
) -> Result<BTreeSet<usize>> {
    if group_count == 0 {
        return Err(NodeError::Partition("network has zero groups".into()));
    }
    let mut groups = BTreeSet::new();

    if estimated_cells(polygon, precision)? <= PREFIX_SWITCH_CELLS {
        for hash in intersecting_hashes(polygon, precision)? {
            groups.insert((hash_to_long(&hash)? % group_count as u64) as usize);
        }
        return Ok(groups);
    }

    let full_bits = precision * BITS_PER_CHAR;
    let group_bits = (usize::BITS - group_count.saturating_sub(1).leading_zeros()) as usize;
    let cap = full_bits.saturating_sub(group_bits);
    let geometry = GridPolygon::new(polygon)?;
    refine_groups(
        &geometry,
        BitHash::root(),
        cap,
        precision,
        group_count,
        &mut groups,
    )?;
    Ok(groups)
}

fn refine_groups(
    geometry: &GridPolygon,
    cell: BitHash,
    max_bits: usize,
    precision: usize,
    group_count: usize,
    groups: &mut BTreeSet<usize>,
) -> Result<()> {
    if groups.len() == group_count {
        return Ok(());
    }
    let rect = GridRect::from_range(&cell.range());
    if cell.bit_len() >= max_bits || geometry.contains_rect(&rect) {
        let (min, max) = cell.cell_range(precision);
        let lo = hash_to_long(&min)?;
        let hi = hash_to_long(&max)?;
        if hi.saturating_sub(lo) >= group_count as u64 - 1 {
            groups.extend(0..group_count);
        } else {
            for v in lo..=hi {
                groups.insert((v % group_count as u64) as usize);
            }
        }
        return Ok(());
    }
    for high in [false, true] {
        let child = cell.child(high);
        let child_rect = GridRect::from_range(&child.range());
        if geometry.intersects_rect(&child_rect) {
            refine_groups(geometry, child, max_bits, precision, group_count, groups)?;
        }
    }
    Ok(())
}

fn estimated_cells(polygon: &[Coordinates], precision: usize) -> Result<u64> {
    let geometry = GridPolygon::new(polygon)?;
    let bbox = geometry.bounds();
    let lon_bits = (precision * BITS_PER_CHAR + 1) / 2;
    let lat_bits = precision * BITS_PER_CHAR / 2;
    let cell_w = (GRID_WIDTH >> lon_bits).max(1);
    let cell_h = (GRID_WIDTH >> lat_bits).max(1);
    Ok(((bbox.w / cell_w + 2) * (bbox.h / cell_h + 2)) as u64)
}

fn cell_rect(hash: &str) -> Result<GridRect> {
    Ok(GridRect::from_range(&decode(hash)?))
}
