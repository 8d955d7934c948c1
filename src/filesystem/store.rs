//! Disk-backed block store for one filesystem.
//!
//! Blocks land under `<root>/<name>/<cell>/<bucket>/<uuid>.blk`, where
//! `cell` is the geohash of the record's point at the filesystem's spatial
//! precision and `bucket` is its temporal ordinal. The metadata index is
//! kept in memory and rebuilt from disk on restore; the payload is opaque
//! and only read back during scans.

use super::types::{FeatureDef, FilesystemConfig};
use crate::error::{NodeError, Result};
use crate::geohash;
use crate::geohash::grid::{GridPolygon, GridRect};
use crate::model::{Block, Coordinates, Metadata, Predicate};
use crate::partition::hash::temporal_bucket;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredBlock {
    path: PathBuf,
    metadata: Metadata,
}

#[derive(Debug)]
pub struct BlockStore {
    config: FilesystemConfig,
    dir: PathBuf,
    index: HashMap<String, Vec<StoredBlock>>,
}

impl BlockStore {
    /// Create the on-disk directory for a fresh filesystem.
    pub fn create(root: &Path, config: FilesystemConfig) -> Result<BlockStore> {
        let dir = root.join(&config.name);
        fs::create_dir_all(&dir)?;
        Ok(BlockStore {
            config,
            dir,
            index: HashMap::new(),
        })
    }

    /// Open an existing filesystem and rebuild the metadata index from the
    /// blocks on disk. Unreadable blocks are logged and skipped.
    pub fn open(root: &Path, config: FilesystemConfig) -> Result<BlockStore> {
        let mut store = Self::create(root, config)?;
        store.rebuild_index()?;
        Ok(store)
    }

    pub fn config(&self) -> &FilesystemConfig {
        &self.config
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.config
            .feature_schema
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn block_count(&self) -> usize {
        self.index.values().map(|v| v.len()).sum()
    }

    /// Persist a block and index its metadata. The block must carry both
    /// spatial and temporal metadata or it cannot be placed.
    pub fn store_block(&mut self, block: &Block) -> Result<String> {
        let meta = &block.metadata;
        let spatial = meta
            .spatial
            .as_ref()
            .ok_or_else(|| NodeError::Filesystem("block has no spatial metadata".into()))?;
        let ts = meta
            .timestamp_ms
            .ok_or_else(|| NodeError::Filesystem("block has no timestamp".into()))?;
        let point = spatial.representative_point()?;
        let cell = geohash::encode(point.lat, point.lon, self.config.spatial_precision);
        let bucket = temporal_bucket(ts, self.config.temporal_type)?;

        let bucket_dir = self.dir.join(&cell).join(bucket.to_string());
        fs::create_dir_all(&bucket_dir)?;
        let path = bucket_dir.join(format!("{}.blk", Uuid::new_v4()));
        let bytes =
            bincode::serialize(block).map_err(|e| NodeError::Serialization(e.to_string()))?;
        fs::write(&path, bytes)?;

        self.index.entry(cell).or_default().push(StoredBlock {
            path: path.clone(),
            metadata: meta.clone(),
        });
        Ok(path.to_string_lossy().into_owned())
    }

    /// Identify the blocks a query would touch: geohash cell to block
    /// paths, filtered by time window, polygon, and metadata predicate.
    /// The polygon test runs against each stored cell's rectangle, so the
    /// cost is bounded by what this node actually holds.
    pub fn list_blocks(
        &self,
        window: Option<(i64, i64)>,
        polygon: Option<&[Coordinates]>,
        predicate: Option<&Predicate>,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let geometry = match polygon {
            Some(vertices) => Some(GridPolygon::new(vertices)?),
            None => None,
        };
        let mut out = BTreeMap::new();
        for (cell, blocks) in &self.index {
            if let Some(geometry) = &geometry {
                let rect = GridRect::from_range(&geohash::decode(cell)?);
                if !geometry.intersects_rect(&rect) {
                    continue;
                }
            }
            let paths: Vec<String> = blocks
                .iter()
                .filter(|b| {
                    let in_window = match (window, b.metadata.timestamp_ms) {
                        (Some((start, end)), Some(ts)) => ts >= start && ts < end,
                        (Some(_), None) => false,
                        (None, _) => true,
                    };
                    in_window && predicate.map_or(true, |p| p.matches(&b.metadata))
                })
                .map(|b| b.path.to_string_lossy().into_owned())
                .collect();
            if !paths.is_empty() {
                out.insert(cell.clone(), paths);
            }
        }
        Ok(out)
    }

    /// Per-cell block counts, served to metadata overview requests.
    pub fn overview(&self) -> serde_json::Value {
        let cells: Vec<serde_json::Value> = self
            .index
            .iter()
            .map(|(cell, blocks)| {
                serde_json::json!({ "cell": cell, "blocks": blocks.len() })
            })
            .collect();
        serde_json::json!({
            "name": self.config.name,
            "blocks": self.block_count(),
            "cells": cells,
        })
    }

    fn rebuild_index(&mut self) -> Result<()> {
        let mut restored = 0usize;
        for cell_entry in fs::read_dir(&self.dir)? {
            let cell_path = cell_entry?.path();
            if !cell_path.is_dir() {
                continue;
            }
            for bucket_entry in fs::read_dir(&cell_path)? {
                let bucket_path = bucket_entry?.path();
                if !bucket_path.is_dir() {
                    continue;
                }
                for block_entry in fs::read_dir(&bucket_path)? {
                    let block_path = block_entry?.path();
                    if block_path.extension().map_or(true, |e| e != "blk") {
                        continue;
                    }
                    match read_block(&block_path) {
                        Ok(block) => {
                            let cell = cell_path
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default();
                            self.index.entry(cell).or_default().push(StoredBlock {
                                path: block_path,
                                metadata: block.metadata,
                            });
                            restored += 1;
                        }
                        Err(e) => {
                            tracing::warn!(
                                "skipping unreadable block {}: {}",
                                block_path.display(),
                                e
                            );
                        }
                    }
                }
            }
        }
        if restored > 0 {
            tracing::info!(
                "restored {} blocks for filesystem {}",
                restored,
                self.config.name
            );
        }
        Ok(())
    }
}

/// Load one block back from disk. Free-standing so scan workers can run
/// over plain paths without touching the registry.
pub fn read_block(path: &Path) -> Result<Block> {
    let bytes = fs::read(path)?;
    bincode::deserialize(&bytes).map_err(|e| NodeError::Serialization(e.to_string()))
}

/// Scan blocks into result rows: one schema-ordered row of rendered
/// feature values per block passing the predicate. Missing features render
/// as empty strings.
pub fn scan_blocks(
    paths: &[String],
    schema: &[FeatureDef],
    predicate: Option<&Predicate>,
) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    for path in paths {
        let block = read_block(Path::new(path))?;
        if !predicate.map_or(true, |p| p.matches(&block.metadata)) {
            continue;
        }
        let row = schema
            .iter()
            .map(|def| {
                block
                    .metadata
                    .feature(&def.name)
                    .map(|v| v.render())
                    .unwrap_or_default()
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}
