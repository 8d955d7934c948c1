#[cfg(test)]
mod tests {
    use crate::filesystem::store::{scan_blocks, BlockStore};
    use crate::filesystem::types::{FeatureDef, FilesystemConfig, SpatialHint};
    use crate::filesystem::FilesystemRegistry;
    use crate::model::{
        Block, Comparison, Coordinates, Feature, FeatureKind, FeatureValue, Metadata, Predicate,
        PredicateOp, SpatialProperties, TemporalType,
    };
    use tempfile::tempdir;

    const JUNE_15_NOON: i64 = 1_686_830_400_000;

    fn weather_config() -> FilesystemConfig {
        FilesystemConfig {
            name: "weather".into(),
            spatial_precision: 4,
            temporal_type: TemporalType::Day,
            nodes_per_group: 2,
            feature_schema: vec![
                FeatureDef {
                    name: "temperature".into(),
                    kind: FeatureKind::Double,
                },
                FeatureDef {
                    name: "station".into(),
                    kind: FeatureKind::String,
                },
            ],
            spatial_hint: Some(SpatialHint {
                latitude_name: "lat".into(),
                longitude_name: "lon".into(),
            }),
        }
    }

    fn weather_block(lat: f64, lon: f64, ts: i64, temperature: f64) -> Block {
        Block {
            filesystem: "weather".into(),
            metadata: Metadata {
                timestamp_ms: Some(ts),
                spatial: Some(SpatialProperties::Point(Coordinates::new(lat, lon))),
                features: vec![
                    Feature::new("temperature", FeatureValue::Double(temperature)),
                    Feature::new("station", FeatureValue::Str("ks-04".into())),
                ],
            },
            payload: b"raw observation".to_vec(),
        }
    }

    // ============================================================
    // REGISTRY LIFECYCLE
    // ============================================================

    #[test]
    fn test_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut registry = FilesystemRegistry::restore(dir.path()).unwrap();
        registry.create(weather_config()).unwrap();
        registry.create(weather_config()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(dir.path().join("weather").is_dir());
    }

    #[test]
    fn test_delete_removes_directory() {
        let dir = tempdir().unwrap();
        let mut registry = FilesystemRegistry::restore(dir.path()).unwrap();
        registry.create(weather_config()).unwrap();

        let store = registry.get_mut("weather").unwrap();
        store
            .store_block(&weather_block(40.7, -74.0, JUNE_15_NOON, 21.5))
            .unwrap();
        assert!(dir.path().join("weather").is_dir());

        registry.delete("weather").unwrap();
        assert!(registry.get("weather").is_none());
        assert!(!dir.path().join("weather").exists());

        // Deleting an absent filesystem is fine.
        registry.delete("weather").unwrap();
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let dir = tempdir().unwrap();
        {
            let mut registry = FilesystemRegistry::restore(dir.path()).unwrap();
            registry.create(weather_config()).unwrap();
            registry
                .get_mut("weather")
                .unwrap()
                .store_block(&weather_block(40.7, -74.0, JUNE_15_NOON, 21.5))
                .unwrap();
        }

        let registry = FilesystemRegistry::restore(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        let store = registry.get("weather").unwrap();
        assert_eq!(store.config(), &weather_config());
        // The block index came back from disk.
        assert_eq!(store.block_count(), 1);
    }

    #[test]
    fn test_snapshot_uses_camel_case_contract() {
        let dir = tempdir().unwrap();
        let mut registry = FilesystemRegistry::restore(dir.path()).unwrap();
        registry.create(weather_config()).unwrap();

        // The snapshot keys are read by external tooling; the exact
        // casing is the contract.
        let text = std::fs::read_to_string(dir.path().join("filesystems.json")).unwrap();
        assert!(text.contains("\"spatialPrecision\""));
        assert!(text.contains("\"temporalType\""));
        assert!(text.contains("\"nodesPerGroup\""));
        assert!(text.contains("\"featureSchema\""));
        assert!(text.contains("\"type\""));
        assert!(text.contains("\"latName\""));
        assert!(text.contains("\"lonName\""));
        assert!(!text.contains("spatial_precision"));

        // The lock is released once the write completes.
        assert!(!dir.path().join("filesystems.lock").exists());
    }

    #[test]
    fn test_restore_breaks_stale_snapshot_lock() {
        let dir = tempdir().unwrap();
        {
            let mut registry = FilesystemRegistry::restore(dir.path()).unwrap();
            registry.create(weather_config()).unwrap();
        }

        // A crashed process left its lock behind; restore waits it out,
        // breaks it, and comes up anyway.
        std::fs::write(dir.path().join("filesystems.lock"), "12345").unwrap();
        let registry = FilesystemRegistry::restore(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(!dir.path().join("filesystems.lock").exists());
    }

    #[test]
    fn test_restore_reflects_delete() {
        let dir = tempdir().unwrap();
        {
            let mut registry = FilesystemRegistry::restore(dir.path()).unwrap();
            registry.create(weather_config()).unwrap();
            registry.delete("weather").unwrap();
        }
        let registry = FilesystemRegistry::restore(dir.path()).unwrap();
        assert!(registry.is_empty());
    }

    // ============================================================
    // BLOCK STORE
    // ============================================================

    #[test]
    fn test_store_block_requires_placement_metadata() {
        let dir = tempdir().unwrap();
        let mut store = BlockStore::create(dir.path(), weather_config()).unwrap();
        let mut block = weather_block(40.7, -74.0, JUNE_15_NOON, 21.5);
        block.metadata.spatial = None;
        assert!(store.store_block(&block).is_err());
    }

    #[test]
    fn test_list_blocks_by_window_and_polygon() {
        let dir = tempdir().unwrap();
        let mut store = BlockStore::create(dir.path(), weather_config()).unwrap();
        store
            .store_block(&weather_block(40.7, -74.0, JUNE_15_NOON, 21.5))
            .unwrap();
        store
            .store_block(&weather_block(40.7, -74.0, JUNE_15_NOON + 86_400_000, 23.0))
            .unwrap();
        store
            .store_block(&weather_block(-33.9, 18.4, JUNE_15_NOON, 15.0))
            .unwrap();

        // Day window catches only the first block in the NYC cell.
        let day = Some((JUNE_15_NOON - 43_200_000, JUNE_15_NOON + 43_200_000));
        let nyc_box = vec![
            Coordinates::new(40.0, -75.0),
            Coordinates::new(40.0, -73.0),
            Coordinates::new(41.5, -73.0),
            Coordinates::new(41.5, -75.0),
        ];
        let listed = store.list_blocks(day, Some(&nyc_box), None).unwrap();
        assert_eq!(listed.len(), 1);
        let paths = listed.get("dr5r").unwrap();
        assert_eq!(paths.len(), 1);

        // No filters lists everything.
        let all = store.list_blocks(None, None, None).unwrap();
        let total: usize = all.values().map(|v| v.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_list_blocks_metadata_predicate() {
        let dir = tempdir().unwrap();
        let mut store = BlockStore::create(dir.path(), weather_config()).unwrap();
        store
            .store_block(&weather_block(40.7, -74.0, JUNE_15_NOON, 21.5))
            .unwrap();
        store
            .store_block(&weather_block(40.7, -74.0, JUNE_15_NOON, 3.0))
            .unwrap();

        let warm = Predicate {
            comparisons: vec![Comparison {
                feature: "temperature".into(),
                op: PredicateOp::Gt,
                value: FeatureValue::Double(10.0),
            }],
        };
        let listed = store.list_blocks(None, None, Some(&warm)).unwrap();
        let total: usize = listed.values().map(|v| v.len()).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_scan_blocks_renders_schema_rows() {
        let dir = tempdir().unwrap();
        let config = weather_config();
        let schema = config.feature_schema.clone();
        let mut store = BlockStore::create(dir.path(), config).unwrap();
        store
            .store_block(&weather_block(40.7, -74.0, JUNE_15_NOON, 21.5))
            .unwrap();

        let listed = store.list_blocks(None, None, None).unwrap();
        let paths: Vec<String> = listed.into_values().flatten().collect();
        let rows = scan_blocks(&paths, &schema, None).unwrap();
        assert_eq!(rows, vec![vec!["21.5".to_string(), "ks-04".to_string()]]);

        let cold = Predicate {
            comparisons: vec![Comparison {
                feature: "temperature".into(),
                op: PredicateOp::Lt,
                value: FeatureValue::Double(0.0),
            }],
        };
        let rows = scan_blocks(&paths, &schema, Some(&cold)).unwrap();
        assert!(rows.is_empty());
    }
}
