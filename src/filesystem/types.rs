use crate::model::{FeatureKind, TemporalType};
use serde::{Deserialize, Serialize};

/// One column of a filesystem's feature schema. Serialized as
/// `{name, type}` in the descriptor snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FeatureKind,
}

/// Names of the metadata features that carry the spatial coordinates, for
/// ingestion tools that extract them from raw records. Serialized as
/// `{latName, lonName}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialHint {
    #[serde(rename = "latName")]
    pub latitude_name: String,
    #[serde(rename = "lonName")]
    pub longitude_name: String,
}

/// The persisted descriptor of a logical filesystem. Every node holds the
/// same descriptor for a given name; it is created and mutated only by
/// cluster-wide admin events.
///
/// The camelCase keys are the snapshot file's contract with external
/// tooling, so the renames here are load-bearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemConfig {
    pub name: String,
    pub spatial_precision: usize,
    pub temporal_type: TemporalType,
    pub nodes_per_group: usize,
    pub feature_schema: Vec<FeatureDef>,
    pub spatial_hint: Option<SpatialHint>,
}
