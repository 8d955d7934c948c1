//! Core data model shared by the wire protocol, the partitioner, and the
//! block stores.
//!
//! Everything here is plain data with serde derives; behavior lives in the
//! subsystems that consume it.

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A point on the globe, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A latitude/longitude bounding box. Bounds follow geohash cell semantics:
/// the south/west edges are inclusive, so a point exactly on a boundary
/// belongs to the cell to its south or west.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialRange {
    pub lat_lo: f64,
    pub lat_hi: f64,
    pub lon_lo: f64,
    pub lon_hi: f64,
}

impl SpatialRange {
    pub fn new(lat_lo: f64, lat_hi: f64, lon_lo: f64, lon_hi: f64) -> Self {
        Self {
            lat_lo,
            lat_hi,
            lon_lo,
            lon_hi,
        }
    }

    pub fn center(&self) -> Coordinates {
        Coordinates::new(
            (self.lat_lo + self.lat_hi) / 2.0,
            (self.lon_lo + self.lon_hi) / 2.0,
        )
    }

    pub fn contains(&self, c: Coordinates) -> bool {
        c.lat >= self.lat_lo && c.lat <= self.lat_hi && c.lon >= self.lon_lo && c.lon <= self.lon_hi
    }

    /// Upper-left and lower-right corners, the orientation the projected
    /// grid uses (y grows southward).
    pub fn corner_points(&self) -> (Coordinates, Coordinates) {
        (
            Coordinates::new(self.lat_hi, self.lon_lo),
            Coordinates::new(self.lat_lo, self.lon_hi),
        )
    }
}

/// Spatial component of a record: a single point or a polygon boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpatialProperties {
    Point(Coordinates),
    Polygon(Vec<Coordinates>),
}

impl SpatialProperties {
    /// A deterministic single point standing in for the whole shape: the
    /// point itself, or the polygon's bounding-box center.
    pub fn representative_point(&self) -> Result<Coordinates> {
        match self {
            SpatialProperties::Point(c) => Ok(*c),
            SpatialProperties::Polygon(vertices) => {
                if vertices.is_empty() {
                    return Err(NodeError::Validation("empty polygon".into()));
                }
                let mut lat_lo = f64::MAX;
                let mut lat_hi = f64::MIN;
                let mut lon_lo = f64::MAX;
                let mut lon_hi = f64::MIN;
                for v in vertices {
                    lat_lo = lat_lo.min(v.lat);
                    lat_hi = lat_hi.max(v.lat);
                    lon_lo = lon_lo.min(v.lon);
                    lon_hi = lon_hi.max(v.lon);
                }
                Ok(Coordinates::new(
                    (lat_lo + lat_hi) / 2.0,
                    (lon_lo + lon_hi) / 2.0,
                ))
            }
        }
    }
}

/// Temporal bucketing granularity declared per filesystem. Records are
/// bucketed by UTC truncation to this granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemporalType {
    Hour,
    Day,
    Month,
    Year,
}

impl fmt::Display for TemporalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TemporalType::Hour => "HOUR",
            TemporalType::Day => "DAY",
            TemporalType::Month => "MONTH",
            TemporalType::Year => "YEAR",
        };
        write!(f, "{}", s)
    }
}

/// The declared type of a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureKind::Int => "int",
            FeatureKind::Long => "long",
            FeatureKind::Float => "float",
            FeatureKind::Double => "double",
            FeatureKind::String => "string",
            FeatureKind::Bytes => "bytes",
        };
        write!(f, "{}", s)
    }
}

/// A typed feature value. Accessors fail instead of coercing, so a schema
/// mismatch is surfaced at the point of use rather than silently widened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl FeatureValue {
    pub fn kind(&self) -> FeatureKind {
        match self {
            FeatureValue::Int(_) => FeatureKind::Int,
            FeatureValue::Long(_) => FeatureKind::Long,
            FeatureValue::Float(_) => FeatureKind::Float,
            FeatureValue::Double(_) => FeatureKind::Double,
            FeatureValue::Str(_) => FeatureKind::String,
            FeatureValue::Bytes(_) => FeatureKind::Bytes,
        }
    }

    pub fn as_int(&self) -> Result<i32> {
        match self {
            FeatureValue::Int(v) => Ok(*v),
            other => Err(mismatch(FeatureKind::Int, other)),
        }
    }

    pub fn as_long(&self) -> Result<i64> {
        match self {
            FeatureValue::Long(v) => Ok(*v),
            other => Err(mismatch(FeatureKind::Long, other)),
        }
    }

    pub fn as_float(&self) -> Result<f32> {
        match self {
            FeatureValue::Float(v) => Ok(*v),
            other => Err(mismatch(FeatureKind::Float, other)),
        }
    }

    pub fn as_double(&self) -> Result<f64> {
        match self {
            FeatureValue::Double(v) => Ok(*v),
            other => Err(mismatch(FeatureKind::Double, other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            FeatureValue::Str(v) => Ok(v),
            other => Err(mismatch(FeatureKind::String, other)),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            FeatureValue::Bytes(v) => Ok(v),
            other => Err(mismatch(FeatureKind::Bytes, other)),
        }
    }

    /// String rendering used for result rows.
    pub fn render(&self) -> String {
        match self {
            FeatureValue::Int(v) => v.to_string(),
            FeatureValue::Long(v) => v.to_string(),
            FeatureValue::Float(v) => v.to_string(),
            FeatureValue::Double(v) => v.to_string(),
            FeatureValue::Str(v) => v.clone(),
            FeatureValue::Bytes(v) => format!("{} bytes", v.len()),
        }
    }

    /// Ordering between two values of the same kind; `None` across kinds.
    pub fn compare(&self, other: &FeatureValue) -> Option<Ordering> {
        match (self, other) {
            (FeatureValue::Int(a), FeatureValue::Int(b)) => Some(a.cmp(b)),
            (FeatureValue::Long(a), FeatureValue::Long(b)) => Some(a.cmp(b)),
            (FeatureValue::Float(a), FeatureValue::Float(b)) => a.partial_cmp(b),
            (FeatureValue::Double(a), FeatureValue::Double(b)) => a.partial_cmp(b),
            (FeatureValue::Str(a), FeatureValue::Str(b)) => Some(a.cmp(b)),
            (FeatureValue::Bytes(a), FeatureValue::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn mismatch(wanted: FeatureKind, got: &FeatureValue) -> NodeError {
    NodeError::Validation(format!(
        "expected {} feature, found {}",
        wanted,
        got.kind()
    ))
}

/// A named feature carried by a record's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub value: FeatureValue,
}

impl Feature {
    pub fn new(name: impl Into<String>, value: FeatureValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Record metadata: a UTC millisecond timestamp, a spatial shape, and typed
/// features. All components are optional on the query side; stored blocks
/// are expected to carry all of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub timestamp_ms: Option<i64>,
    pub spatial: Option<SpatialProperties>,
    pub features: Vec<Feature>,
}

impl Metadata {
    pub fn feature(&self, name: &str) -> Option<&FeatureValue> {
        self.features
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
    }
}

/// One unit of ingestion: metadata plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub filesystem: String,
    pub metadata: Metadata,
    pub payload: Vec<u8>,
}

/// Comparison operator for feature predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A single feature comparison. A missing feature or a kind mismatch fails
/// the comparison rather than the whole query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub feature: String,
    pub op: PredicateOp,
    pub value: FeatureValue,
}

impl Comparison {
    pub fn matches(&self, meta: &Metadata) -> bool {
        let actual = match meta.feature(&self.feature) {
            Some(v) => v,
            None => return false,
        };
        let ord = match actual.compare(&self.value) {
            Some(ord) => ord,
            None => return false,
        };
        match self.op {
            PredicateOp::Eq => ord == Ordering::Equal,
            PredicateOp::Ne => ord != Ordering::Equal,
            PredicateOp::Lt => ord == Ordering::Less,
            PredicateOp::Le => ord != Ordering::Greater,
            PredicateOp::Gt => ord == Ordering::Greater,
            PredicateOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Conjunction of feature comparisons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub comparisons: Vec<Comparison>,
}

impl Predicate {
    pub fn matches(&self, meta: &Metadata) -> bool {
        self.comparisons.iter().all(|c| c.matches(meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_accessor_mismatch() {
        let v = FeatureValue::Int(7);
        assert_eq!(v.as_int().unwrap(), 7);
        let err = v.as_str().unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
    }

    #[test]
    fn test_feature_compare_across_kinds() {
        let a = FeatureValue::Int(1);
        let b = FeatureValue::Long(1);
        assert!(a.compare(&b).is_none());
    }

    #[test]
    fn test_predicate_conjunction() {
        let meta = Metadata {
            timestamp_ms: None,
            spatial: None,
            features: vec![
                Feature::new("temperature", FeatureValue::Double(21.5)),
                Feature::new("station", FeatureValue::Str("ks-04".into())),
            ],
        };
        let pred = Predicate {
            comparisons: vec![
                Comparison {
                    feature: "temperature".into(),
                    op: PredicateOp::Gt,
                    value: FeatureValue::Double(20.0),
                },
                Comparison {
                    feature: "station".into(),
                    op: PredicateOp::Eq,
                    value: FeatureValue::Str("ks-04".into()),
                },
            ],
        };
        assert!(pred.matches(&meta));

        let miss = Predicate {
            comparisons: vec![Comparison {
                feature: "humidity".into(),
                op: PredicateOp::Ge,
                value: FeatureValue::Double(0.0),
            }],
        };
        assert!(!miss.matches(&meta));
    }

    #[test]
    fn test_polygon_representative_point() {
        let poly = SpatialProperties::Polygon(vec![
            Coordinates::new(10.0, 20.0),
            Coordinates::new(10.0, 30.0),
            Coordinates::new(20.0, 30.0),
            Coordinates::new(20.0, 20.0),
        ]);
        let p = poly.representative_point().unwrap();
        assert_eq!(p.lat, 15.0);
        assert_eq!(p.lon, 25.0);
        assert!(SpatialProperties::Polygon(vec![])
            .representative_point()
            .is_err());
    }
}
