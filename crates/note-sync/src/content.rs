//! Note content: the GeoJSON feature collection drawn on a note's map.
//!
//! Only the envelope is validated (a `FeatureCollection` of `Feature`
//! objects); geometry is carried as raw JSON since projection and
//! rendering belong to the map library on the other side.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a FeatureCollection, found {0}")]
    NotACollection(String),

    #[error("Feature {index} is not a GeoJSON Feature")]
    InvalidFeature { index: usize },
}

pub type Result<T> = std::result::Result<T, ContentError>;

/// Property keys that hold annotation text on marker features.
const ANNOTATION_KEYS: [&str; 2] = ["content", "label"];

/// A single drawn feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub geometry: Value,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    /// Foreign members such as `bbox`.
    #[serde(flatten)]
    pub foreign: Map<String, Value>,
}

impl Feature {
    /// Annotation text carried by a marker feature, if any.
    pub fn annotation(&self) -> Option<&str> {
        let props = self.properties.as_ref()?;
        ANNOTATION_KEYS
            .iter()
            .find_map(|key| props.get(*key).and_then(Value::as_str))
    }

    /// GeoJSON geometry type (`Point`, `LineString`, `Polygon`, ...).
    pub fn geometry_type(&self) -> Option<&str> {
        self.geometry.get("type").and_then(Value::as_str)
    }
}

/// Ordered features of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    pub features: Vec<Feature>,
    /// Foreign members (e.g. `crs`) are kept so re-uploads do not drop them.
    #[serde(flatten)]
    pub foreign: Map<String, Value>,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            features: Vec::new(),
            foreign: Map::new(),
        }
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features,
            ..Self::default()
        }
    }

    /// Parse and validate GeoJSON text.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Validate GeoJSON text and return it decoded but otherwise as received.
    pub fn validate(text: &str) -> Result<Value> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value.clone())?;
        Ok(value)
    }

    /// Validate an already-decoded JSON value.
    ///
    /// A bare `Feature` is accepted and wrapped into a one-element
    /// collection, matching what GeoJSON readers do on import.
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("<missing type>")
            .to_string();

        match kind.as_str() {
            "FeatureCollection" => {
                if let Some(features) = value.get("features").and_then(Value::as_array) {
                    if let Some(index) = features.iter().position(|f| !is_feature(f)) {
                        return Err(ContentError::InvalidFeature { index });
                    }
                } else {
                    return Err(ContentError::NotACollection(
                        "FeatureCollection without features".to_string(),
                    ));
                }
                Ok(serde_json::from_value(value)?)
            }
            "Feature" => {
                let feature: Feature = serde_json::from_value(value)?;
                Ok(Self::new(vec![feature]))
            }
            _ => Err(ContentError::NotACollection(kind)),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Null)
    }

    /// Compact JSON, the format uploaded to the drive.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Append features, keeping existing order.
    pub fn extend(&mut self, other: FeatureCollection) {
        self.features.extend(other.features);
    }

    /// Iterate annotation texts of marker features.
    pub fn annotations(&self) -> impl Iterator<Item = &str> {
        self.features.iter().filter_map(Feature::annotation)
    }
}

fn is_feature(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("Feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]}, "properties": null},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [2,2]}, "properties": {"content": "**Camp** here"}}
        ]
    }"#;

    #[test]
    fn test_parse_collection() {
        let fc = FeatureCollection::parse(SAMPLE).unwrap();
        assert_eq!(fc.len(), 2);
        assert_eq!(fc.features[0].geometry_type(), Some("LineString"));
        assert_eq!(fc.annotations().collect::<Vec<_>>(), vec!["**Camp** here"]);
    }

    #[test]
    fn test_label_counts_as_annotation() {
        let fc = FeatureCollection::parse(
            r#"{"type":"Feature","geometry":{"type":"Point","coordinates":[0,0]},"properties":{"label":"A"}}"#,
        )
        .unwrap();
        assert_eq!(fc.len(), 1);
        assert_eq!(fc.features[0].annotation(), Some("A"));
    }

    #[test]
    fn test_rejects_non_geojson() {
        assert!(matches!(
            FeatureCollection::parse("[deleted]"),
            Err(ContentError::Json(_))
        ));
        assert!(matches!(
            FeatureCollection::parse(r#"{"hello":"world"}"#),
            Err(ContentError::NotACollection(_))
        ));
        assert!(matches!(
            FeatureCollection::parse(r#"{"type":"FeatureCollection","features":[{"type":"Point"}]}"#),
            Err(ContentError::InvalidFeature { index: 0 })
        ));
    }

    #[test]
    fn test_foreign_members_survive_round_trip() {
        let fc = FeatureCollection::parse(
            r#"{"type":"FeatureCollection","features":[],"crs":{"type":"name"}}"#,
        )
        .unwrap();
        let value = fc.to_value();
        assert_eq!(value["crs"]["type"], "name");
        assert_eq!(value["type"], "FeatureCollection");
    }

    #[test]
    fn test_validate_keeps_text_as_received() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","id":null,"bbox":[0,0,1,1],"geometry":{"type":"Point","coordinates":[1,1]}}
        ]}"#;
        let value = FeatureCollection::validate(text).unwrap();
        assert_eq!(value, serde_json::from_str::<Value>(text).unwrap());
        assert!(value["features"][0].get("properties").is_none());

        assert!(FeatureCollection::validate(r#"{"type":"Topology"}"#).is_err());
    }

    #[test]
    fn test_feature_foreign_members_survive_round_trip() {
        let fc = FeatureCollection::parse(
            r#"{"type":"Feature","bbox":[0,0,1,1],"geometry":{"type":"Point","coordinates":[1,1]},"properties":{}}"#,
        )
        .unwrap();
        let value = fc.to_value();
        assert_eq!(value["features"][0]["bbox"], serde_json::json!([0, 0, 1, 1]));
    }

    #[test]
    fn test_extend_appends() {
        let mut fc = FeatureCollection::parse(SAMPLE).unwrap();
        let extra = FeatureCollection::parse(SAMPLE).unwrap();
        fc.extend(extra);
        assert_eq!(fc.len(), 4);
    }
}
