//! GeoJSON-shaped feature collection.
//!
//! The core treats feature payloads as opaque beyond structural identity:
//! geometry and properties are kept as JSON values and any foreign members
//! are carried through untouched so a load/save cycle is lossless.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::FeatureId;

fn feature_collection_tag() -> String {
    "FeatureCollection".to_string()
}

fn feature_tag() -> String {
    "Feature".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "feature_collection_tag")]
    pub kind: String,
    #[serde(default)]
    pub features: Vec<Feature>,
    /// Members other than `type` and `features` (e.g. `bbox`, `name`).
    #[serde(flatten)]
    pub foreign: Map<String, Value>,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self {
            kind: feature_collection_tag(),
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

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Find a feature by id key.
    pub fn find(&self, key: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.id_key().as_deref() == Some(key))
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.features.iter().position(|f| f.id_key().as_deref() == Some(key))
    }

    /// Union of the bounds of every feature whose id is in `keys`.
    /// Returns `None` when none of them carries coordinates.
    pub fn bounds_of<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> Option<[f64; 4]> {
        let mut acc: Option<[f64; 4]> = None;
        for key in keys {
            if let Some(b) = self.find(key).and_then(Feature::bounds) {
                acc = Some(match acc {
                    None => b,
                    Some(a) => [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])],
                });
            }
        }
        acc
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_tag")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FeatureId>,
    #[serde(default)]
    pub geometry: Value,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub foreign: Map<String, Value>,
}

impl Default for Feature {
    fn default() -> Self {
        Self {
            kind: feature_tag(),
            id: None,
            geometry: Value::Null,
            properties: Some(Map::new()),
            foreign: Map::new(),
        }
    }
}

impl Feature {
    pub fn with_id(id: impl Into<FeatureId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn id_key(&self) -> Option<String> {
        self.id.as_ref().map(FeatureId::key)
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.as_ref().and_then(|p| p.get(name))
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: Value) {
        self.properties
            .get_or_insert_with(Map::new)
            .insert(name.into(), value);
    }

    /// Bounding box `[west, south, east, north]` of this feature's geometry.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        let mut acc: Option<[f64; 4]> = None;
        collect_geometry_bounds(&self.geometry, &mut acc);
        acc
    }
}

fn collect_geometry_bounds(geometry: &Value, acc: &mut Option<[f64; 4]>) {
    let Value::Object(obj) = geometry else {
        return;
    };
    if let Some(coords) = obj.get("coordinates") {
        collect_positions(coords, acc);
    }
    if let Some(Value::Array(geometries)) = obj.get("geometries") {
        for g in geometries {
            collect_geometry_bounds(g, acc);
        }
    }
}

fn collect_positions(value: &Value, acc: &mut Option<[f64; 4]>) {
    let Value::Array(items) = value else {
        return;
    };
    // A position is an array that starts with two numbers.
    if let (Some(x), Some(y)) = (
        items.first().and_then(Value::as_f64),
        items.get(1).and_then(Value::as_f64),
    ) {
        *acc = Some(match *acc {
            None => [x, y, x, y],
            Some(a) => [a[0].min(x), a[1].min(y), a[2].max(x), a[3].max(y)],
        });
        return;
    }
    for item in items {
        collect_positions(item, acc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn track() -> Feature {
        serde_json::from_value(json!({
            "type": "Feature",
            "id": "track-1",
            "geometry": {
                "type": "LineString",
                "coordinates": [[-4.5, 50.1], [-3.9, 50.6], [-4.2, 49.8]]
            },
            "properties": { "name": "HMS Example", "dataType": "track" }
        }))
        .unwrap()
    }

    #[test]
    fn test_feature_bounds_from_linestring() {
        assert_eq!(track().bounds(), Some([-4.5, 49.8, -3.9, 50.6]));
    }

    #[test]
    fn test_feature_without_geometry_has_no_bounds() {
        assert_eq!(Feature::with_id("x").bounds(), None);
    }

    #[test]
    fn test_geometry_collection_bounds() {
        let f: Feature = serde_json::from_value(json!({
            "type": "Feature",
            "geometry": {
                "type": "GeometryCollection",
                "geometries": [
                    { "type": "Point", "coordinates": [1.0, 2.0] },
                    { "type": "Point", "coordinates": [3.0, -1.0] }
                ]
            },
            "properties": null
        }))
        .unwrap();
        assert_eq!(f.bounds(), Some([1.0, -1.0, 3.0, 2.0]));
    }

    #[test]
    fn test_foreign_members_survive_round_trip() {
        let raw = json!({
            "type": "FeatureCollection",
            "name": "exercise-alpha",
            "features": [{
                "type": "Feature",
                "id": 3,
                "geometry": null,
                "properties": {},
                "style": { "color": "red" }
            }]
        });
        let fc: FeatureCollection = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(fc.foreign.get("name"), Some(&json!("exercise-alpha")));
        assert_eq!(fc.features[0].id_key().as_deref(), Some("3"));
        assert_eq!(serde_json::to_value(&fc).unwrap(), raw);
    }

    #[test]
    fn test_bounds_of_selection() {
        let mut point = Feature::with_id("p");
        point.geometry = json!({ "type": "Point", "coordinates": [-5.0, 51.0] });
        let fc = FeatureCollection::new(vec![track(), point]);
        let keys = vec!["track-1".to_string(), "p".to_string(), "missing".to_string()];
        assert_eq!(fc.bounds_of(&keys), Some([-5.0, 49.8, -3.9, 51.0]));
    }
}
