// Plot document codec
//
// A plot is stored as a plain GeoJSON FeatureCollection. Viewport and time are
// carried inside it as reserved features: null geometry, and a
// `tidemark:state` property naming what they hold. Reserved features are
// appended after the visible ones on save and stripped on load wherever they
// sit. Selection is never written.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tidemark_core::{EditorState, Feature, FeatureCollection, TimeState, ViewportState};

/// Property naming the kind of a reserved state feature.
pub const STATE_MARKER: &str = "tidemark:state";

const VIEWPORT_KIND: &str = "viewport";
const TIME_KIND: &str = "time";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid plot JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a FeatureCollection, found type '{0}'")]
    NotFeatureCollection(String),
}

/// What a saved document yields on load.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedDocument {
    /// Visible features only.
    pub feature_collection: FeatureCollection,
    pub viewport: Option<ViewportState>,
    pub time: Option<TimeState>,
}

impl DecodedDocument {
    /// Initial editor state for a freshly opened document.
    pub fn into_state(self, filename: impl Into<String>) -> EditorState {
        let mut state = EditorState::for_file(filename);
        state.feature_collection = self.feature_collection;
        state.viewport = self.viewport;
        state.time = self.time;
        state
    }
}

/// Serialized form of `state`: visible features followed by one reserved
/// feature per persisted slice that is set.
pub fn encode(state: &EditorState) -> FeatureCollection {
    let mut out = state.feature_collection.clone();
    // A collection pushed in by a script may still carry reserved entries.
    out.features.retain(|f| reserved_kind(f).is_none());

    if let Some(viewport) = &state.viewport {
        let mut props = Map::new();
        props.insert("bounds".to_string(), Value::from(viewport.bounds.to_vec()));
        out.features.push(reserved_feature(VIEWPORT_KIND, props));
    }
    if let Some(time) = &state.time {
        let props = match serde_json::to_value(time) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        out.features.push(reserved_feature(TIME_KIND, props));
    }
    out
}

/// Split a loaded collection into visible features and persisted state.
/// Malformed reserved entries are dropped with a warning.
pub fn decode(mut collection: FeatureCollection) -> DecodedDocument {
    let mut viewport = None;
    let mut time = None;

    let features = std::mem::take(&mut collection.features);
    for feature in features {
        let Some(kind) = reserved_kind(&feature) else {
            collection.features.push(feature);
            continue;
        };
        let props = feature.properties.unwrap_or_default();
        match kind.as_str() {
            VIEWPORT_KIND => match decode_viewport(&props) {
                Some(vp) => viewport = Some(vp),
                None => log::warn!("Ignoring malformed viewport entry in plot"),
            },
            TIME_KIND => match decode_time(props) {
                Some(t) => time = Some(t),
                None => log::warn!("Ignoring malformed time entry in plot"),
            },
            other => log::warn!("Ignoring unknown reserved entry '{}' in plot", other),
        }
    }

    DecodedDocument {
        feature_collection: collection,
        viewport,
        time,
    }
}

pub fn from_json_str(json: &str) -> Result<DecodedDocument, CodecError> {
    let collection: FeatureCollection = serde_json::from_str(json)?;
    if collection.kind != "FeatureCollection" {
        return Err(CodecError::NotFeatureCollection(collection.kind));
    }
    Ok(decode(collection))
}

pub fn to_json_string(state: &EditorState) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(&encode(state))?)
}

pub fn load_plot(path: &Path) -> Result<DecodedDocument, CodecError> {
    let json = fs::read_to_string(path).map_err(|source| CodecError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_json_str(&json)
}

pub fn save_plot(path: &Path, state: &EditorState) -> Result<(), CodecError> {
    let json = to_json_string(state)?;
    fs::write(path, json).map_err(|source| CodecError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("Saved plot {}", path.display());
    Ok(())
}

fn reserved_kind(feature: &Feature) -> Option<String> {
    feature
        .property(STATE_MARKER)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn reserved_feature(kind: &str, mut props: Map<String, Value>) -> Feature {
    props.insert(STATE_MARKER.to_string(), Value::from(kind));
    Feature {
        properties: Some(props),
        ..Feature::default()
    }
}

fn decode_viewport(props: &Map<String, Value>) -> Option<ViewportState> {
    let bounds: [f64; 4] = serde_json::from_value(props.get("bounds")?.clone()).ok()?;
    let viewport = ViewportState { bounds };
    viewport.is_valid().then_some(viewport)
}

fn decode_time(mut props: Map<String, Value>) -> Option<TimeState> {
    props.remove(STATE_MARKER);
    let time: TimeState = serde_json::from_value(Value::Object(props)).ok()?;
    time.is_ordered().then_some(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::tempdir;
    use tidemark_core::SelectionState;

    fn sample_state() -> EditorState {
        let mut state = EditorState::for_file("exercise.plot");
        let mut track = Feature::with_id("track-1");
        track.geometry = json!({"type": "LineString", "coordinates": [[-4.5, 50.25], [-4.0, 50.5]]});
        track.set_property("name", json!("HMS Example"));
        state.feature_collection = FeatureCollection::new(vec![track, Feature::with_id(7u64)]);
        state.viewport = Some(ViewportState::new(-5.0, 49.5, -3.0, 51.0));
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        state.time = Some(TimeState::new(
            t0 + chrono::Duration::minutes(30),
            t0,
            t0 + chrono::Duration::hours(2),
        ));
        state.selection = SelectionState::new(["track-1"]);
        state
    }

    #[test]
    fn test_encode_appends_reserved_entries_after_visible() {
        let encoded = encode(&sample_state());
        assert_eq!(encoded.len(), 4);
        assert_eq!(encoded.features[0].id_key().as_deref(), Some("track-1"));
        assert_eq!(encoded.features[2].property(STATE_MARKER), Some(&json!("viewport")));
        assert_eq!(encoded.features[3].property(STATE_MARKER), Some(&json!("time")));
        assert!(encoded.features[2].geometry.is_null());
    }

    #[test]
    fn test_roundtrip_preserves_features_and_state() {
        let state = sample_state();
        let decoded = decode(encode(&state));
        assert_eq!(decoded.feature_collection, state.feature_collection);
        assert_eq!(decoded.viewport, state.viewport);
        assert_eq!(decoded.time, state.time);
    }

    #[test]
    fn test_selection_is_not_persisted() {
        let json = to_json_string(&sample_state()).unwrap();
        assert!(!json.contains("selected_ids"));
        let restored = from_json_str(&json).unwrap().into_state("exercise.plot");
        assert!(restored.selection.is_empty());
    }

    #[test]
    fn test_plain_geojson_has_no_persisted_state() {
        let doc = from_json_str(
            r#"{"type":"FeatureCollection","features":[{"type":"Feature","id":"a","geometry":null,"properties":{}}]}"#,
        )
        .unwrap();
        assert_eq!(doc.feature_collection.len(), 1);
        assert_eq!(doc.viewport, None);
        assert_eq!(doc.time, None);
    }

    #[test]
    fn test_reserved_entries_stripped_wherever_they_sit() {
        let doc = from_json_str(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","geometry":null,"properties":{"tidemark:state":"viewport","bounds":[0,0,1,1]}},
                {"type":"Feature","id":"a","geometry":null,"properties":{}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(doc.feature_collection.len(), 1);
        assert_eq!(doc.viewport, Some(ViewportState::new(0.0, 0.0, 1.0, 1.0)));
    }

    #[test]
    fn test_malformed_reserved_entries_ignored() {
        let doc = from_json_str(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","geometry":null,"properties":{"tidemark:state":"viewport","bounds":"nope"}},
                {"type":"Feature","geometry":null,"properties":{"tidemark:state":"time","start":"2024-03-02T00:00:00Z","end":"2024-03-01T00:00:00Z"}},
                {"type":"Feature","geometry":null,"properties":{"tidemark:state":"legend"}}
            ]}"#,
        )
        .unwrap();
        assert!(doc.feature_collection.is_empty());
        assert_eq!(doc.viewport, None);
        assert_eq!(doc.time, None);
    }

    #[test]
    fn test_foreign_members_survive() {
        let json = r#"{"type":"FeatureCollection","name":"exercise","features":[{"type":"Feature","id":"a","geometry":null,"properties":{},"style":{"stroke":"red"}}]}"#;
        let doc = from_json_str(json).unwrap();
        let state = doc.into_state("x.plot");
        let out: Value = serde_json::from_str(&to_json_string(&state).unwrap()).unwrap();
        assert_eq!(out["name"], json!("exercise"));
        assert_eq!(out["features"][0]["style"], json!({"stroke": "red"}));
    }

    #[test]
    fn test_reject_non_collection() {
        let err = from_json_str(r#"{"type":"Feature","features":[]}"#).unwrap_err();
        assert!(matches!(err, CodecError::NotFeatureCollection(t) if t == "Feature"));
    }

    #[test]
    fn test_save_and_load_plot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exercise.plot");
        let state = sample_state();

        save_plot(&path, &state).unwrap();
        let loaded = load_plot(&path).unwrap();

        assert_eq!(loaded.feature_collection, state.feature_collection);
        assert_eq!(loaded.viewport, state.viewport);
        assert_eq!(loaded.time, state.time);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_plot(&dir.path().join("missing.plot")).unwrap_err();
        assert!(matches!(err, CodecError::Read { .. }));
    }
}
