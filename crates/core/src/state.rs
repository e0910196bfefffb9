//! Per-editor state and its independently mutable slices.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feature::FeatureCollection;

/// Selected feature ids. Ephemeral: never written into a saved document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    #[serde(default)]
    pub selected_ids: BTreeSet<String>,
}

impl SelectionState {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selected_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selected_ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.selected_ids.contains(id)
    }
}

/// Visible map extent as `[west, south, east, north]` in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub bounds: [f64; 4],
}

impl ViewportState {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            bounds: [west, south, east, north],
        }
    }

    /// All four edges finite and south not above north. West may exceed east
    /// for extents that cross the antimeridian.
    pub fn is_valid(&self) -> bool {
        let [_, south, _, north] = self.bounds;
        self.bounds.iter().all(|v| v.is_finite()) && south <= north
    }
}

/// Time control position. Any of the three instants may be unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl TimeState {
    pub fn new(current: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            current: Some(current),
            start: Some(start),
            end: Some(end),
        }
    }

    /// `start <= current <= end` over whichever pairs are present.
    pub fn is_ordered(&self) -> bool {
        let le = |a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>| match (a, b) {
            (Some(a), Some(b)) => a <= b,
            _ => true,
        };
        le(self.start, self.current) && le(self.current, self.end) && le(self.start, self.end)
    }
}

/// Bookkeeping about the document behind an editor.
///
/// Not undoable. `last_active_at` is stamped when the editor becomes active,
/// without a `StateChanged` event, since focus moves are not edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorMetadata {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Name of one facet of an [`EditorState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceKind {
    FeatureCollection,
    Selection,
    Viewport,
    Time,
    Metadata,
}

impl SliceKind {
    pub const ALL: [SliceKind; 5] = [
        SliceKind::FeatureCollection,
        SliceKind::Selection,
        SliceKind::Viewport,
        SliceKind::Time,
        SliceKind::Metadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SliceKind::FeatureCollection => "feature_collection",
            SliceKind::Selection => "selection",
            SliceKind::Viewport => "viewport",
            SliceKind::Time => "time",
            SliceKind::Metadata => "metadata",
        }
    }

    /// Slices that undo/redo rewinds. Metadata is bookkeeping and is left alone.
    pub fn is_undoable(&self) -> bool {
        !matches!(self, SliceKind::Metadata)
    }
}

impl fmt::Display for SliceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value of exactly one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "slice", content = "value", rename_all = "snake_case")]
pub enum SliceValue {
    FeatureCollection(FeatureCollection),
    Selection(SelectionState),
    Viewport(Option<ViewportState>),
    Time(Option<TimeState>),
    Metadata(EditorMetadata),
}

impl SliceValue {
    pub fn kind(&self) -> SliceKind {
        match self {
            SliceValue::FeatureCollection(_) => SliceKind::FeatureCollection,
            SliceValue::Selection(_) => SliceKind::Selection,
            SliceValue::Viewport(_) => SliceKind::Viewport,
            SliceValue::Time(_) => SliceKind::Time,
            SliceValue::Metadata(_) => SliceKind::Metadata,
        }
    }
}

/// Everything the workbench knows about one open document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorState {
    pub feature_collection: FeatureCollection,
    pub selection: SelectionState,
    pub viewport: Option<ViewportState>,
    pub time: Option<TimeState>,
    pub metadata: EditorMetadata,
}

impl EditorState {
    pub fn for_file(filename: impl Into<String>) -> Self {
        Self {
            metadata: EditorMetadata {
                filename: filename.into(),
                last_active_at: None,
            },
            ..Self::default()
        }
    }

    pub fn slice(&self, kind: SliceKind) -> SliceValue {
        match kind {
            SliceKind::FeatureCollection => {
                SliceValue::FeatureCollection(self.feature_collection.clone())
            }
            SliceKind::Selection => SliceValue::Selection(self.selection.clone()),
            SliceKind::Viewport => SliceValue::Viewport(self.viewport),
            SliceKind::Time => SliceValue::Time(self.time),
            SliceKind::Metadata => SliceValue::Metadata(self.metadata.clone()),
        }
    }

    /// Copy of this state with one slice replaced.
    pub fn with_slice(&self, value: SliceValue) -> EditorState {
        let mut next = self.clone();
        match value {
            SliceValue::FeatureCollection(fc) => next.feature_collection = fc,
            SliceValue::Selection(sel) => next.selection = sel,
            SliceValue::Viewport(vp) => next.viewport = vp,
            SliceValue::Time(t) => next.time = t,
            SliceValue::Metadata(m) => next.metadata = m,
        }
        next
    }

    /// Copy of this state with every undoable slice taken from `snapshot`.
    /// Metadata stays as it is now.
    pub fn restored_from(&self, snapshot: &EditorState) -> EditorState {
        EditorState {
            feature_collection: snapshot.feature_collection.clone(),
            selection: snapshot.selection.clone(),
            viewport: snapshot.viewport,
            time: snapshot.time,
            metadata: self.metadata.clone(),
        }
    }

    /// Slices whose values differ between `self` and `other`.
    pub fn changed_slices(&self, other: &EditorState) -> Vec<SliceKind> {
        SliceKind::ALL
            .into_iter()
            .filter(|k| self.slice(*k) != other.slice(*k))
            .collect()
    }
}
