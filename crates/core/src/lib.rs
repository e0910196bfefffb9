//! Core data model shared by the registry, codec, protocol and host.
//!
//! Nothing in here knows about threads, sockets or history. Types are plain
//! values: cheap to clone, comparable, and serializable in the same shape the
//! wire protocol and plot files use.

pub mod feature;
pub mod ids;
pub mod state;

pub use feature::{Feature, FeatureCollection};
pub use ids::{EditorId, FeatureId};
pub use state::{
    EditorMetadata, EditorState, SelectionState, SliceKind, SliceValue, TimeState,
    ViewportState,
};
