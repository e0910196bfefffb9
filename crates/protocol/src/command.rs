// Typed command union and result payloads.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tidemark_core::{Feature, FeatureCollection, FeatureId, TimeState, ViewportState};

use crate::ErrorCode;

/// Why a request could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("invalid params for '{command}': {message}")]
    InvalidParams { command: String, message: String },
}

impl CommandParseError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownCommand(_) => ErrorCode::UnknownCommand,
            Self::InvalidParams { .. } => ErrorCode::InvalidRequest,
        }
    }
}

/// Every command the bridge understands, with its validated params.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Notify(NotifyParams),
    ListOpenPlots,
    GetActiveEditor,
    GetFeatureCollection,
    SetFeatureCollection(SetFeatureCollectionParams),
    GetSelectedFeatures,
    SetSelectedFeatures(FeatureIdsParams),
    UpdateFeatures(FeaturesParams),
    AddFeatures(FeaturesParams),
    DeleteFeatures(FeatureIdsParams),
    GetTime,
    SetTime(SetTimeParams),
    GetViewport,
    SetViewport(SetViewportParams),
    ZoomToSelection,
    Undo,
    Redo,
    SavePlot(SavePlotParams),
    ApplyToolAction(ToolAction),
}

impl Command {
    pub const NAMES: [&'static str; 19] = [
        "notify",
        "list_open_plots",
        "get_active_editor",
        "get_feature_collection",
        "set_feature_collection",
        "get_selected_features",
        "set_selected_features",
        "update_features",
        "add_features",
        "delete_features",
        "get_time",
        "set_time",
        "get_viewport",
        "set_viewport",
        "zoom_to_selection",
        "undo",
        "redo",
        "save_plot",
        "apply_tool_action",
    ];

    /// Parse `params` for the command called `name`. A `filename` key in
    /// `params` is a routing hint and is ignored here.
    pub fn from_request(name: &str, params: Value) -> Result<Command, CommandParseError> {
        let params = normalize_params(name, params)?;
        let command = match name {
            "notify" => Command::Notify(parse(name, params)?),
            "list_open_plots" => no_params(name, params, Command::ListOpenPlots)?,
            "get_active_editor" => no_params(name, params, Command::GetActiveEditor)?,
            "get_feature_collection" => no_params(name, params, Command::GetFeatureCollection)?,
            "set_feature_collection" => Command::SetFeatureCollection(parse(name, params)?),
            "get_selected_features" => no_params(name, params, Command::GetSelectedFeatures)?,
            "set_selected_features" => Command::SetSelectedFeatures(parse(name, params)?),
            "update_features" => Command::UpdateFeatures(parse(name, params)?),
            "add_features" => Command::AddFeatures(parse(name, params)?),
            "delete_features" => Command::DeleteFeatures(parse(name, params)?),
            "get_time" => no_params(name, params, Command::GetTime)?,
            "set_time" => Command::SetTime(parse(name, params)?),
            "get_viewport" => no_params(name, params, Command::GetViewport)?,
            "set_viewport" => Command::SetViewport(parse(name, params)?),
            "zoom_to_selection" => no_params(name, params, Command::ZoomToSelection)?,
            "undo" => no_params(name, params, Command::Undo)?,
            "redo" => no_params(name, params, Command::Redo)?,
            "save_plot" => Command::SavePlot(parse(name, params)?),
            "apply_tool_action" => Command::ApplyToolAction(parse(name, params)?),
            other => return Err(CommandParseError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Notify(_) => "notify",
            Command::ListOpenPlots => "list_open_plots",
            Command::GetActiveEditor => "get_active_editor",
            Command::GetFeatureCollection => "get_feature_collection",
            Command::SetFeatureCollection(_) => "set_feature_collection",
            Command::GetSelectedFeatures => "get_selected_features",
            Command::SetSelectedFeatures(_) => "set_selected_features",
            Command::UpdateFeatures(_) => "update_features",
            Command::AddFeatures(_) => "add_features",
            Command::DeleteFeatures(_) => "delete_features",
            Command::GetTime => "get_time",
            Command::SetTime(_) => "set_time",
            Command::GetViewport => "get_viewport",
            Command::SetViewport(_) => "set_viewport",
            Command::ZoomToSelection => "zoom_to_selection",
            Command::Undo => "undo",
            Command::Redo => "redo",
            Command::SavePlot(_) => "save_plot",
            Command::ApplyToolAction(_) => "apply_tool_action",
        }
    }

    /// Whether the command acts on one plot and so needs target resolution.
    pub fn needs_target(&self) -> bool {
        !matches!(
            self,
            Command::Notify(_) | Command::ListOpenPlots | Command::GetActiveEditor
        )
    }
}

fn normalize_params(name: &str, params: Value) -> Result<Map<String, Value>, CommandParseError> {
    match params {
        Value::Null => Ok(Map::new()),
        Value::Object(mut map) => {
            map.remove("filename");
            Ok(map)
        }
        _ => Err(invalid(name, "params must be an object")),
    }
}

fn parse<T: DeserializeOwned>(name: &str, params: Map<String, Value>) -> Result<T, CommandParseError> {
    serde_json::from_value(Value::Object(params)).map_err(|e| invalid(name, e.to_string()))
}

fn no_params(name: &str, params: Map<String, Value>, command: Command) -> Result<Command, CommandParseError> {
    match params.keys().next() {
        None => Ok(command),
        Some(key) => Err(invalid(name, format!("unexpected param '{}'", key))),
    }
}

fn invalid(name: &str, message: impl Into<String>) -> CommandParseError {
    CommandParseError::InvalidParams {
        command: name.to_string(),
        message: message.into(),
    }
}

// =============================================================================
// Params
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    #[default]
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyParams {
    pub message: String,
    #[serde(default)]
    pub level: NotifyLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetFeatureCollectionParams {
    pub feature_collection: FeatureCollection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureIdsParams {
    pub ids: Vec<FeatureId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeaturesParams {
    pub features: Vec<Feature>,
}

/// Time control position. Omitting all three clears the time state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetTimeParams {
    #[serde(default)]
    pub current: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl SetTimeParams {
    pub fn into_time(self) -> Option<TimeState> {
        if self.current.is_none() && self.start.is_none() && self.end.is_none() {
            return None;
        }
        Some(TimeState {
            current: self.current,
            start: self.start,
            end: self.end,
        })
    }
}

/// `bounds: null` clears the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetViewportParams {
    pub bounds: Option<[f64; 4]>,
}

impl SetViewportParams {
    pub fn into_viewport(self) -> Option<ViewportState> {
        self.bounds.map(|bounds| ViewportState { bounds })
    }
}

/// Save to `path`, or to the plot's own file when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SavePlotParams {
    #[serde(default)]
    pub path: Option<String>,
}

/// Structured edit produced by an external tool. Each action is applied as
/// one ordinary state update, so it is undoable like any other write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", deny_unknown_fields)]
pub enum ToolAction {
    ReplaceFeatureCollection { feature_collection: FeatureCollection },
    HighlightFeatures { ids: Vec<FeatureId> },
    AddFeatures { features: Vec<Feature> },
    SetViewport { bounds: [f64; 4] },
}

impl ToolAction {
    pub fn name(&self) -> &'static str {
        match self {
            ToolAction::ReplaceFeatureCollection { .. } => "replace_feature_collection",
            ToolAction::HighlightFeatures { .. } => "highlight_features",
            ToolAction::AddFeatures { .. } => "add_features",
            ToolAction::SetViewport { .. } => "set_viewport",
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// One entry of `list_open_plots`, and the result of `get_active_editor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotInfo {
    pub filename: String,
    pub editor_id: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPlotsResult {
    pub plots: Vec<PlotInfo>,
}

/// Selection, with the selected features that currently exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedFeaturesResult {
    pub ids: Vec<String>,
    pub features: Vec<Feature>,
}

/// Outcome of a feature write: the ids it touched, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureWriteResult {
    pub ids: Vec<String>,
    pub feature_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResult {
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResult {
    pub delivered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_name_parses_or_wants_params() {
        for name in Command::NAMES {
            match Command::from_request(name, Value::Null) {
                Ok(cmd) => assert_eq!(cmd.name(), name),
                Err(CommandParseError::InvalidParams { command, .. }) => assert_eq!(command, name),
                Err(e) => panic!("{}: {}", name, e),
            }
        }
    }

    #[test]
    fn test_unknown_command() {
        let err = Command::from_request("explode", Value::Null).unwrap_err();
        assert_eq!(err, CommandParseError::UnknownCommand("explode".to_string()));
        assert_eq!(err.code(), ErrorCode::UnknownCommand);
    }

    #[test]
    fn test_set_selected_features_accepts_mixed_ids() {
        let cmd = Command::from_request("set_selected_features", json!({"ids": ["f1", 2]})).unwrap();
        let Command::SetSelectedFeatures(params) = cmd else {
            panic!("wrong variant");
        };
        let keys: Vec<String> = params.ids.iter().map(FeatureId::key).collect();
        assert_eq!(keys, vec!["f1", "2"]);
    }

    #[test]
    fn test_filename_in_params_is_not_a_param() {
        let cmd = Command::from_request("get_time", json!({"filename": "a.plot"})).unwrap();
        assert_eq!(cmd, Command::GetTime);
    }

    #[test]
    fn test_unexpected_params_rejected() {
        let err = Command::from_request("get_time", json!({"when": "now"})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);

        let err = Command::from_request("set_selected_features", json!({"ids": ["a"], "extra": 1})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);

        let err = Command::from_request("set_viewport", json!([1, 2, 3, 4])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_set_time_empty_clears() {
        let Command::SetTime(params) = Command::from_request("set_time", json!({})).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(params.into_time(), None);

        let Command::SetTime(params) =
            Command::from_request("set_time", json!({"current": "2024-03-01T12:00:00Z"})).unwrap()
        else {
            panic!("wrong variant");
        };
        assert!(params.into_time().unwrap().current.is_some());
    }

    #[test]
    fn test_set_viewport_bounds() {
        let Command::SetViewport(params) =
            Command::from_request("set_viewport", json!({"bounds": [-5.0, 49.0, -3.0, 51.0]})).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(params.into_viewport(), Some(ViewportState::new(-5.0, 49.0, -3.0, 51.0)));
    }

    #[test]
    fn test_tool_action_tagged_by_action() {
        let cmd = Command::from_request(
            "apply_tool_action",
            json!({"action": "highlight_features", "ids": ["t1"]}),
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::ApplyToolAction(ToolAction::HighlightFeatures {
                ids: vec![FeatureId::from("t1")]
            })
        );

        let err = Command::from_request("apply_tool_action", json!({"action": "launch"})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_needs_target() {
        assert!(!Command::ListOpenPlots.needs_target());
        assert!(!Command::GetActiveEditor.needs_target());
        assert!(Command::GetViewport.needs_target());
        assert!(Command::Undo.needs_target());
    }
}
