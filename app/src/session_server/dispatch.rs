//! Command dispatch on the host thread.
//!
//! Resolves which plot a request addresses, then runs the command against the
//! workbench. Every write is a single registry update, so each one is exactly
//! one undoable history step.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tidemark_core::{
    EditorId, Feature, FeatureCollection, FeatureId, SelectionState, SliceValue, ViewportState,
};
use tidemark_engine::{HistoryOutcome, NoticeLevel};
use tidemark_protocol::{
    Command, FeatureWriteResult, HistoryResult, NotifyLevel, NotifyResult, OpenPlotsResult, PlotInfo,
    Request, Response, SaveResult, SelectedFeaturesResult, ToolAction,
};

use super::bridge::SessionRequest;
use super::error::CommandError;
use super::target::ConnectionId;
use crate::Workbench;

/// Handle one bridge request and send its reply.
pub fn handle_request(workbench: &mut Workbench, request: SessionRequest) {
    match request {
        SessionRequest::Execute {
            conn_id,
            request,
            reply,
        } => {
            let response = execute(workbench, conn_id, &request);
            if reply.send(response).is_err() {
                // Client gave up (timeout or disconnect); the command still ran.
                log::debug!("Reply to connection {} dropped", conn_id);
            }
        }
    }
}

/// Run one request for connection `conn_id`. Never panics on bad input.
pub fn execute(workbench: &mut Workbench, conn_id: ConnectionId, request: &Request) -> Response {
    let id = request.id.clone();
    match try_execute(workbench, conn_id, request) {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            log::debug!("Command '{}' failed: {}", request.command, e);
            Response::failure(id, e.to_error_body())
        }
    }
}

fn try_execute(workbench: &mut Workbench, conn_id: ConnectionId, request: &Request) -> Result<Value, CommandError> {
    let explicit = request.target_filename()?;
    let command = request.parse_command()?;

    if !command.needs_target() {
        // A named plot still becomes the connection's target
        let named = match explicit.as_deref() {
            Some(name) => Some(resolve_target(workbench, conn_id, Some(name))?),
            None => None,
        };
        return run_untargeted(workbench, named.as_ref(), command);
    }
    let target = resolve_target(workbench, conn_id, explicit.as_deref())?;
    run_targeted(workbench, &target, command)
}

/// Pick the plot a command addresses, updating the connection's cache:
///
/// 1. An explicit filename must name exactly one open plot (full path or
///    basename); it becomes the cache.
/// 2. Otherwise a cached editor that is still open is used.
/// 3. A stale cache entry is cleared.
/// 4. Otherwise: no plots fails, one plot is used and cached, several fail
///    with the list of open filenames.
pub fn resolve_target(
    workbench: &Workbench,
    conn_id: ConnectionId,
    explicit: Option<&str>,
) -> Result<EditorId, CommandError> {
    let registry = workbench.registry();
    let targets = workbench.session_targets();

    if let Some(name) = explicit {
        let editor_id = match registry.editors_matching(name).as_slice() {
            [] => return Err(CommandError::EditorNotFound(name.to_string())),
            [only] => only.editor_id.clone(),
            several => {
                return Err(CommandError::MultiplePlots {
                    filenames: several.iter().map(|e| e.filename.clone()).collect(),
                })
            }
        };
        targets.set(conn_id, editor_id.clone());
        return Ok(editor_id);
    }

    if let Some(cached) = targets.get(conn_id) {
        if registry.contains(&cached) {
            return Ok(cached);
        }
        log::debug!("Connection {} cache {} is stale", conn_id, cached);
        targets.clear(conn_id);
    }

    let open = registry.open_editors();
    match open.as_slice() {
        [] => Err(CommandError::NoEditorsOpen),
        [only] => {
            targets.set(conn_id, only.editor_id.clone());
            Ok(only.editor_id.clone())
        }
        many => Err(CommandError::MultiplePlots {
            filenames: many.iter().map(|e| e.filename.clone()).collect(),
        }),
    }
}

fn run_untargeted(
    workbench: &mut Workbench,
    named: Option<&EditorId>,
    command: Command,
) -> Result<Value, CommandError> {
    match command {
        Command::Notify(params) => {
            let level = match params.level {
                NotifyLevel::Info => NoticeLevel::Info,
                NotifyLevel::Warning => NoticeLevel::Warning,
                NotifyLevel::Error => NoticeLevel::Error,
            };
            log::info!("Script notice: {}", params.message);
            workbench.registry_mut().notify(named, level, params.message);
            to_value(NotifyResult { delivered: true })
        }
        Command::ListOpenPlots => {
            let registry = workbench.registry();
            let active = registry.active_editor();
            let plots = registry
                .open_editors()
                .into_iter()
                .map(|e| PlotInfo {
                    active: active == Some(&e.editor_id),
                    editor_id: e.editor_id.to_string(),
                    filename: e.filename,
                })
                .collect();
            to_value(OpenPlotsResult { plots })
        }
        Command::GetActiveEditor => {
            let registry = workbench.registry();
            let Some(active) = registry.active_editor() else {
                return Ok(Value::Null);
            };
            let state = registry.state(active)?;
            to_value(PlotInfo {
                filename: state.metadata.filename.clone(),
                editor_id: active.to_string(),
                active: true,
            })
        }
        other => Err(CommandError::Internal(format!("'{}' needs a target", other.name()))),
    }
}

fn run_targeted(workbench: &mut Workbench, target: &EditorId, command: Command) -> Result<Value, CommandError> {
    match command {
        Command::GetFeatureCollection => {
            let state = workbench.registry().state(target)?;
            to_value(&state.feature_collection)
        }
        Command::SetFeatureCollection(params) => {
            replace_feature_collection(workbench, target, params.feature_collection, "Set feature collection")
        }
        Command::GetSelectedFeatures => selected_features(workbench, target),
        Command::SetSelectedFeatures(params) => {
            set_selection(workbench, target, &params.ids, "Set selection")?;
            selected_features(workbench, target)
        }
        Command::UpdateFeatures(params) => update_features(workbench, target, params.features),
        Command::AddFeatures(params) => add_features(workbench, target, params.features, "Add features"),
        Command::DeleteFeatures(params) => delete_features(workbench, target, &params.ids),
        Command::GetTime => {
            let state = workbench.registry().state(target)?;
            to_value(state.time)
        }
        Command::SetTime(params) => {
            let time = params.into_time();
            workbench
                .registry_mut()
                .update_described(target, SliceValue::Time(time), "Set time")?;
            to_value(time)
        }
        Command::GetViewport => {
            let state = workbench.registry().state(target)?;
            to_value(state.viewport)
        }
        Command::SetViewport(params) => set_viewport(workbench, target, params.into_viewport(), "Set viewport"),
        Command::ZoomToSelection => zoom_to_selection(workbench, target),
        Command::Undo => history_step(workbench.undo(Some(target))?),
        Command::Redo => history_step(workbench.redo(Some(target))?),
        Command::SavePlot(params) => {
            let path = workbench.save_document(target, params.path.as_deref().map(Path::new))?;
            to_value(SaveResult {
                path: path.display().to_string(),
            })
        }
        Command::ApplyToolAction(action) => apply_tool_action(workbench, target, action),
        other => run_untargeted(workbench, Some(target), other),
    }
}

// ----------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------

fn replace_feature_collection(
    workbench: &mut Workbench,
    target: &EditorId,
    collection: FeatureCollection,
    description: &str,
) -> Result<Value, CommandError> {
    let ids = feature_keys(&collection.features);
    let feature_count = collection.len();
    workbench
        .registry_mut()
        .update_described(target, SliceValue::FeatureCollection(collection), description)?;
    to_value(FeatureWriteResult { ids, feature_count })
}

fn selected_features(workbench: &Workbench, target: &EditorId) -> Result<Value, CommandError> {
    let state = workbench.registry().state(target)?;
    let ids: Vec<String> = state.selection.selected_ids.iter().cloned().collect();
    let features = ids
        .iter()
        .filter_map(|id| state.feature_collection.find(id).cloned())
        .collect();
    to_value(SelectedFeaturesResult { ids, features })
}

fn set_selection(
    workbench: &mut Workbench,
    target: &EditorId,
    ids: &[FeatureId],
    description: &str,
) -> Result<(), CommandError> {
    let selection = SelectionState::new(ids.iter().map(FeatureId::key));
    workbench
        .registry_mut()
        .update_described(target, SliceValue::Selection(selection), description)?;
    Ok(())
}

/// Replace existing features by id. All-or-nothing: an unknown id fails the
/// whole request before anything is written.
fn update_features(workbench: &mut Workbench, target: &EditorId, features: Vec<Feature>) -> Result<Value, CommandError> {
    let state = workbench.registry().state(target)?;
    let mut collection = state.feature_collection.clone();
    let mut ids = Vec::with_capacity(features.len());

    for feature in features {
        let key = feature
            .id_key()
            .ok_or_else(|| CommandError::Validation("every feature to update needs an id".to_string()))?;
        let index = collection
            .position(&key)
            .ok_or_else(|| CommandError::NotFound(format!("feature '{}' not found", key)))?;
        collection.features[index] = feature;
        ids.push(key);
    }

    let feature_count = collection.len();
    workbench
        .registry_mut()
        .update_described(target, SliceValue::FeatureCollection(collection), "Update features")?;
    to_value(FeatureWriteResult { ids, feature_count })
}

/// Append features, minting ids for those without one.
fn add_features(
    workbench: &mut Workbench,
    target: &EditorId,
    features: Vec<Feature>,
    description: &str,
) -> Result<Value, CommandError> {
    let state = workbench.registry().state(target)?;
    let mut collection = state.feature_collection.clone();
    let mut seen: BTreeSet<String> = collection.features.iter().filter_map(Feature::id_key).collect();
    let mut ids = Vec::with_capacity(features.len());

    for mut feature in features {
        let key = match feature.id_key() {
            Some(key) => key,
            None => {
                let minted = uuid::Uuid::new_v4().to_string();
                feature.id = Some(FeatureId::from(minted.clone()));
                minted
            }
        };
        if !seen.insert(key.clone()) {
            return Err(CommandError::Validation(format!("feature '{}' already exists", key)));
        }
        collection.features.push(feature);
        ids.push(key);
    }

    let feature_count = collection.len();
    workbench
        .registry_mut()
        .update_described(target, SliceValue::FeatureCollection(collection), description)?;
    to_value(FeatureWriteResult { ids, feature_count })
}

/// Remove features by id. Ids that do not exist are ignored; the result lists
/// the ones actually removed.
fn delete_features(workbench: &mut Workbench, target: &EditorId, ids: &[FeatureId]) -> Result<Value, CommandError> {
    let state = workbench.registry().state(target)?;
    let doomed: BTreeSet<String> = ids.iter().map(FeatureId::key).collect();
    let mut collection = state.feature_collection.clone();
    let mut removed = Vec::new();
    collection.features.retain(|f| match f.id_key() {
        Some(key) if doomed.contains(&key) => {
            removed.push(key);
            false
        }
        _ => true,
    });

    let feature_count = collection.len();
    workbench
        .registry_mut()
        .update_described(target, SliceValue::FeatureCollection(collection), "Delete features")?;
    to_value(FeatureWriteResult {
        ids: removed,
        feature_count,
    })
}

fn set_viewport(
    workbench: &mut Workbench,
    target: &EditorId,
    viewport: Option<ViewportState>,
    description: &str,
) -> Result<Value, CommandError> {
    workbench
        .registry_mut()
        .update_described(target, SliceValue::Viewport(viewport), description)?;
    to_value(viewport)
}

fn zoom_to_selection(workbench: &mut Workbench, target: &EditorId) -> Result<Value, CommandError> {
    let state = workbench.registry().state(target)?;
    if state.selection.is_empty() {
        return Err(CommandError::Validation("selection is empty".to_string()));
    }
    let [west, south, east, north] = state
        .feature_collection
        .bounds_of(&state.selection.selected_ids)
        .ok_or_else(|| CommandError::Validation("selected features have no geometry".to_string()))?;
    set_viewport(
        workbench,
        target,
        Some(ViewportState::new(west, south, east, north)),
        "Zoom to selection",
    )
}

fn history_step(outcome: HistoryOutcome) -> Result<Value, CommandError> {
    let result = match outcome {
        HistoryOutcome::Applied { description } => HistoryResult {
            applied: true,
            description: Some(description),
        },
        HistoryOutcome::NothingToUndo | HistoryOutcome::NothingToRedo => HistoryResult {
            applied: false,
            description: None,
        },
    };
    to_value(result)
}

fn apply_tool_action(workbench: &mut Workbench, target: &EditorId, action: ToolAction) -> Result<Value, CommandError> {
    log::debug!("Applying tool action '{}' to {}", action.name(), target);
    match action {
        ToolAction::ReplaceFeatureCollection { feature_collection } => {
            replace_feature_collection(workbench, target, feature_collection, "Tool: replace feature collection")
        }
        ToolAction::HighlightFeatures { ids } => {
            set_selection(workbench, target, &ids, "Tool: highlight features")?;
            selected_features(workbench, target)
        }
        ToolAction::AddFeatures { features } => add_features(workbench, target, features, "Tool: add features"),
        ToolAction::SetViewport { bounds } => {
            set_viewport(workbench, target, Some(ViewportState { bounds }), "Tool: set viewport")
        }
    }
}

// ----------------------------------------------------------------------

fn feature_keys(features: &[Feature]) -> Vec<String> {
    features.iter().filter_map(Feature::id_key).collect()
}

fn to_value(value: impl Serialize) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Internal(e.to_string()))
}
