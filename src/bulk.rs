//! Bulk add, update and delete of observations.
//!
//! Every element of the input array is processed on its own. A failing element is
//! reported as a [`BulkError`] with its index and never aborts the batch. The changes of
//! all successful elements are staged and persisted with a single
//! [`ObservationStore::commit`] at the end of the request. A change the commit had to
//! skip, because its row was taken or removed by a concurrent request after the lookup,
//! is reported against its element like any other lookup outcome. If the commit itself
//! fails nothing of the batch is persisted and the request fails as a whole.
use std::collections::{HashMap, HashSet};

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::database::{Change, ObservationStore};
use crate::error::ApiError;
use crate::observations::new_observation_id;
use crate::record::{Observation, ObservationField, ID_KEY};
use crate::server::{parse_json, with_store, AppState};
use crate::validation::{apply_field, build_observation, observation_id};

const NOT_A_LIST: &str = "Input should be a list of observations";
const NOT_A_LIST_OF_IDS: &str = "Input should be a list of observation IDs";
const INVALID_DATA: &str = "Invalid data format";

/// Failure of a single element of a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkError {
    pub index: usize,
    pub error: String,
}

impl BulkError {
    fn new(index: usize, error: impl ToString) -> BulkError {
        BulkError {
            index,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct BulkAddReport {
    pub added: Vec<Observation>,
    pub errors: Vec<BulkError>,
}

#[derive(Debug, Default, Serialize)]
pub struct BulkUpdateReport {
    pub updated: Vec<Observation>,
    pub errors: Vec<BulkError>,
}

#[derive(Debug, Default, Serialize)]
pub struct BulkDeleteReport {
    pub deleted_ids: Vec<String>,
    pub errors: Vec<BulkError>,
}

fn not_found(id: &str) -> String {
    format!("Observation ID {} not found", id)
}

fn already_exists(id: &str) -> String {
    format!("Observation ID {} already exists", id)
}

fn as_list<'a>(payload: &'a Value, message: &str) -> Result<&'a Vec<Value>, ApiError> {
    payload
        .as_array()
        .ok_or_else(|| ApiError::BadRequest(message.to_string()))
}

/// Validates and stages every element as a new observation.
pub fn add_observations(store: &dyn ObservationStore, payload: &Value) -> Result<BulkAddReport, ApiError> {
    let elements = as_list(payload, NOT_A_LIST)?;
    let mut report = BulkAddReport::default();
    let mut staged_ids: HashSet<String> = HashSet::new();
    let mut staged: Vec<(usize, Observation)> = Vec::new();

    for (index, element) in elements.iter().enumerate() {
        let object = match element.as_object() {
            Some(object) => object,
            None => {
                report.errors.push(BulkError::new(index, INVALID_DATA));
                continue;
            }
        };

        let observation = match observation_id(object)
            .and_then(|id| build_observation(id.unwrap_or_else(new_observation_id), object))
        {
            Ok(observation) => observation,
            Err(err) => {
                report.errors.push(BulkError::new(index, err));
                continue;
            }
        };

        if staged_ids.contains(&observation.id) || store.get_by_id(&observation.id)?.is_some() {
            report.errors.push(BulkError::new(index, already_exists(&observation.id)));
            continue;
        }

        staged_ids.insert(observation.id.clone());
        staged.push((index, observation));
    }

    let changes: Vec<Change> = staged.iter().map(|(_, observation)| Change::Insert(observation.clone())).collect();
    let skipped = store.commit(&changes)?;
    for (position, (index, observation)) in staged.into_iter().enumerate() {
        if skipped.contains(&position) {
            report.errors.push(BulkError::new(index, already_exists(&observation.id)));
        } else {
            report.added.push(observation);
        }
    }
    report.errors.sort_by_key(|error| error.index);
    log::info!(target: "observd::http", "Bulk add: {} added, {} failed", report.added.len(), report.errors.len());
    Ok(report)
}

/// Overwrites the known fields present in every element of an existing observation.
///
/// Unknown keys are ignored. An element with an invalid value is not applied at all.
pub fn update_observations(store: &dyn ObservationStore, payload: &Value) -> Result<BulkUpdateReport, ApiError> {
    let elements = as_list(payload, NOT_A_LIST)?;
    let mut report = BulkUpdateReport::default();
    // Later elements for the same id build on what earlier ones staged.
    let mut staged: HashMap<String, Observation> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut updated: Vec<(usize, Observation)> = Vec::new();

    for (index, element) in elements.iter().enumerate() {
        let object = match element.as_object() {
            Some(object) => object,
            None => {
                report.errors.push(BulkError::new(index, INVALID_DATA));
                continue;
            }
        };

        let id = match object.get(ID_KEY) {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => {
                report.errors.push(BulkError::new(index, format!("Missing {}", ID_KEY)));
                continue;
            }
        };

        let mut observation = match staged.get(&id) {
            Some(observation) => observation.clone(),
            None => match store.get_by_id(&id)? {
                Some(observation) => observation,
                None => {
                    report.errors.push(BulkError::new(index, not_found(&id)));
                    continue;
                }
            },
        };

        let applied = object
            .iter()
            .filter_map(|(key, value)| ObservationField::from_key(key).map(|field| (field, value)))
            .try_for_each(|(field, value)| apply_field(&mut observation, field, value));
        if let Err(err) = applied {
            report.errors.push(BulkError::new(index, err));
            continue;
        }

        if !staged.contains_key(&id) {
            order.push(id.clone());
        }
        staged.insert(id, observation.clone());
        updated.push((index, observation));
    }

    let changes: Vec<Change> = order
        .iter()
        .filter_map(|id| staged.get(id))
        .cloned()
        .map(Change::Update)
        .collect();
    let skipped = store.commit(&changes)?;
    let vanished: HashSet<&String> = skipped.iter().filter_map(|&position| order.get(position)).collect();
    for (index, observation) in updated {
        if vanished.contains(&observation.id) {
            report.errors.push(BulkError::new(index, not_found(&observation.id)));
        } else {
            report.updated.push(observation);
        }
    }
    report.errors.sort_by_key(|error| error.index);
    log::info!(target: "observd::http", "Bulk update: {} updated, {} failed", report.updated.len(), report.errors.len());
    Ok(report)
}

/// Stages the deletion of every listed id.
pub fn delete_observations(store: &dyn ObservationStore, payload: &Value) -> Result<BulkDeleteReport, ApiError> {
    let elements = as_list(payload, NOT_A_LIST_OF_IDS)?;
    let mut report = BulkDeleteReport::default();
    let mut staged_ids: HashSet<String> = HashSet::new();
    let mut staged: Vec<(usize, String)> = Vec::new();

    for (index, element) in elements.iter().enumerate() {
        let id = match element.as_str() {
            Some(id) => id,
            None => {
                report.errors.push(BulkError::new(index, "Invalid observation ID"));
                continue;
            }
        };

        if staged_ids.contains(id) || store.get_by_id(id)?.is_none() {
            report.errors.push(BulkError::new(index, not_found(id)));
            continue;
        }

        staged_ids.insert(id.to_string());
        staged.push((index, id.to_string()));
    }

    let changes: Vec<Change> = staged.iter().map(|(_, id)| Change::Delete(id.clone())).collect();
    let skipped = store.commit(&changes)?;
    for (position, (index, id)) in staged.into_iter().enumerate() {
        if skipped.contains(&position) {
            report.errors.push(BulkError::new(index, not_found(&id)));
        } else {
            report.deleted_ids.push(id);
        }
    }
    report.errors.sort_by_key(|error| error.index);
    log::info!(target: "observd::http", "Bulk delete: {} deleted, {} failed", report.deleted_ids.len(), report.errors.len());
    Ok(report)
}

/// POST /observations/add_bulk_observations_json
pub async fn add(State(state): State<AppState>, body: Bytes) -> Result<Json<BulkAddReport>, ApiError> {
    let payload = parse_json(&body)?;
    with_store(&state, move |store| add_observations(store, &payload)).await.map(Json)
}

/// PUT /observations/update_bulk_observations
pub async fn update(State(state): State<AppState>, body: Bytes) -> Result<Json<BulkUpdateReport>, ApiError> {
    let payload = parse_json(&body)?;
    with_store(&state, move |store| update_observations(store, &payload)).await.map(Json)
}

/// DELETE /observations/delete_bulk_observations
pub async fn delete(State(state): State<AppState>, body: Bytes) -> Result<Json<BulkDeleteReport>, ApiError> {
    let payload = parse_json(&body)?;
    with_store(&state, move |store| delete_observations(store, &payload)).await.map(Json)
}
