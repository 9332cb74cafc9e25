//! Handlers operating on a single observation.
//!
//! Each operation is a blocking function over an [`ObservationStore`] so it can be
//! tested without a runtime. The `async` handlers at the end of the module move those
//! functions onto the blocking pool.
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::database::{ObservationStore, StoreError};
use crate::error::ApiError;
use crate::record::{Observation, ObservationField, ID_KEY};
use crate::server::{parse_json, with_store, AppState};
use crate::validation::{apply_field, build_observation, observation_id, ValidationError};

pub(crate) fn as_object(payload: &Value) -> Result<&Map<String, Value>, ApiError> {
    payload
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Invalid data format".to_string()))
}

pub(crate) fn new_observation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Validates the payload and stores it as a new observation.
///
/// The id of the payload is used when present, otherwise one is generated.
pub fn add_observation(store: &dyn ObservationStore, payload: &Value) -> Result<Observation, ApiError> {
    let payload = as_object(payload)?;
    let id = observation_id(payload)?.unwrap_or_else(new_observation_id);
    let observation = build_observation(id, payload)?;

    store.insert(&observation)?;
    log::info!(target: "observd::http", "Observation \'{}\' added", observation.id);
    Ok(observation)
}

pub fn get_observation(store: &dyn ObservationStore, id: &str) -> Result<Observation, ApiError> {
    store
        .get_by_id(id)?
        .ok_or_else(|| ApiError::NotFound(id.to_string()))
}

pub fn list_observations(store: &dyn ObservationStore) -> Result<Vec<Observation>, ApiError> {
    Ok(store.list_all()?)
}

/// Replaces every field of an existing observation.
///
/// The id cannot be changed. A body id that differs from `id` is rejected.
pub fn update_observation(store: &dyn ObservationStore, id: &str, payload: &Value) -> Result<Observation, ApiError> {
    let payload = as_object(payload)?;
    match observation_id(payload)? {
        Some(body_id) if body_id != id => {
            return Err(ApiError::BadRequest("observation_id cannot be changed".to_string()))
        }
        _ => {}
    }

    let observation = build_observation(id.to_string(), payload)?;
    store.update(id, &observation)?;
    log::info!(target: "observd::http", "Observation \'{}\' updated", id);
    Ok(observation)
}

/// Overwrites exactly one field of an existing observation.
pub fn patch_observation(
    store: &dyn ObservationStore,
    id: &str,
    field: ObservationField,
    payload: &Value,
) -> Result<Observation, ApiError> {
    let value = as_object(payload)?
        .get(field.key())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {}", field.key())))?;

    let mut observation = get_observation(store, id)?;
    apply_field(&mut observation, field, value)?;
    store.update(id, &observation)?;
    log::info!(target: "observd::http", "Observation \'{}\' patched {}", id, field.key());
    Ok(observation)
}

/// Deletes an observation. Deleting an absent id is not an error.
pub fn delete_observation(store: &dyn ObservationStore, id: &str) -> Result<(), ApiError> {
    match store.delete(id) {
        Ok(()) => {
            log::info!(target: "observd::http", "Observation \'{}\' deleted", id);
            Ok(())
        }
        Err(StoreError::NotFound(_)) => {
            log::debug!(target: "observd::http", "Observation \'{}\' was already absent", id);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn requested_id(payload: &Value) -> Result<String, ApiError> {
    match payload.get(ID_KEY) {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(_) => Err(ValidationError::InvalidId.into()),
        None => Err(ApiError::BadRequest(format!("Missing {}", ID_KEY))),
    }
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub observation_id: Option<String>,
}

/// POST /observations/add_observations_json
pub async fn add(State(state): State<AppState>, body: Bytes) -> Result<Json<Observation>, ApiError> {
    let payload = parse_json(&body)?;
    with_store(&state, move |store| add_observation(store, &payload)).await.map(Json)
}

/// GET /observations/get_observations
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Observation>>, ApiError> {
    with_store(&state, list_observations).await.map(Json)
}

/// GET /observations/get_one_observation/{id}
pub async fn get_by_path(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Observation>, ApiError> {
    with_store(&state, move |store| get_observation(store, &id)).await.map(Json)
}

/// GET /observations/get_one_observation?observation_id=
pub async fn get_by_query(State(state): State<AppState>, Query(query): Query<IdQuery>) -> Result<Json<Observation>, ApiError> {
    let id = query
        .observation_id
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {}", ID_KEY)))?;
    with_store(&state, move |store| get_observation(store, &id)).await.map(Json)
}

/// GET /observations/get_one_observation_json
pub async fn get_by_body(State(state): State<AppState>, body: Bytes) -> Result<Json<Observation>, ApiError> {
    let id = requested_id(&parse_json(&body)?)?;
    with_store(&state, move |store| get_observation(store, &id)).await.map(Json)
}

/// PUT /observations/update_observation/{id}
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Observation>, ApiError> {
    let payload = parse_json(&body)?;
    with_store(&state, move |store| update_observation(store, &id, &payload)).await.map(Json)
}

/// PATCH /observations/patch_one_observation_<field>/{id}
pub async fn patch(
    field: ObservationField,
    state: AppState,
    id: String,
    body: Bytes,
) -> Result<Json<Observation>, ApiError> {
    let payload = parse_json(&body)?;
    with_store(&state, move |store| patch_observation(store, &id, field, &payload)).await.map(Json)
}

/// DELETE /observations/delete_one_observation/{id}
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let deleted = id.clone();
    with_store(&state, move |store| delete_observation(store, &deleted)).await?;
    Ok(Json(json!({ "Observation Deleted": format!("observation_id: {}", id) })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::validation::tests::valid_payload;
    use serde_json::json;

    fn payload() -> Value {
        Value::Object(valid_payload())
    }

    #[test]
    fn add_then_get_round_trips() {
        let store = MemoryStore::new();
        let added = add_observation(&store, &payload()).unwrap();
        assert!(Uuid::parse_str(&added.id).is_ok());

        let fetched = get_observation(&store, &added.id).unwrap();
        assert_eq!(fetched, added);
        assert_eq!(fetched.water_temp, 15.5);
    }

    #[test]
    fn add_keeps_given_id_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let mut body = payload();
        body[ID_KEY] = json!("station-7");
        assert_eq!(add_observation(&store, &body).unwrap().id, "station-7");
        assert!(matches!(add_observation(&store, &body), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn invalid_payloads_persist_nothing() {
        let store = MemoryStore::new();

        let mut bad_date = payload();
        bad_date["observation_date"] = json!("2024/12/10");
        let err = add_observation(&store, &bad_date).unwrap_err();
        assert_eq!(err.to_string(), "Invalid date or time format");

        let mut bad_field = payload();
        bad_field["observation_timeZone"] = json!("CET");
        let err = add_observation(&store, &bad_field).unwrap_err();
        assert_eq!(err.to_string(), "Invalid data format");

        assert!(add_observation(&store, &json!([1, 2])).is_err());
        assert!(list_observations(&store).unwrap().is_empty());
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = get_observation(&store, "ghost").unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(err.to_string(), "Observation ID ghost not found");
    }

    #[test]
    fn update_replaces_fields_but_not_id() {
        let store = MemoryStore::new();
        let added = add_observation(&store, &payload()).unwrap();

        let mut body = payload();
        body["observation_haze"] = json!(0.7);
        let updated = update_observation(&store, &added.id, &body).unwrap();
        assert_eq!(updated.haze, 0.7);
        assert_eq!(get_observation(&store, &added.id).unwrap().haze, 0.7);

        body[ID_KEY] = json!("hijack");
        assert!(matches!(update_observation(&store, &added.id, &body), Err(ApiError::BadRequest(_))));
        assert!(matches!(update_observation(&store, "ghost", &payload()), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn patch_changes_one_field() {
        let store = MemoryStore::new();
        let added = add_observation(&store, &payload()).unwrap();

        let patched = patch_observation(&store, &added.id, ObservationField::Humidity, &json!({"observation_humidity": 75})).unwrap();
        assert_eq!(patched.humidity, 75.0);
        assert_eq!(patched.air_temp, added.air_temp);

        assert!(patch_observation(&store, &added.id, ObservationField::Humidity, &json!({"observation_haze": 1})).is_err());
        assert!(patch_observation(&store, &added.id, ObservationField::Humidity, &json!({"observation_humidity": "wet"})).is_err());
        assert!(matches!(
            patch_observation(&store, "ghost", ObservationField::Humidity, &json!({"observation_humidity": 1})),
            Err(ApiError::NotFound(_))
        ));
        assert_eq!(get_observation(&store, &added.id).unwrap().humidity, 75.0);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = MemoryStore::new();
        let added = add_observation(&store, &payload()).unwrap();
        delete_observation(&store, &added.id).unwrap();
        delete_observation(&store, &added.id).unwrap();
        assert!(list_observations(&store).unwrap().is_empty());
    }
}
