//! HTTP server: shared state, routing and the bridge onto the blocking store.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::auth::{self, AuthGate, AuthParameters};
use crate::bulk;
use crate::database::ObservationStore;
use crate::error::ApiError;
use crate::observations;
use crate::record::ObservationField;

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters of the listening socket.
pub struct ServerParameters {
    /// The ip address the server should listen on.
    pub address: String,
    /// The port the server should listen on.
    pub port: u16,
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObservationStore>,
    pub auth: Arc<AuthGate>,
}

impl AppState {
    pub fn new(store: Arc<dyn ObservationStore>, auth_parameters: &AuthParameters) -> AppState {
        AppState {
            store,
            auth: Arc::new(AuthGate::new(auth_parameters)),
        }
    }
}

/// Runs a store operation on the blocking thread pool.
pub async fn with_store<T, F>(state: &AppState, operation: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ObservationStore) -> Result<T, ApiError> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || operation(store.as_ref()))
        .await
        .map_err(|err| ApiError::Internal(format!("Store task failed: {}", err)))?
}

pub fn parse_json(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|err| ApiError::BadRequest(format!("Invalid JSON body: {}", err)))
}

/// Builds the router with every observation route.
///
/// Reads are always guarded by a token. The add and bulk write routes are only guarded
/// when the auth parameters ask for it.
pub fn router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/observations/get_observations", get(observations::list))
        .route("/observations/get_one_observation", get(observations::get_by_query))
        .route("/observations/get_one_observation/:id", get(observations::get_by_path))
        .route("/observations/get_one_observation_json", get(observations::get_by_body))
        .route("/observations/update_observation/:id", put(observations::update))
        .route("/observations/delete_one_observation/:id", delete(observations::delete));

    let guarded = ObservationField::ALL.iter().fold(guarded, |router, &field| {
        let path = format!("/observations/patch_one_observation_{}/:id", field.route_suffix());
        router.route(
            &path,
            patch(move |State(state): State<AppState>, Path(id): Path<String>, body: Bytes| {
                observations::patch(field, state, id, body)
            }),
        )
    });

    let writes = Router::new()
        .route("/observations/add_observations_json", post(observations::add))
        .route("/observations/add_bulk_observations_json", post(bulk::add))
        .route("/observations/update_bulk_observations", put(bulk::update))
        .route("/observations/delete_bulk_observations", delete(bulk::delete));

    let writes = if state.auth.protects_all_writes() {
        writes.route_layer(from_fn_with_state(state.clone(), auth::require_token))
    } else {
        log::warn!(target: "observd::http", "Add and bulk write routes are not protected by a token!");
        writes
    };

    Router::new()
        .route("/login", get(auth::login))
        .merge(guarded.route_layer(from_fn_with_state(state.clone(), auth::require_token)))
        .merge(writes)
        .with_state(state)
}

/// Serves the api until `shutdown` is notified.
pub async fn serve(params: &ServerParameters, state: AppState, shutdown: Arc<Notify>) -> std::io::Result<()> {
    let listener = TcpListener::bind(format!("{}:{}", params.address, params.port)).await?;
    log::info!(target: "observd::http", "Listening on \'{}\'", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await
}
