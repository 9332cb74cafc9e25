//! Module for storing observations in a postgres database.
//!
//! The [`ObservationStore`] trait is the seam between the request handlers and the
//! persistence backend. [`PostgresStore`] is the production backend, the in-memory
//! backend lives in [`crate::memory`].
use std::sync::Mutex;

use openssl::ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode};
use postgres::{Client, GenericClient, Row};
use postgres_openssl::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Observation;

static SQL_CREATE_TABLE: &'static str = include_str!("sql/create_table.sql");

static SQL_SELECT_OBSERVATION: &'static str = include_str!("sql/select_observation.sql");
static SQL_SELECT_OBSERVATIONS: &'static str = include_str!("sql/select_observations.sql");

static SQL_INSERT_OBSERVATION: &'static str = include_str!("sql/insert_observation.sql");
static SQL_UPDATE_OBSERVATION: &'static str = include_str!("sql/update_observation.sql");
static SQL_DELETE_OBSERVATION: &'static str = include_str!("sql/delete_observation.sql");

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Observation ID {0} not found")]
    NotFound(String),

    #[error("Observation ID {0} already exists")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] postgres::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] openssl::error::ErrorStack),

    #[error("TLS enabled but no TLS parameters specified")]
    MissingTlsParameters,

    #[error("Store lock poisoned")]
    Poisoned,
}

/// One staged mutation, applied by [`ObservationStore::commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert(Observation),
    Update(Observation),
    Delete(String),
}

/// Blocking CRUD access to the observation table.
pub trait ObservationStore: Send + Sync {
    /// Fails with `StoreError::Conflict` if the id is already taken.
    fn insert(&self, observation: &Observation) -> Result<(), StoreError>;

    fn get_by_id(&self, id: &str) -> Result<Option<Observation>, StoreError>;

    /// All observations in insertion order.
    fn list_all(&self) -> Result<Vec<Observation>, StoreError>;

    /// Replaces every field of the row with the given id.
    fn update(&self, id: &str, observation: &Observation) -> Result<(), StoreError>;

    fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Applies the changes as one unit.
    ///
    /// An insert whose id has been taken, or an update or delete whose row is gone by
    /// the time the change is applied, is skipped instead of failing the unit. The
    /// positions of the skipped changes are returned. Any other failure applies nothing.
    fn commit(&self, changes: &[Change]) -> Result<Vec<usize>, StoreError>;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the parameters required for a database connection.
///
/// This includes SSL/TLS encryption.
pub struct DatabaseParameters
{
    /// The hostname of the database server.
    pub hostname: String,
    /// The port for the database server.
    pub port: u32,
    /// The username to connect as.
    pub username: String,
    /// The password to connect with.
    pub password: String,
    /// The database to open on the server.
    pub database: String,
    /// Flag to enable tls for the database server connection.
    pub tls_enable: bool,
    /// Parameters for the tls connection to the database server.
    pub tls_params: Option<DatabaseTlsParameters>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct for the parameters required for a tls connection to the database.
pub struct DatabaseTlsParameters {
    /// The path to the server certificate for TLS encryption.
    pub server_ca_path: String,
    /// The path to the client certificate for TLS encryption.
    pub client_cert_path: String,
    /// The path to the client key for TLS encryption.
    pub client_key_path: String,
}

/// Observation store backed by a single postgres connection.
pub struct PostgresStore {
    client: Mutex<Client>,
}

impl PostgresStore {
    /// Connects to the database and creates the observation table if it is missing.
    ///
    /// # Errors
    ///
    /// Errors occur when one of the following conditions is met:
    ///
    /// * The files for the TLS connection cannot be found.
    ///
    /// * The connection cannot be established.
    ///
    /// * The the user is not authorized for the database.
    pub fn connect(connection_parameters: &DatabaseParameters) -> Result<PostgresStore, StoreError> {
        let postgres_connection_string = format!("user={} password={} host={} port={} dbname={} application_name=observd",
                                                 connection_parameters.username,
                                                 connection_parameters.password,
                                                 connection_parameters.hostname,
                                                 connection_parameters.port,
                                                 connection_parameters.database);

        let mut database_connection = match connection_parameters.tls_enable {
            true => {
                let tls_params = match &connection_parameters.tls_params {
                    Some(tls_params) => tls_params,
                    None => {
                        log::error!(target: "observd::db", "TLS enabled but no TLS parameters specified!");
                        return Err(StoreError::MissingTlsParameters);
                    }
                };
                let tls_connector = MakeTlsConnector::new(tls_connector(tls_params)?);
                Client::connect(postgres_connection_string.as_str(), tls_connector)
            }
            false => Client::connect(postgres_connection_string.as_str(), postgres::NoTls),
        }
        .map_err(|err| {
            log::error!(target: "observd::db", "Could not establish database connection: \'{}\'", err);
            err
        })?;

        database_connection.batch_execute(SQL_CREATE_TABLE)?;
        log::info!(target: "observd::db", "Database connection established!");

        Ok(PostgresStore {
            client: Mutex::new(database_connection),
        })
    }

    fn with_client<T>(&self, operation: impl FnOnce(&mut Client) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut client = self.client.lock().map_err(|_| StoreError::Poisoned)?;
        operation(&mut client)
    }
}

fn tls_connector(tls_params: &DatabaseTlsParameters) -> Result<SslConnector, StoreError> {
    let mut ssl_connection_builder = SslConnector::builder(SslMethod::tls()).map_err(|err| {
        log::error!(target: "observd::db", "Could not create ssl connection builder: \'{}\'", err);
        err
    })?;

    ssl_connection_builder.set_verify(SslVerifyMode::NONE);

    if let Err(err) = ssl_connection_builder.set_ca_file(&tls_params.server_ca_path) {
        log::error!(target: "observd::db", "Could not set ssl ca file: \'{}\'", err);
        return Err(err.into());
    }
    if let Err(err) = ssl_connection_builder.set_certificate_file(&tls_params.client_cert_path, SslFiletype::PEM) {
        log::error!(target: "observd::db", "Could not set ssl client cert file: \'{}\'", err);
        return Err(err.into());
    }
    if let Err(err) = ssl_connection_builder.set_private_key_file(&tls_params.client_key_path, SslFiletype::PEM) {
        log::error!(target: "observd::db", "Could not set ssl client key file: \'{}\'", err);
        return Err(err.into());
    }

    Ok(ssl_connection_builder.build())
}

fn observation_from_row(row: &Row) -> Result<Observation, StoreError> {
    Ok(Observation {
        id: row.try_get("observation_id")?,
        date: row.try_get("observation_date")?,
        time: row.try_get("observation_time")?,
        timezone_offset: row.try_get("observation_timezone")?,
        coordinates: row.try_get("observation_coordinates")?,
        water_temp: row.try_get("observation_water_temp")?,
        air_temp: row.try_get("observation_air_temp")?,
        humidity: row.try_get("observation_humidity")?,
        wind_speed: row.try_get("observation_wind_speed")?,
        wind_direction: row.try_get("observation_wind_direction")?,
        precipitation: row.try_get("observation_precipitation")?,
        haze: row.try_get("observation_haze")?,
        becquerel: row.try_get("observation_becquerel")?,
    })
}

/// Returns the number of inserted rows, zero if the id is already taken.
fn insert_observation(client: &mut impl GenericClient, observation: &Observation) -> Result<u64, StoreError> {
    client.execute(SQL_INSERT_OBSERVATION,
                   &[&observation.id, &observation.date, &observation.time,
                       &observation.timezone_offset, &observation.coordinates,
                       &observation.water_temp, &observation.air_temp,
                       &observation.humidity, &observation.wind_speed,
                       &observation.wind_direction, &observation.precipitation,
                       &observation.haze, &observation.becquerel])
        .map_err(|err| {
            log::warn!(target: "observd::db", "Could not insert observation into database: \'{}\'", err);
            err.into()
        })
}

fn update_observation(client: &mut impl GenericClient, id: &str, observation: &Observation) -> Result<u64, StoreError> {
    Ok(client.execute(SQL_UPDATE_OBSERVATION,
                      &[&id, &observation.date, &observation.time,
                          &observation.timezone_offset, &observation.coordinates,
                          &observation.water_temp, &observation.air_temp,
                          &observation.humidity, &observation.wind_speed,
                          &observation.wind_direction, &observation.precipitation,
                          &observation.haze, &observation.becquerel])?)
}

fn delete_observation(client: &mut impl GenericClient, id: &str) -> Result<u64, StoreError> {
    Ok(client.execute(SQL_DELETE_OBSERVATION, &[&id])?)
}

impl ObservationStore for PostgresStore {
    fn insert(&self, observation: &Observation) -> Result<(), StoreError> {
        self.with_client(|client| match insert_observation(client, observation)? {
            0 => {
                log::warn!(target: "observd::db", "Observation id \'{}\' is already taken", observation.id);
                Err(StoreError::Conflict(observation.id.clone()))
            }
            _ => Ok(()),
        })
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Observation>, StoreError> {
        self.with_client(|client| {
            match client.query_opt(SQL_SELECT_OBSERVATION, &[&id])? {
                Some(row) => Ok(Some(observation_from_row(&row)?)),
                None => Ok(None),
            }
        })
    }

    fn list_all(&self) -> Result<Vec<Observation>, StoreError> {
        self.with_client(|client| {
            client.query(SQL_SELECT_OBSERVATIONS, &[])?
                .iter()
                .map(observation_from_row)
                .collect()
        })
    }

    fn update(&self, id: &str, observation: &Observation) -> Result<(), StoreError> {
        self.with_client(|client| match update_observation(client, id, observation)? {
            0 => Err(StoreError::NotFound(id.to_string())),
            _ => Ok(()),
        })
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.with_client(|client| match delete_observation(client, id)? {
            0 => Err(StoreError::NotFound(id.to_string())),
            _ => Ok(()),
        })
    }

    fn commit(&self, changes: &[Change]) -> Result<Vec<usize>, StoreError> {
        self.with_client(|client| {
            // Dropping the transaction on an early return rolls everything back.
            let mut transaction = client.transaction()?;
            let mut skipped = Vec::new();
            for (position, change) in changes.iter().enumerate() {
                let rows = match change {
                    Change::Insert(observation) => insert_observation(&mut transaction, observation)?,
                    Change::Update(observation) => update_observation(&mut transaction, &observation.id, observation)?,
                    Change::Delete(id) => delete_observation(&mut transaction, id)?,
                };
                if rows == 0 {
                    skipped.push(position);
                }
            }
            transaction.commit()?;
            log::debug!(target: "observd::db", "Committed {} staged changes, {} skipped", changes.len(), skipped.len());
            Ok(skipped)
        })
    }
}
