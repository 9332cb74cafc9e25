//! HTTP api storing environmental observation records.
//!
//! Requests pass the token check of [`auth`] (on protected routes), are handled by
//! [`observations`] or [`bulk`], validated by [`validation`] and persisted through a
//! [`database::ObservationStore`].
pub mod auth;
pub mod bulk;
pub mod config;
pub mod database;
pub mod error;
pub mod memory;
pub mod observations;
pub mod record;
pub mod server;
pub mod validation;
