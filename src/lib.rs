pub mod app;
pub mod auth;
pub mod bigquery;
pub mod config;
pub mod domain;
pub mod error;
pub mod firestore;
pub mod normalize;
pub mod output;
