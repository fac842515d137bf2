//! Taskboard library
//!
//! Task and user collections over a document store, kept mutually
//! consistent by [`sync::RelationshipSynchronizer`], with a REST transport.

pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod query;
pub mod services;
pub mod sync;
pub mod types;
