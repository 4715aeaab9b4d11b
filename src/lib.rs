//! TrashClick - citizen reporting of environmental issues
//!
//! Citizens report litter, dumping and other environmental problems with a
//! description, a location and an optional photo. Administrators triage the
//! reports, route them to a municipality department and invite further
//! administrators. Every report earns its author environmental points.
//!
//! # Points
//!
//! - 10 for any report
//! - +5 once an administrator verified it
//! - +15 once it is resolved
//! - +50 if it was a clean-up event
//!
//! The leaderboard ranks users by total points with dense ranks.
//!
//! # Storage
//!
//! [`pg_storage::PgStorage`] persists everything in PostgreSQL;
//! [`reference_db::ReferenceDb`] keeps it in memory for tests and local runs.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod geocode;
pub mod invite;
pub mod media;
pub mod models;
pub mod pg_storage;
pub mod reference_db;
pub mod reports;
pub mod scoring;
pub mod server;
pub mod service;

pub use config::Config;
pub use database::{Database, DynDatabase};
pub use error::{ApiError, ApiResult};
pub use pg_storage::PgStorage;
pub use reference_db::ReferenceDb;
pub use service::TrashClick;
