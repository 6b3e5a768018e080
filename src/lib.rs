//! # Agora
//!
//! Data access layer of a topic-community forum (subreddits, posts, comments and votes) stored in
//! a single key-value table.
//!
//! All entities live in one table and are told apart by key prefixes. Relational access patterns
//! (posts of a topic, votes and comments of a post, all subreddits) are served by four secondary
//! indexes whose keys are stored redundantly on the items themselves.
//!
//! ## Modules
//!
//! - [`keys`] - Key schema: primary and index keys of every entity
//! - [`store`] - Storage gateway over DynamoDB or an in-memory table, with retries
//! - [`resolver`] - One resolver per named operation plus lazy field resolvers
//! - [`votes`] - Vote state machine (create, flip, retract)
//! - [`backfill`] - Offline repair of the denormalized topic index key
//! - [`web`] - HTTP surface for the operations
//! - [`logging`] - Tracing setup with optional OpenTelemetry export
//!
//! ## Feature Flags
//!
//! - `aws_dynamodb` (default) - DynamoDB backed store and the two binaries
//! - `pretty_logs` - Colorful console output for development
//! - `open_telemetry` - OpenTelemetry tracing export
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `APP_NAME` | Application identifier | `AGORA` |
//! | `APP_VERSION` | Version string | `DEVELOPMENT-SNAPSHOT-VERSION` |
//! | `CLUSTER_ID` | Cluster/service identifier | `local` |
//! | `TASK_ID` | Task/instance identifier | `local` |
//! | `BIND_ADDRESS` | HTTP server bind address | (required for `agorad`) |
//! | `AGORA_ENVIRONMENT` | `dev`, `staging` or `production` | `dev` |
//! | `DYNAMO_TABLE_NAME` | Overrides the table selected by `AGORA_ENVIRONMENT` | (none) |
//! | `RUST_LOG` | Console log filter | `info`, AWS SDK at `warn` |
//! | `RUST_TRACE` | OpenTelemetry trace filter | `debug` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OpenTelemetry OTLP endpoint | (required for OTel) |

use std::env;
use std::sync::LazyLock;

/// Error classification shared by all layers.
pub mod error;

/// Logging and tracing infrastructure.
pub mod logging;

/// General-purpose utilities and helpers.
pub mod tools;

/// Entities of the forum.
pub mod model;

/// Key schema of the single table.
pub mod keys;

/// Storage gateway.
pub mod store;

/// Operation resolvers.
pub mod resolver;

/// Vote state machine.
pub mod votes;

/// Repair job for the denormalized topic index.
pub mod backfill;

/// Deployment environment and table selection.
pub mod config;

/// Input validation.
pub mod validation;

/// HTTP layer built on warp.
pub mod web;

/// Application name from `APP_NAME` environment variable.
pub static APP_NAME: LazyLock<String> =
    LazyLock::new(|| env::var("APP_NAME").unwrap_or("AGORA".to_string()));

/// Application version from `APP_VERSION` environment variable.
///
/// Typically set during CI/CD builds. Defaults to
/// `"DEVELOPMENT-SNAPSHOT-VERSION"` for local development.
pub static APP_VERSION: LazyLock<String> =
    LazyLock::new(|| env::var("APP_VERSION").unwrap_or("DEVELOPMENT-SNAPSHOT-VERSION".to_string()));

/// Cluster identifier from `CLUSTER_ID` environment variable.
pub static CLUSTER_ID: LazyLock<String> =
    LazyLock::new(|| env::var("CLUSTER_ID").unwrap_or("local".to_string()));

/// Task identifier from `TASK_ID` environment variable.
///
/// Identifies the specific task or container instance. Defaults to `"local"`.
pub static TASK_ID: LazyLock<String> =
    LazyLock::new(|| env::var("TASK_ID").unwrap_or("local".to_string()));
