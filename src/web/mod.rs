//! HTTP surface of the resolver layer built on warp.
//!
//! Every named operation is exposed as a JSON endpoint below `/api/v1` (see [`routes`]). Errors
//! are mapped from their [`ErrorKind`](crate::error::ErrorKind) to a status code by [`error`].
//! Use [`warp::run_webserver`] to serve the routes until a termination signal arrives.

use bytesize::MB;

pub mod error;
pub mod info_service;
pub mod routes;
pub mod warp;

/// Limit for JSON request bodies (1 MB).
pub const DEFAULT_MAX_JSON_BODY_SIZE: u64 = MB;
