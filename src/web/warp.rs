use crate::error::{ErrorKind, ResultExt};
use crate::forum_bail;
use crate::web::error::ApiError;
use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;
use warp::http::header::CONTENT_TYPE;
use warp::http::{HeaderValue, StatusCode};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply, reply};

pub fn with_cloneable<C: Clone + Send>(
    value: C,
) -> impl Filter<Extract = (C,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

/// Extracts the request body as JSON of the given type.
///
/// Requests without a `Content-Length` or with a larger body than `max_body_size` are rejected
/// by warp before the body is read.
pub fn with_body_as_json<T: DeserializeOwned + Send>(
    max_body_size: u64,
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(max_body_size)
        .and(warp::body::bytes())
        .and_then(|body: Bytes| async move { decode_json(&body).map_err(into_rejection) })
}

fn decode_json<T: DeserializeOwned>(data: &[u8]) -> anyhow::Result<T> {
    if data.is_empty() {
        forum_bail!(ErrorKind::Validation, "Empty input data");
    }

    serde_json::from_slice(data)
        .context("Invalid JSON input")
        .mark_invalid()
}

pub fn into_response<S: Serialize>(result: anyhow::Result<S>) -> Result<Response, Rejection> {
    into_response_with_status(result.map(|data| (StatusCode::OK, data)))
}

pub fn into_response_with_status<S: Serialize>(
    response: anyhow::Result<(StatusCode, S)>,
) -> Result<Response, Rejection> {
    let (status, data) = response.map_err(into_rejection)?;
    let data = serde_json::to_vec(&data)
        .context("Failed to serialize data")
        .map_err(into_rejection)?;

    let mut res = Response::new(data.into());
    *res.status_mut() = status;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(res)
}

pub fn into_rejection(err: anyhow::Error) -> Rejection {
    let api_error = ApiError::from(&err);
    if api_error.status.is_server_error() {
        tracing::error!("Request failed: {:#}", err);
    } else {
        tracing::debug!("Request rejected: {}", api_error);
    }

    api_error.into()
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(err) = err.find::<ApiError>() {
        Ok(reply::with_status(reply::json(&err), err.status))
    } else {
        Err(err)
    }
}

#[macro_export]
macro_rules! routes {
    [$route:expr] => {
        $route
    };
    [$route:expr, $($rest:expr),+] => {
        warp::Filter::or($route, routes![$($rest),+])
    };
}

/// Serves the given routes on `BIND_ADDRESS` until the shutdown token is cancelled.
///
/// Requests in flight when the token fires are completed before this returns.
pub async fn run_webserver<F>(routes: F, shutdown: CancellationToken) -> anyhow::Result<()>
where
    F: Filter + Clone + Send + Sync + 'static,
    F::Extract: Reply,
    F::Error: Into<Rejection> + 'static,
{
    let bind_address = env::var("BIND_ADDRESS")
        .context("Failed to read bind address. Please provide BIND_ADDRESS in the environment")?;
    let bind_address =
        SocketAddr::from_str(&bind_address).context("Failed to parse bind address.")?;

    serve(routes, bind_address, shutdown).await
}

async fn serve<F>(
    routes: F,
    bind_address: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    F: Filter + Clone + Send + Sync + 'static,
    F::Extract: Reply,
    F::Error: Into<Rejection> + 'static,
{
    tracing::info!("Starting server at {}", bind_address);

    let filter = routes
        .boxed()
        .recover(handle_rejection)
        .with(warp::trace(|info| {
            tracing::debug_span!(
                "http_request",
                cluster = %crate::CLUSTER_ID.as_str(),
                http.method = %info.method(),
                http.url = %info.path(),
            )
        }));

    let (address, server) = warp::serve(filter)
        .try_bind_with_graceful_shutdown(bind_address, async move {
            shutdown.cancelled().await;
        })
        .with_context(|| format!("Failed to bind HTTP server to {}", bind_address))?;

    tracing::info!("Running HTTP server at effective address {}", address);
    server.await;
    tracing::info!("HTTP server has been stopped.");

    Ok(())
}
