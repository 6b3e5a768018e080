//! Serves the forum operations over HTTP.
//!
//! Reads `BIND_ADDRESS`, `AGORA_ENVIRONMENT` and `DYNAMO_TABLE_NAME` from the environment. In the
//! `dev` environment the table is created on startup if it does not exist yet.

use agora::config::Environment;
use agora::logging::setup_tracing;
use agora::resolver::Resolvers;
use agora::routes;
use agora::store::dynamo::{DynamoItemStore, create_forum_table};
use agora::store::{RetryPolicy, RetryingStore};
use agora::tools::system::install_termination_listener;
use agora::web::info_service::get_info_route;
use agora::web::routes::forum_routes;
use agora::web::warp::run_webserver;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let shutdown = install_termination_listener();

    let environment = Environment::from_env()?;
    let store = DynamoItemStore::from_env().await?;
    tracing::info!(
        "Using table '{}' ({} environment)",
        store.table_name(),
        environment
    );
    if environment == Environment::Dev {
        create_forum_table(&store).await?;
    }

    let store = RetryingStore::new(store, RetryPolicy::default());
    let resolvers = Resolvers::new(Arc::new(store));

    run_webserver(
        routes![forum_routes(resolvers), get_info_route()],
        shutdown,
    )
    .await
}
