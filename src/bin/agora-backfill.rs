//! Rewrites the topic index key of every post from the current topic of its subreddit.
//!
//! Takes no arguments. Always works on the production table. Exits with 1 if the table cannot be
//! scanned and with 0 otherwise, even if single posts could not be repaired.

use agora::backfill::{self, BackfillOptions, BackfillReport};
use agora::config::PRODUCTION_TABLE;
use agora::logging::setup_tracing;
use agora::store::dynamo::DynamoItemStore;
use agora::store::{RetryPolicy, RetryingStore};
use agora::tools::system::install_termination_listener;
use std::process::ExitCode;

const REGION: &str = "us-east-1";

#[tokio::main]
async fn main() -> ExitCode {
    setup_tracing();
    let cancellation = install_termination_listener();

    let store = DynamoItemStore::for_region(PRODUCTION_TABLE, REGION).await;
    let store = RetryingStore::new(store, RetryPolicy::default());

    match backfill::run(&store, &BackfillOptions::default(), &cancellation).await {
        Ok(report) => {
            print_summary(&report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("Backfill of '{}' failed: {:#}", PRODUCTION_TABLE, err);
            eprintln!("Backfill failed: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn print_summary(report: &BackfillReport) {
    println!("Total posts scanned: {}", report.scanned);
    println!("Posts updated: {}", report.updated);
    println!("Posts skipped: {}", report.skipped);

    if !report.unresolved.is_empty() {
        println!(
            "Posts without subreddit ({}): {}",
            report.unresolved.len(),
            report.unresolved.join(", ")
        );
    }
    for failure in &report.failures {
        println!(
            "Failed to repair post '{}' ({}): {}",
            failure.post_id, failure.key, failure.reason
        );
    }
    if let Some(partial_failure) = report.partial_failure() {
        println!("{}", partial_failure);
    }
    if report.cancelled {
        println!("Backfill was cancelled before all posts were scanned.");
    }
}
