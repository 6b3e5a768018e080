//! Offline repair of the topic index key of posts.
//!
//! A post is filed under `SUBREDDIT#<topic>` in the topic index using the topic its subreddit had
//! when the post was created. If a topic is changed out of band, the posts stay filed under the
//! old topic. [`run`] scans every post, recomputes the partition from the subreddit's current
//! topic and rewrites the stored value where it differs.
//!
//! The job is idempotent: a second run over an unchanged table performs no writes. Each page of
//! the scan is completely processed before the next one is requested, and cancellation is only
//! honoured between pages, so an interrupted run leaves every processed page repaired.

use crate::error::{ErrorKind, ForumError, is_kind};
use crate::keys::{self, Index, METADATA, PrimaryKey};
use crate::model::{Post, Subreddit};
use crate::store::{
    Condition, DEFAULT_PAGE_SIZE, Item, ItemStore, PageToken, ScanFilter, from_item,
};
use anyhow::Context;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackfillOptions {
    /// Number of posts of a page repaired at the same time.
    pub concurrency: usize,
    /// Number of items evaluated per scan page.
    pub page_size: i32,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        BackfillOptions {
            concurrency: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// A post which could not be repaired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedRepair {
    pub post_id: String,
    pub key: String,
    pub reason: String,
}

/// Summary of a backfill run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Posts seen by the scan.
    pub scanned: usize,
    /// Posts whose topic index key was rewritten.
    pub updated: usize,
    /// Posts which were already correct or could not be resolved.
    pub skipped: usize,
    /// Posts whose subreddit does not exist.
    pub unresolved: Vec<String>,
    pub failures: Vec<FailedRepair>,
    /// Whether the run stopped early.
    pub cancelled: bool,
}

impl BackfillReport {
    /// Describes the failed repairs, if there were any.
    pub fn partial_failure(&self) -> Option<ForumError> {
        if self.failures.is_empty() {
            return None;
        }

        let posts = self
            .failures
            .iter()
            .map(|failure| format!("{} ({})", failure.post_id, failure.reason))
            .collect::<Vec<_>>()
            .join(", ");

        Some(ForumError::new(
            ErrorKind::PartialFailure,
            format!(
                "{} of {} posts could not be repaired: {}",
                self.failures.len(),
                self.scanned,
                posts
            ),
        ))
    }

    fn record(&mut self, post_id: String, key: String, outcome: anyhow::Result<RepairOutcome>) {
        self.scanned += 1;
        match outcome {
            Ok(RepairOutcome::Updated { .. }) => self.updated += 1,
            Ok(RepairOutcome::Unchanged) => self.skipped += 1,
            Ok(RepairOutcome::Unresolved { .. }) => {
                self.skipped += 1;
                self.unresolved.push(post_id);
            }
            Err(err) => self.failures.push(FailedRepair {
                post_id,
                key,
                reason: format!("{:#}", err),
            }),
        }
    }
}

/// What happened to a single post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepairOutcome {
    Unchanged,
    Updated { from: Option<String>, to: String },
    Unresolved { subreddit_id: String },
}

/// Repairs the topic index key of every post.
///
/// Fails only if the scan itself fails. Failures of individual posts are collected in the
/// report while the scan continues.
pub async fn run(
    store: &dyn ItemStore,
    options: &BackfillOptions,
    cancellation: &CancellationToken,
) -> anyhow::Result<BackfillReport> {
    let filter = ScanFilter::new(keys::post_key_prefix())
        .with_sk(METADATA)
        .with_page_size(options.page_size);
    let concurrency = options.concurrency.max(1);

    let mut report = BackfillReport::default();
    let mut start: Option<PageToken> = None;
    let mut page_number = 0;

    loop {
        if cancellation.is_cancelled() {
            tracing::warn!("Backfill cancelled after {} pages", page_number);
            report.cancelled = true;
            break;
        }

        let page = store
            .scan_page(&filter, start.take())
            .await
            .context("Failed to scan posts")?;
        page_number += 1;
        tracing::debug!("Processing page {} with {} posts", page_number, page.items.len());

        let outcomes = futures_util::stream::iter(page.items)
            .map(|item| async move {
                let (post_id, key) = describe(&item);
                let outcome = repair_post(store, item).await;
                (post_id, key, outcome)
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;

        for (post_id, key, outcome) in outcomes {
            report.record(post_id, key, outcome);
        }

        match page.next {
            Some(token) => start = Some(token),
            None => break,
        }
    }

    tracing::info!(
        "Backfill finished: {} posts scanned, {} updated, {} skipped, {} unresolved, {} failed",
        report.scanned,
        report.updated,
        report.skipped,
        report.unresolved.len(),
        report.failures.len()
    );

    Ok(report)
}

fn describe(item: &Item) -> (String, String) {
    let post_id = item
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let key = PrimaryKey::of_item(item)
        .map(|key| key.pk)
        .unwrap_or_default();

    (post_id, key)
}

/// Brings the topic index key of a single post up to date.
pub async fn repair_post(store: &dyn ItemStore, item: Item) -> anyhow::Result<RepairOutcome> {
    let partition_attribute = Index::PostsByTopic.partition_attribute();
    let sort_attribute = Index::PostsByTopic.sort_attribute();

    let stored_partition = item
        .get(partition_attribute)
        .and_then(Value::as_str)
        .map(str::to_string);
    let has_sort_key = item.contains_key(sort_attribute);
    let post: Post = from_item(item).context("Malformed post item")?;

    let Some(subreddit_item) = store
        .get_item(&keys::subreddit_key(&post.subreddit_id))
        .await
        .with_context(|| format!("Failed to read subreddit '{}'", post.subreddit_id))?
    else {
        tracing::warn!(
            "Skipping post '{}': subreddit '{}' does not exist",
            post.id,
            post.subreddit_id
        );
        return Ok(RepairOutcome::Unresolved {
            subreddit_id: post.subreddit_id,
        });
    };
    let subreddit: Subreddit = from_item(subreddit_item).context("Malformed subreddit item")?;

    let post_keys = keys::post_keys(&post, &subreddit.topic);
    let Some(expected) = post_keys.index(Index::PostsByTopic) else {
        anyhow::bail!("Posts must be part of the topic index");
    };

    if stored_partition.as_deref() == Some(expected.partition.as_str()) && has_sort_key {
        tracing::info!("Post '{}' is up to date ({})", post.id, expected.partition);
        return Ok(RepairOutcome::Unchanged);
    }

    let mut attributes = Item::new();
    attributes.insert(
        partition_attribute.to_string(),
        Value::String(expected.partition.clone()),
    );
    if !has_sort_key {
        attributes.insert(
            sort_attribute.to_string(),
            Value::String(expected.sort.clone()),
        );
    }

    // Only overwrite what was read, a concurrent change wins.
    let condition = match &stored_partition {
        Some(stored) => Condition::attribute_equals(partition_attribute, stored.as_str()),
        None => Condition::attribute_missing(partition_attribute),
    };

    store
        .update_item(&keys::post_key(&post.id), attributes, Some(condition))
        .await
        .map_err(|err| {
            if is_kind(&err, ErrorKind::ConditionFailed) {
                err.context("Post changed while being repaired")
            } else {
                err
            }
        })
        .with_context(|| format!("Failed to repair post '{}'", post.id))?;

    tracing::info!(
        "Updated post '{}': {} -> {}",
        post.id,
        stored_partition.as_deref().unwrap_or("<missing>"),
        expected.partition
    );

    Ok(RepairOutcome::Updated {
        from: stored_partition,
        to: expected.partition.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;
    use crate::keys::{post_key, subreddit_key};
    use crate::resolver::test::memory_resolvers;
    use crate::resolver::{NewPost, Resolvers};
    use crate::store::memory::MemoryItemStore;
    use crate::store::{IndexQuery, Page};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn rename_topic(store: &dyn ItemStore, subreddit_id: &str, topic: &str) {
        let mut attributes = Item::new();
        attributes.insert("topic".to_string(), json!(topic));
        store
            .update_item(&subreddit_key(subreddit_id), attributes, None)
            .await
            .unwrap();
    }

    async fn golang_post(resolvers: &Resolvers) -> (Subreddit, Post) {
        let subreddit = resolvers.create_subreddit_by_topic("golang").await.unwrap();
        let post = resolvers
            .create_post(NewPost::new(&subreddit.id, "alice", "Generics"))
            .await
            .unwrap();

        (subreddit, post)
    }

    #[tokio::test]
    async fn renamed_topics_are_picked_up_after_one_pass() {
        let (resolvers, store) = memory_resolvers();
        let (subreddit, post) = golang_post(&resolvers).await;

        rename_topic(store.as_ref(), &subreddit.id, "go").await;
        assert!(resolvers.list_posts_by_topic("go").await.unwrap().is_empty());

        let report = run(
            store.as_ref(),
            &BackfillOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(
            resolvers.list_posts_by_topic("go").await.unwrap(),
            vec![post]
        );
        assert!(resolvers.list_posts_by_topic("golang").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repair_changes_nothing_but_the_partition() {
        let (resolvers, store) = memory_resolvers();
        let (subreddit, post) = golang_post(&resolvers).await;
        let before = store.get_item(&post_key(&post.id)).await.unwrap().unwrap();

        rename_topic(store.as_ref(), &subreddit.id, "go").await;
        run(
            store.as_ref(),
            &BackfillOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut after = store.get_item(&post_key(&post.id)).await.unwrap().unwrap();
        assert_eq!(after["GSI1PK"], "SUBREDDIT#go");
        after.insert("GSI1PK".to_string(), json!("SUBREDDIT#golang"));
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn second_run_performs_no_writes() {
        let (resolvers, store) = memory_resolvers();
        let (subreddit, _) = golang_post(&resolvers).await;
        golang_post(&resolvers).await;
        rename_topic(store.as_ref(), &subreddit.id, "go").await;

        let options = BackfillOptions::default();
        let first = run(store.as_ref(), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.updated, 1);
        assert_eq!(first.skipped, 1);

        let writes = store.write_count();
        let second = run(store.as_ref(), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn posts_of_missing_subreddits_are_reported_as_unresolved() {
        let (resolvers, store) = memory_resolvers();
        let (subreddit, post) = golang_post(&resolvers).await;
        store.delete_item(&subreddit_key(&subreddit.id)).await.unwrap();

        let report = run(
            store.as_ref(),
            &BackfillOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.unresolved, vec![post.id]);
        assert_eq!(report.skipped, 1);
        assert!(report.partial_failure().is_none());
    }

    #[tokio::test]
    async fn legacy_posts_without_index_keys_get_both_keys() {
        let (resolvers, store) = memory_resolvers();
        let (_, post) = golang_post(&resolvers).await;

        let mut item = store.get_item(&post_key(&post.id)).await.unwrap().unwrap();
        item.remove("GSI1PK");
        item.remove("GSI1SK");
        store.put_item(item, None).await.unwrap();

        let report = run(
            store.as_ref(),
            &BackfillOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(
            resolvers.list_posts_by_topic("golang").await.unwrap(),
            vec![post]
        );
    }

    #[tokio::test]
    async fn pages_are_processed_with_bounded_concurrency() {
        let (resolvers, store) = memory_resolvers();
        let (subreddit, _) = golang_post(&resolvers).await;
        for title in ["a", "b", "c", "d", "e", "f", "g", "h", "i"] {
            resolvers
                .create_post(NewPost::new(&subreddit.id, "bob", title))
                .await
                .unwrap();
        }
        rename_topic(store.as_ref(), &subreddit.id, "go").await;

        let gauged = FaultyStore::new(store.clone());
        let report = run(
            &gauged,
            &BackfillOptions {
                concurrency: 4,
                page_size: 6,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.scanned, 10);
        assert_eq!(report.updated, 10);
        assert_eq!(resolvers.list_posts_by_topic("go").await.unwrap().len(), 10);

        let peak = gauged.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak > 1, "repairs ran one at a time");
        assert!(peak <= 4, "{} repairs ran at once", peak);
    }

    #[tokio::test]
    async fn cancelled_runs_stop_before_the_next_page() {
        let (resolvers, store) = memory_resolvers();
        golang_post(&resolvers).await;

        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let report = run(store.as_ref(), &BackfillOptions::default(), &cancellation)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.scanned, 0);
    }

    /// Wraps the memory table to inject transient faults and to observe concurrent updates.
    struct FaultyStore {
        inner: Arc<MemoryItemStore>,
        broken_post: Option<String>,
        failing_scans: bool,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl FaultyStore {
        fn new(inner: Arc<MemoryItemStore>) -> Self {
            FaultyStore {
                inner,
                broken_post: None,
                failing_scans: false,
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ItemStore for FaultyStore {
        async fn get_item(&self, key: &PrimaryKey) -> anyhow::Result<Option<Item>> {
            self.inner.get_item(key).await
        }

        async fn put_item(&self, item: Item, condition: Option<Condition>) -> anyhow::Result<()> {
            self.inner.put_item(item, condition).await
        }

        async fn update_item(
            &self,
            key: &PrimaryKey,
            attributes: Item,
            condition: Option<Condition>,
        ) -> anyhow::Result<Item> {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;

            let result = match &self.broken_post {
                Some(post_id) if *key == post_key(post_id) => {
                    Err(ForumError::new(ErrorKind::StoreUnavailable, "connection reset").into())
                }
                _ => self.inner.update_item(key, attributes, condition).await,
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            result
        }

        async fn delete_item(&self, key: &PrimaryKey) -> anyhow::Result<()> {
            self.inner.delete_item(key).await
        }

        async fn query_page(
            &self,
            query: &IndexQuery,
            start: Option<PageToken>,
        ) -> anyhow::Result<Page> {
            self.inner.query_page(query, start).await
        }

        async fn scan_page(
            &self,
            filter: &ScanFilter,
            start: Option<PageToken>,
        ) -> anyhow::Result<Page> {
            if self.failing_scans {
                return Err(ForumError::new(ErrorKind::StoreUnavailable, "scan timed out").into());
            }
            self.inner.scan_page(filter, start).await
        }
    }

    #[tokio::test]
    async fn failing_scans_abort_the_run() {
        let (resolvers, store) = memory_resolvers();
        let (subreddit, _) = golang_post(&resolvers).await;
        rename_topic(store.as_ref(), &subreddit.id, "go").await;
        let writes = store.write_count();

        let failing = FaultyStore {
            failing_scans: true,
            ..FaultyStore::new(store.clone())
        };
        let err = run(
            &failing,
            &BackfillOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(kind_of(&err), Some(ErrorKind::StoreUnavailable));
        assert_eq!(store.write_count(), writes);
        assert_eq!(failing.peak_in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_repairs_are_collected_while_the_scan_continues() {
        let (resolvers, store) = memory_resolvers();
        let (subreddit, broken) = golang_post(&resolvers).await;
        let healthy = resolvers
            .create_post(NewPost::new(&subreddit.id, "bob", "Channels"))
            .await
            .unwrap();
        rename_topic(store.as_ref(), &subreddit.id, "go").await;

        let failing = FaultyStore {
            broken_post: Some(broken.id.clone()),
            ..FaultyStore::new(store.clone())
        };
        let report = run(
            &failing,
            &BackfillOptions {
                concurrency: 1,
                page_size: 1,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].post_id, broken.id);
        assert_eq!(report.failures[0].key, format!("POST#{}", broken.id));
        assert_eq!(
            resolvers.list_posts_by_topic("go").await.unwrap(),
            vec![healthy]
        );

        let partial = report.partial_failure().unwrap();
        assert_eq!(partial.kind, ErrorKind::PartialFailure);
        assert!(partial.message.contains(&broken.id));
    }

    #[tokio::test]
    async fn concurrent_changes_win_over_the_repair() {
        let (resolvers, store) = memory_resolvers();
        let (subreddit, post) = golang_post(&resolvers).await;
        rename_topic(store.as_ref(), &subreddit.id, "go").await;

        let item = store.get_item(&post_key(&post.id)).await.unwrap().unwrap();
        let mut attributes = Item::new();
        attributes.insert("GSI1PK".to_string(), json!("SUBREDDIT#elsewhere"));
        store
            .update_item(&post_key(&post.id), attributes, None)
            .await
            .unwrap();

        let err = repair_post(store.as_ref(), item).await.unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::ConditionFailed));
    }
}
