//! Retries transient storage faults with exponential backoff and jitter.
//!
//! Only `StoreUnavailable` and `Throttled` are retried. Business signals such as
//! `ConditionFailed` or `NotFound` are returned to the caller immediately, as repeating the same
//! request would yield the same answer.

use crate::error::kind_of;
use crate::keys::PrimaryKey;
use crate::store::{Condition, IndexQuery, Item, ItemStore, Page, PageToken, ScanFilter};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;

/// Controls how often and how patiently transient faults are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy which performs exactly one attempt.
    pub fn no_retries() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_jitter()
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    kind_of(err).is_some_and(|kind| kind.is_retryable())
}

/// Wraps another [`ItemStore`] and retries its transient failures.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ItemStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        RetryingStore { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn notify(operation: &'static str) -> impl FnMut(&anyhow::Error, Duration) {
    move |err: &anyhow::Error, delay: Duration| {
        tracing::warn!(
            operation,
            delay = ?delay,
            "Transient storage failure, retrying: {:#}",
            err
        );
    }
}

#[async_trait]
impl<S: ItemStore> ItemStore for RetryingStore<S> {
    async fn get_item(&self, key: &PrimaryKey) -> anyhow::Result<Option<Item>> {
        (|| self.inner.get_item(key))
            .retry(self.policy.backoff())
            .when(is_transient)
            .notify(notify("get_item"))
            .await
    }

    async fn put_item(&self, item: Item, condition: Option<Condition>) -> anyhow::Result<()> {
        (|| self.inner.put_item(item.clone(), condition.clone()))
            .retry(self.policy.backoff())
            .when(is_transient)
            .notify(notify("put_item"))
            .await
    }

    async fn update_item(
        &self,
        key: &PrimaryKey,
        attributes: Item,
        condition: Option<Condition>,
    ) -> anyhow::Result<Item> {
        (|| {
            self.inner
                .update_item(key, attributes.clone(), condition.clone())
        })
        .retry(self.policy.backoff())
        .when(is_transient)
        .notify(notify("update_item"))
        .await
    }

    async fn delete_item(&self, key: &PrimaryKey) -> anyhow::Result<()> {
        (|| self.inner.delete_item(key))
            .retry(self.policy.backoff())
            .when(is_transient)
            .notify(notify("delete_item"))
            .await
    }

    async fn query_page(
        &self,
        query: &IndexQuery,
        start: Option<PageToken>,
    ) -> anyhow::Result<Page> {
        (|| self.inner.query_page(query, start.clone()))
            .retry(self.policy.backoff())
            .when(is_transient)
            .notify(notify("query_page"))
            .await
    }

    async fn scan_page(
        &self,
        filter: &ScanFilter,
        start: Option<PageToken>,
    ) -> anyhow::Result<Page> {
        (|| self.inner.scan_page(filter, start.clone()))
            .retry(self.policy.backoff())
            .when(is_transient)
            .notify(notify("scan_page"))
            .await
    }
}
