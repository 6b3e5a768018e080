//! One resolver per named operation of the forum plus the lazy field resolvers.
//!
//! | Operation | Method |
//! |-----------|--------|
//! | `getSubredditsByTopic` | [`Resolvers::get_subreddits_by_topic`] |
//! | `listSubreddits` | [`Resolvers::list_subreddits`] |
//! | `createSubredditByTopic` | [`Resolvers::create_subreddit_by_topic`] |
//! | `listPosts` | [`Resolvers::list_posts`] |
//! | `listPostsByTopic` | [`Resolvers::list_posts_by_topic`] |
//! | `getPost` | [`Resolvers::get_post`] |
//! | `createPost` | [`Resolvers::create_post`] |
//! | `addComment` | [`Resolvers::add_comment`] |
//! | `addVote` | [`Resolvers::add_vote`] |
//! | `updateVote` | [`Resolvers::update_vote`] |
//! | `deleteVote` | [`Resolvers::delete_vote`] |
//!
//! Field resolvers (`post.comment`, `post.vote`, `post.subreddit`, `subreddit.post`) are only
//! invoked when a caller asks for the field. [`Resolvers::resolve_post_graph`] resolves the three
//! post fields at once.
//!
//! Every write derives its keys via [`crate::keys`]. The acting user is always passed explicitly.

use crate::error::{ErrorKind, is_kind};
use crate::keys::ItemKeys;
use crate::store::{Condition, Item, ItemStore, from_item, to_item};
use crate::tools::clock::Clock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

mod comment;
mod post;
mod subreddit;
mod vote;

pub use post::{NewPost, PostGraph, Submission};

/// Entry point for all operations. Cheap to clone.
#[derive(Clone)]
pub struct Resolvers {
    store: Arc<dyn ItemStore>,
    clock: Clock,
}

impl Resolvers {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Resolvers {
            store,
            clock: Clock::system(),
        }
    }

    /// Replaces the time source used to stamp new entities.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &dyn ItemStore {
        self.store.as_ref()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Puts a new entity, failing with `ConditionFailed` if its primary key is already taken.
    ///
    /// A put which was applied but reported as failed is retried by the store and then runs into
    /// its own item. Finding exactly the entity being written therefore counts as success.
    async fn insert<T>(&self, entity: &T, keys: &ItemKeys) -> anyhow::Result<()>
    where
        T: Serialize + DeserializeOwned + PartialEq + Sync,
    {
        let item = keyed_item(entity, keys)?;
        match self.store().put_item(item, Some(Condition::ItemMissing)).await {
            Err(err) if is_kind(&err, ErrorKind::ConditionFailed) => {
                let stored = self.store().get_item(&keys.primary).await?;
                match stored.map(from_item::<T>).transpose()? {
                    Some(stored) if stored == *entity => {
                        tracing::debug!(
                            "Item {}/{} was already written by an earlier attempt",
                            keys.primary.pk,
                            keys.primary.sk
                        );
                        Ok(())
                    }
                    _ => Err(err),
                }
            }
            result => result,
        }
    }
}

/// Serializes an entity and attaches all of its keys.
fn keyed_item<T: Serialize>(entity: &T, keys: &ItemKeys) -> anyhow::Result<Item> {
    let mut item = to_item(entity)?;
    keys.apply(&mut item);

    Ok(item)
}

#[cfg(test)]
pub mod test {
    use super::Resolvers;
    use crate::error::{ErrorKind, ForumError};
    use crate::keys::PrimaryKey;
    use crate::store::memory::MemoryItemStore;
    use crate::store::{
        Condition, IndexQuery, Item, ItemStore, Page, PageToken, RetryPolicy, RetryingStore,
        ScanFilter,
    };
    use crate::tools::clock::test::ticking_clock;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    pub fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Resolvers over an empty in-memory table with a clock ticking once per created entity.
    pub fn memory_resolvers() -> (Resolvers, Arc<MemoryItemStore>) {
        let store = Arc::new(MemoryItemStore::new());
        let resolvers = Resolvers::new(store.clone()).with_clock(ticking_clock(start()));

        (resolvers, store)
    }

    /// Applies the first put but reports it as failed, like a response lost in transit.
    pub struct LostFirstAck {
        pub inner: MemoryItemStore,
        lost: AtomicBool,
    }

    #[async_trait]
    impl ItemStore for LostFirstAck {
        async fn get_item(&self, key: &PrimaryKey) -> anyhow::Result<Option<Item>> {
            self.inner.get_item(key).await
        }

        async fn put_item(&self, item: Item, condition: Option<Condition>) -> anyhow::Result<()> {
            self.inner.put_item(item, condition).await?;
            if self.lost.swap(true, Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ForumError::new(ErrorKind::StoreUnavailable, "Connection reset").into())
            }
        }

        async fn update_item(
            &self,
            key: &PrimaryKey,
            attributes: Item,
            condition: Option<Condition>,
        ) -> anyhow::Result<Item> {
            self.inner.update_item(key, attributes, condition).await
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
            self.inner.scan_page(filter, start).await
        }
    }

    impl LostFirstAck {
        /// Arms the store so that the next put loses its acknowledgement.
        pub fn lose_next_ack(&self) {
            self.lost.store(false, Ordering::SeqCst);
        }
    }

    /// Resolvers over a retrying in-memory table which loses the acknowledgement of the first put.
    pub fn lost_ack_resolvers() -> (Resolvers, Arc<RetryingStore<LostFirstAck>>) {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        };
        let store = Arc::new(RetryingStore::new(
            LostFirstAck {
                inner: MemoryItemStore::new(),
                lost: AtomicBool::new(false),
            },
            policy,
        ));
        let resolvers = Resolvers::new(store.clone()).with_clock(ticking_clock(start()));

        (resolvers, store)
    }
}
