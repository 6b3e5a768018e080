//! Storage gateway over a single key-value table.
//!
//! [`ItemStore`] is the narrow interface everything above the storage layer is written against:
//!
//! - [`memory::MemoryItemStore`] - In-process table used by tests and local runs
//! - [`dynamo::DynamoItemStore`] - DynamoDB backed table (feature `aws_dynamodb`)
//! - [`retry::RetryingStore`] - Decorator retrying transient faults with exponential backoff
//!
//! Items are plain JSON objects. Entities are converted with [`to_item`] and [`from_item`]; key
//! attributes are added by [`crate::keys`].
//!
//! Queries and scans are paginated: a single call returns one [`Page`] whose `next` token must be
//! passed back to continue. [`query_all`] and [`scan_all`] wrap this into lazy streams.

use crate::error::ResultExt;
use crate::keys::{ATTR_PK, ATTR_SK, Index, PrimaryKey};
use anyhow::Context;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::sync::Arc;

#[cfg(feature = "aws_dynamodb")]
pub mod dynamo;
pub mod memory;
pub mod retry;

pub use retry::{RetryPolicy, RetryingStore};

/// A stored item: attribute name to value.
pub type Item = Map<String, Value>;

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: i32 = 32;

/// Precondition on the current state of an item for a conditional write.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// No item with the given primary key exists.
    ItemMissing,
    /// An item with the given primary key exists.
    ItemExists,
    /// The item exists and the attribute has exactly the given value.
    AttributeEquals { name: String, value: Value },
    /// The item exists but does not carry the attribute.
    AttributeMissing { name: String },
}

impl Condition {
    pub fn attribute_equals(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::AttributeEquals {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn attribute_missing(name: impl Into<String>) -> Self {
        Condition::AttributeMissing { name: name.into() }
    }

    /// Evaluates the condition against the current item (if any).
    pub fn holds_for(&self, current: Option<&Item>) -> bool {
        match (self, current) {
            (Condition::ItemMissing, current) => current.is_none(),
            (Condition::ItemExists, current) => current.is_some(),
            (Condition::AttributeEquals { name, value }, Some(item)) => {
                item.get(name) == Some(value)
            }
            (Condition::AttributeMissing { name }, Some(item)) => !item.contains_key(name),
            (_, None) => false,
        }
    }
}

/// Query against one partition of a secondary index.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexQuery {
    pub index: Index,
    pub partition: String,
    /// Only items whose sort key starts with this prefix match.
    pub sort_prefix: Option<String>,
    pub page_size: i32,
}

impl IndexQuery {
    pub fn new(index: Index, partition: impl Into<String>) -> Self {
        IndexQuery {
            index,
            partition: partition.into(),
            sort_prefix: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_sort_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_prefix = Some(prefix.into());
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Filter applied to a full table scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanFilter {
    /// Only items whose `PK` starts with this prefix match.
    pub pk_prefix: String,
    /// Only items whose `SK` equals this value match.
    pub sk: Option<String>,
    pub page_size: i32,
}

impl ScanFilter {
    pub fn new(pk_prefix: impl Into<String>) -> Self {
        ScanFilter {
            pk_prefix: pk_prefix.into(),
            sk: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_sk(mut self, sk: impl Into<String>) -> Self {
        self.sk = Some(sk.into());
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        let pk_matches = item
            .get(ATTR_PK)
            .and_then(Value::as_str)
            .is_some_and(|pk| pk.starts_with(&self.pk_prefix));
        let sk_matches = match &self.sk {
            Some(expected) => item.get(ATTR_SK).and_then(Value::as_str) == Some(expected),
            None => true,
        };

        pk_matches && sk_matches
    }
}

/// Opaque continuation token: the key attributes of the last evaluated item.
#[derive(Clone, Debug, PartialEq)]
pub struct PageToken(pub Item);

/// One page of a query or scan.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub items: Vec<Item>,
    /// Present if more items may follow.
    pub next: Option<PageToken>,
}

/// Single-table key-value storage.
///
/// Errors are classified via [`crate::error::ErrorKind`]: conditional writes fail with
/// `ConditionFailed`, updates of absent items with `NotFound`, and infrastructure faults with
/// `StoreUnavailable` or `Throttled`.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Strongly consistent point read.
    async fn get_item(&self, key: &PrimaryKey) -> anyhow::Result<Option<Item>>;

    /// Inserts or replaces an item. The item must carry its `PK` and `SK` attributes.
    async fn put_item(&self, item: Item, condition: Option<Condition>) -> anyhow::Result<()>;

    /// Sets the given attributes of an existing item and returns the updated item.
    ///
    /// Fails with `NotFound` if the item does not exist and with `ConditionFailed` if it exists
    /// but the condition does not hold.
    async fn update_item(
        &self,
        key: &PrimaryKey,
        attributes: Item,
        condition: Option<Condition>,
    ) -> anyhow::Result<Item>;

    /// Deletes an item. Deleting an absent item is not an error.
    async fn delete_item(&self, key: &PrimaryKey) -> anyhow::Result<()>;

    /// Fetches one page of an index query, ordered by the index's sort key ascending.
    async fn query_page(
        &self,
        query: &IndexQuery,
        start: Option<PageToken>,
    ) -> anyhow::Result<Page>;

    /// Fetches one page of a full table scan.
    async fn scan_page(&self, filter: &ScanFilter, start: Option<PageToken>)
    -> anyhow::Result<Page>;
}

pub type ItemStream<'a> = Pin<Box<dyn Stream<Item = anyhow::Result<Item>> + Send + 'a>>;

enum PaginationState {
    Start,
    Continue(PageToken),
    End,
}

/// Streams every item matching the query, fetching pages lazily.
pub fn query_all<'a>(store: &'a dyn ItemStore, query: IndexQuery) -> ItemStream<'a> {
    paginate(move |start| {
        let query = query.clone();
        async move { store.query_page(&query, start).await }
    })
}

/// Streams every item matching the filter, fetching pages lazily.
pub fn scan_all<'a>(store: &'a dyn ItemStore, filter: ScanFilter) -> ItemStream<'a> {
    paginate(move |start| {
        let filter = filter.clone();
        async move { store.scan_page(&filter, start).await }
    })
}

fn paginate<'a, F, Fut>(fetch: F) -> ItemStream<'a>
where
    F: Fn(Option<PageToken>) -> Fut + Send + Sync + 'a,
    Fut: Future<Output = anyhow::Result<Page>> + Send + 'a,
{
    let fetch = Arc::new(fetch);
    let pages = futures_util::stream::try_unfold(PaginationState::Start, move |state| {
        let fetch = fetch.clone();
        async move {
            let start = match state {
                PaginationState::Start => None,
                PaginationState::Continue(token) => Some(token),
                PaginationState::End => return Ok::<_, anyhow::Error>(None),
            };

            let page = fetch(start).await?;

            // A filtered page may be empty and still be followed by matches.
            let next_state = match page.next {
                Some(token) => PaginationState::Continue(token),
                None => PaginationState::End,
            };

            Ok(Some((page.items, next_state)))
        }
    });

    pages
        .map_ok(|items| futures_util::stream::iter(items.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
}

/// Serializes an entity into an item (without key attributes).
pub fn to_item<T: Serialize>(entity: &T) -> anyhow::Result<Item> {
    match serde_json::to_value(entity).context("Failed to serialize entity into an item")? {
        Value::Object(item) => Ok(item),
        other => anyhow::bail!("Entities must serialize into an object, got: {}", other),
    }
}

/// Deserializes an item into an entity, ignoring key attributes.
pub fn from_item<T: DeserializeOwned>(item: Item) -> anyhow::Result<T> {
    serde_json::from_value(Value::Object(item)).context("Failed to deserialize item into an entity")
}

/// Collects all items of a stream into entities.
pub async fn collect_entities<T: DeserializeOwned>(stream: ItemStream<'_>) -> anyhow::Result<Vec<T>> {
    stream
        .and_then(|item| async move { from_item::<T>(item) })
        .try_collect()
        .await
}

/// Ensures that an item carries the string attributes of its primary key.
pub fn require_primary_key(item: &Item) -> anyhow::Result<PrimaryKey> {
    PrimaryKey::of_item(item)
        .context("Items must carry string 'PK' and 'SK' attributes")
        .mark_invalid()
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: Value) -> Item {
        match value {
            Value::Object(item) => item,
            _ => unreachable!(),
        }
    }

    #[test]
    fn conditions_evaluate_against_current_item() {
        let current = item(json!({"PK": "POST#p1", "SK": "METADATA", "GSI1PK": "SUBREDDIT#go"}));

        assert!(Condition::ItemMissing.holds_for(None));
        assert!(!Condition::ItemMissing.holds_for(Some(&current)));
        assert!(Condition::ItemExists.holds_for(Some(&current)));
        assert!(!Condition::ItemExists.holds_for(None));
        assert!(Condition::attribute_equals("GSI1PK", "SUBREDDIT#go").holds_for(Some(&current)));
        assert!(!Condition::attribute_equals("GSI1PK", "SUBREDDIT#rust").holds_for(Some(&current)));
        assert!(!Condition::attribute_equals("GSI1PK", "SUBREDDIT#go").holds_for(None));
        assert!(Condition::attribute_missing("GSI2PK").holds_for(Some(&current)));
        assert!(!Condition::attribute_missing("GSI1PK").holds_for(Some(&current)));
        assert!(!Condition::attribute_missing("GSI1PK").holds_for(None));
    }

    #[test]
    fn scan_filter_matches_prefix_and_sort_key() {
        let filter = ScanFilter::new("POST#").with_sk("METADATA");

        assert!(filter.matches(&item(json!({"PK": "POST#p1", "SK": "METADATA"}))));
        assert!(!filter.matches(&item(json!({"PK": "POST#p1", "SK": "OTHER"}))));
        assert!(!filter.matches(&item(json!({"PK": "SUBREDDIT#s1", "SK": "METADATA"}))));
        assert!(!filter.matches(&item(json!({"SK": "METADATA"}))));
    }

    #[test]
    fn entities_round_trip_ignoring_key_attributes() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Entity {
            id: String,
        }

        let mut stored = to_item(&Entity { id: "e1".to_string() }).unwrap();
        stored.insert("PK".to_string(), json!("ENTITY#e1"));

        assert_eq!(
            from_item::<Entity>(stored).unwrap(),
            Entity { id: "e1".to_string() }
        );
    }

    #[test]
    fn require_primary_key_rejects_incomplete_items() {
        let err = require_primary_key(&item(json!({"PK": "POST#p1"}))).unwrap_err();
        assert_eq!(
            crate::error::kind_of(&err),
            Some(crate::error::ErrorKind::Validation)
        );
    }
}
