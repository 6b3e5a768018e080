//! In-process implementation of the storage gateway.
//!
//! Mirrors the semantics of the DynamoDB table closely enough to run the whole resolver layer,
//! the vote state machine and the backfill job without network access: conditional writes,
//! update-only-existing, idempotent deletes and paginated index queries and scans.

use crate::error::ErrorKind;
use crate::forum_bail;
use crate::keys::{ATTR_PK, ATTR_SK, PrimaryKey};
use crate::store::{
    Condition, IndexQuery, Item, ItemStore, Page, PageToken, ScanFilter, require_primary_key,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// A table held in memory, ordered by primary key.
#[derive(Default)]
pub struct MemoryItemStore {
    items: RwLock<BTreeMap<PrimaryKey, Item>>,
    writes: AtomicUsize,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful put, update and delete calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of items currently stored.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn token_for(key: &PrimaryKey, sort: Option<(&str, &str)>) -> PageToken {
        let mut token = Item::new();
        token.insert(ATTR_PK.to_string(), Value::String(key.pk.clone()));
        token.insert(ATTR_SK.to_string(), Value::String(key.sk.clone()));
        if let Some((attribute, value)) = sort {
            token.insert(attribute.to_string(), Value::String(value.to_string()));
        }

        PageToken(token)
    }

    fn token_key(token: &PageToken) -> anyhow::Result<PrimaryKey> {
        match PrimaryKey::of_item(&token.0) {
            Some(key) => Ok(key),
            None => forum_bail!(ErrorKind::Validation, "Malformed continuation token"),
        }
    }
}

fn str_attribute<'a>(item: &'a Item, name: &str) -> Option<&'a str> {
    item.get(name).and_then(Value::as_str)
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn get_item(&self, key: &PrimaryKey) -> anyhow::Result<Option<Item>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn put_item(&self, item: Item, condition: Option<Condition>) -> anyhow::Result<()> {
        let key = require_primary_key(&item)?;
        let mut items = self.items.write().await;

        if let Some(condition) = condition
            && !condition.holds_for(items.get(&key))
        {
            forum_bail!(
                ErrorKind::ConditionFailed,
                "Condition {:?} failed for {}/{}",
                condition,
                key.pk,
                key.sk
            );
        }

        items.insert(key, item);
        self.record_write();

        Ok(())
    }

    async fn update_item(
        &self,
        key: &PrimaryKey,
        attributes: Item,
        condition: Option<Condition>,
    ) -> anyhow::Result<Item> {
        if attributes.contains_key(ATTR_PK) || attributes.contains_key(ATTR_SK) {
            forum_bail!(ErrorKind::Validation, "Primary key attributes cannot be updated");
        }

        let mut items = self.items.write().await;
        let Some(current) = items.get_mut(key) else {
            forum_bail!(ErrorKind::NotFound, "No item exists for {}/{}", key.pk, key.sk);
        };

        if let Some(condition) = condition
            && !condition.holds_for(Some(&*current))
        {
            forum_bail!(
                ErrorKind::ConditionFailed,
                "Condition {:?} failed for {}/{}",
                condition,
                key.pk,
                key.sk
            );
        }

        current.extend(attributes);
        let updated = current.clone();
        self.record_write();

        Ok(updated)
    }

    async fn delete_item(&self, key: &PrimaryKey) -> anyhow::Result<()> {
        self.items.write().await.remove(key);
        self.record_write();

        Ok(())
    }

    async fn query_page(
        &self,
        query: &IndexQuery,
        start: Option<PageToken>,
    ) -> anyhow::Result<Page> {
        let partition_attribute = query.index.partition_attribute();
        let sort_attribute = query.index.sort_attribute();

        let after = match &start {
            Some(token) => Some((
                str_attribute(&token.0, sort_attribute)
                    .unwrap_or_default()
                    .to_string(),
                Self::token_key(token)?,
            )),
            None => None,
        };

        let items = self.items.read().await;
        let mut matches = items
            .iter()
            .filter(|(_, item)| {
                str_attribute(item, partition_attribute) == Some(query.partition.as_str())
            })
            .filter_map(|(key, item)| {
                let sort = str_attribute(item, sort_attribute)?;
                let prefix_matches = query
                    .sort_prefix
                    .as_deref()
                    .is_none_or(|prefix| sort.starts_with(prefix));
                prefix_matches.then(|| (sort.to_string(), key.clone(), item))
            })
            .collect::<Vec<_>>();
        matches.sort_by(|(sort_a, key_a, _), (sort_b, key_b, _)| {
            sort_a.cmp(sort_b).then_with(|| key_a.cmp(key_b))
        });

        let remaining = matches
            .into_iter()
            .filter(|(sort, key, _)| match &after {
                Some((after_sort, after_key)) => (sort, key) > (after_sort, after_key),
                None => true,
            })
            .collect::<Vec<_>>();

        let page_size = query.page_size.max(1) as usize;
        let has_more = remaining.len() > page_size;
        let page = remaining.into_iter().take(page_size).collect::<Vec<_>>();

        let next = if has_more {
            page.last().map(|(sort, key, _)| {
                Self::token_for(key, Some((sort_attribute, sort.as_str())))
            })
        } else {
            None
        };

        Ok(Page {
            items: page.into_iter().map(|(_, _, item)| item.clone()).collect(),
            next,
        })
    }

    async fn scan_page(
        &self,
        filter: &ScanFilter,
        start: Option<PageToken>,
    ) -> anyhow::Result<Page> {
        let after = match &start {
            Some(token) => Some(Self::token_key(token)?),
            None => None,
        };

        let items = self.items.read().await;
        let page_size = filter.page_size.max(1) as usize;

        // Like DynamoDB, the page size limits the evaluated items, not the matches.
        let evaluated = items
            .iter()
            .filter(|(key, _)| after.as_ref().is_none_or(|after| *key > after))
            .take(page_size + 1)
            .collect::<Vec<_>>();

        let has_more = evaluated.len() > page_size;
        let evaluated = &evaluated[..evaluated.len().min(page_size)];

        let next = if has_more {
            evaluated.last().map(|(key, _)| Self::token_for(key, None))
        } else {
            None
        };

        Ok(Page {
            items: evaluated
                .iter()
                .filter(|(_, item)| filter.matches(item))
                .map(|(_, item)| (*item).clone())
                .collect(),
            next,
        })
    }
}
