//! Key schema of the single forum table.
//!
//! Every item carries a primary key (`PK`, `SK`) whose prefix names the entity type, plus the
//! attributes of each secondary index it participates in:
//!
//! | Entity    | PK                             | SK         | Indexes |
//! |-----------|--------------------------------|------------|---------|
//! | Subreddit | `SUBREDDIT#<id>`               | `METADATA` | B       |
//! | Post      | `POST#<id>`                    | `METADATA` | A       |
//! | Comment   | `COMMENT#<post_id>#<id>`       | `METADATA` | D       |
//! | Vote      | `VOTE#<post_id>#<user digest>` | `METADATA` | C       |
//!
//! | Index | Partition               | Sort                   |
//! |-------|-------------------------|------------------------|
//! | A     | `SUBREDDIT#<topic>`     | `POST#<created_at>`    |
//! | B     | `TOPIC`                 | `SUBREDDIT#<id>`       |
//! | C     | `POST#<post_id>`        | `VOTE#<username>`      |
//! | D     | `POST#<post_id>`        | `COMMENT#<created_at>` |
//!
//! Both the resolvers (on write) and the backfill job (on repair) derive keys from here only.

use crate::model::{Comment, Post, Subreddit, Vote, VoteId};
use crate::store::Item;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

pub const ATTR_PK: &str = "PK";
pub const ATTR_SK: &str = "SK";

/// Sort key of every entity's own item.
pub const METADATA: &str = "METADATA";

const PREFIX_SUBREDDIT: &str = "SUBREDDIT#";
const PREFIX_POST: &str = "POST#";
const PREFIX_COMMENT: &str = "COMMENT#";
const PREFIX_VOTE: &str = "VOTE#";

/// Constant partition of Index B.
pub const TOPIC_PARTITION: &str = "TOPIC";

/// The secondary indexes of the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Index {
    /// A: posts of a topic by creation time.
    PostsByTopic,
    /// B: all subreddits.
    Subreddits,
    /// C: votes of a post by username.
    VotesByPost,
    /// D: comments of a post by creation time.
    CommentsByPost,
}

impl Index {
    pub const ALL: [Index; 4] = [
        Index::PostsByTopic,
        Index::Subreddits,
        Index::VotesByPost,
        Index::CommentsByPost,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Index::PostsByTopic => "GSI1",
            Index::Subreddits => "GSI2",
            Index::VotesByPost => "GSI3",
            Index::CommentsByPost => "GSI4",
        }
    }

    pub fn partition_attribute(self) -> &'static str {
        match self {
            Index::PostsByTopic => "GSI1PK",
            Index::Subreddits => "GSI2PK",
            Index::VotesByPost => "GSI3PK",
            Index::CommentsByPost => "GSI4PK",
        }
    }

    pub fn sort_attribute(self) -> &'static str {
        match self {
            Index::PostsByTopic => "GSI1SK",
            Index::Subreddits => "GSI2SK",
            Index::VotesByPost => "GSI3SK",
            Index::CommentsByPost => "GSI4SK",
        }
    }
}

/// Primary key of an item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimaryKey {
    pub pk: String,
    pub sk: String,
}

impl PrimaryKey {
    fn metadata(pk: String) -> Self {
        PrimaryKey {
            pk,
            sk: METADATA.to_string(),
        }
    }

    /// Reads the primary key attributes of a stored item.
    pub fn of_item(item: &Item) -> Option<Self> {
        Some(PrimaryKey {
            pk: item.get(ATTR_PK)?.as_str()?.to_string(),
            sk: item.get(ATTR_SK)?.as_str()?.to_string(),
        })
    }
}

/// Position of an item within one secondary index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexKey {
    pub index: Index,
    pub partition: String,
    pub sort: String,
}

/// All keys an entity is stored under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemKeys {
    pub primary: PrimaryKey,
    pub indexes: Vec<IndexKey>,
}

impl ItemKeys {
    /// Writes the key attributes into the given item, replacing previous values.
    pub fn apply(&self, item: &mut Item) {
        item.insert(ATTR_PK.to_string(), Value::String(self.primary.pk.clone()));
        item.insert(ATTR_SK.to_string(), Value::String(self.primary.sk.clone()));
        for key in &self.indexes {
            item.insert(
                key.index.partition_attribute().to_string(),
                Value::String(key.partition.clone()),
            );
            item.insert(
                key.index.sort_attribute().to_string(),
                Value::String(key.sort.clone()),
            );
        }
    }

    /// Returns the key of the given index, if the entity participates in it.
    pub fn index(&self, index: Index) -> Option<&IndexKey> {
        self.indexes.iter().find(|key| key.index == index)
    }
}

/// Renders a timestamp for use inside sort keys.
///
/// The fixed precision keeps the lexicographic order of the keys equal to the chronological one.
pub fn sortable_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Partition of Index A holding the posts of the given topic.
pub fn topic_partition(topic: &str) -> String {
    format!("{}{}", PREFIX_SUBREDDIT, topic)
}

/// Partition of Index C and D holding the votes and comments of the given post.
pub fn post_partition(post_id: &str) -> String {
    format!("{}{}", PREFIX_POST, post_id)
}

/// Common prefix of all post primary keys.
pub fn post_key_prefix() -> &'static str {
    PREFIX_POST
}

pub fn subreddit_key(id: &str) -> PrimaryKey {
    PrimaryKey::metadata(format!("{}{}", PREFIX_SUBREDDIT, id))
}

pub fn post_key(id: &str) -> PrimaryKey {
    PrimaryKey::metadata(format!("{}{}", PREFIX_POST, id))
}

pub fn comment_key(post_id: &str, id: &str) -> PrimaryKey {
    PrimaryKey::metadata(format!("{}{}#{}", PREFIX_COMMENT, post_id, id))
}

pub fn vote_key(id: &VoteId) -> PrimaryKey {
    PrimaryKey::metadata(format!(
        "{}{}#{}",
        PREFIX_VOTE,
        id.post_id(),
        id.user_digest()
    ))
}

pub fn subreddit_keys(subreddit: &Subreddit) -> ItemKeys {
    ItemKeys {
        primary: subreddit_key(&subreddit.id),
        indexes: vec![IndexKey {
            index: Index::Subreddits,
            partition: TOPIC_PARTITION.to_string(),
            sort: format!("{}{}", PREFIX_SUBREDDIT, subreddit.id),
        }],
    }
}

/// Keys of a post, given the current topic of its subreddit.
pub fn post_keys(post: &Post, topic: &str) -> ItemKeys {
    ItemKeys {
        primary: post_key(&post.id),
        indexes: vec![IndexKey {
            index: Index::PostsByTopic,
            partition: topic_partition(topic),
            sort: format!("{}{}", PREFIX_POST, sortable_timestamp(&post.created_at)),
        }],
    }
}

pub fn comment_keys(comment: &Comment) -> ItemKeys {
    ItemKeys {
        primary: comment_key(&comment.post_id, &comment.id),
        indexes: vec![IndexKey {
            index: Index::CommentsByPost,
            partition: post_partition(&comment.post_id),
            sort: format!(
                "{}{}",
                PREFIX_COMMENT,
                sortable_timestamp(&comment.created_at)
            ),
        }],
    }
}

pub fn vote_keys(vote: &Vote) -> ItemKeys {
    ItemKeys {
        primary: vote_key(&vote.id),
        indexes: vec![IndexKey {
            index: Index::VotesByPost,
            partition: post_partition(&vote.post_id),
            sort: format!("{}{}", PREFIX_VOTE, vote.username),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(timestamp: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(timestamp)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn post(id: &str, created_at: &str) -> Post {
        Post {
            id: id.to_string(),
            title: "Hello".to_string(),
            body: String::new(),
            image: String::new(),
            username: "alice".to_string(),
            subreddit_id: "s1".to_string(),
            created_at: at(created_at),
        }
    }

    #[test]
    fn post_index_a_uses_topic_not_subreddit_id() {
        let keys = post_keys(&post("p1", "2024-05-01T10:00:00Z"), "golang");

        assert_eq!(keys.primary, post_key("p1"));
        assert_eq!(keys.primary.pk, "POST#p1");
        assert_eq!(keys.primary.sk, "METADATA");

        let index = keys.index(Index::PostsByTopic).unwrap();
        assert_eq!(index.partition, "SUBREDDIT#golang");
        assert_eq!(index.sort, "POST#2024-05-01T10:00:00.000000Z");
    }

    #[test]
    fn sortable_timestamps_order_chronologically() {
        let earlier = sortable_timestamp(&at("2024-05-01T09:59:59.5Z"));
        let later = sortable_timestamp(&at("2024-05-01T10:00:00Z"));
        assert!(earlier < later);
    }

    #[test]
    fn subreddits_share_the_topic_partition() {
        let subreddit = Subreddit {
            id: "s1".to_string(),
            topic: "golang".to_string(),
            created_at: at("2024-05-01T10:00:00Z"),
        };
        let keys = subreddit_keys(&subreddit);

        assert_eq!(keys.primary.pk, "SUBREDDIT#s1");
        let index = keys.index(Index::Subreddits).unwrap();
        assert_eq!(index.partition, "TOPIC");
        assert_eq!(index.sort, "SUBREDDIT#s1");
    }

    #[test]
    fn comments_and_votes_are_grouped_by_post() {
        let comment = Comment {
            id: "c1".to_string(),
            post_id: "p1".to_string(),
            username: "bob".to_string(),
            text: "First!".to_string(),
            created_at: at("2024-05-01T10:00:00Z"),
        };
        let comment_keys = comment_keys(&comment);
        assert_eq!(comment_keys.primary.pk, "COMMENT#p1#c1");
        let index = comment_keys.index(Index::CommentsByPost).unwrap();
        assert_eq!(index.partition, "POST#p1");
        assert_eq!(index.sort, "COMMENT#2024-05-01T10:00:00.000000Z");

        let vote = Vote {
            id: VoteId::derive("p1", "bob"),
            post_id: "p1".to_string(),
            username: "bob".to_string(),
            upvote: true,
            created_at: at("2024-05-01T10:00:00Z"),
        };
        let vote_keys = vote_keys(&vote);
        assert_eq!(
            vote_keys.primary.pk,
            format!("VOTE#p1#{}", vote.id.user_digest())
        );
        let index = vote_keys.index(Index::VotesByPost).unwrap();
        assert_eq!(index.partition, "POST#p1");
        assert_eq!(index.sort, "VOTE#bob");
    }

    #[test]
    fn apply_writes_all_key_attributes() {
        let keys = post_keys(&post("p1", "2024-05-01T10:00:00Z"), "golang");
        let mut item = Item::new();
        keys.apply(&mut item);

        assert_eq!(item["PK"], "POST#p1");
        assert_eq!(item["SK"], "METADATA");
        assert_eq!(item["GSI1PK"], "SUBREDDIT#golang");
        assert!(item.contains_key("GSI1SK"));
        assert_eq!(PrimaryKey::of_item(&item), Some(post_key("p1")));
    }
}
