//! Entities of the forum as seen by callers of the resolver layer.
//!
//! Attribute names follow the table's wire format (`snake_case`). Key attributes (`PK`, `SK`,
//! `GSI*`) are not part of the entities; they are derived by [`crate::keys`] on write and ignored
//! on read.

use crate::error::{ErrorKind, ResultExt};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A topic community.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subreddit {
    pub id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

/// A post within a subreddit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Opaque URL of an uploaded image, empty if there is none.
    #[serde(default)]
    pub image: String,
    /// Author.
    pub username: String,
    pub subreddit_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub username: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub post_id: String,
    pub username: String,
    pub upvote: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of deleting a vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedVote {
    pub id: VoteId,
}

/// Number of hex characters of the username digest embedded in a [`VoteId`].
const USER_DIGEST_LENGTH: usize = 32;

/// Identity of a vote: `<post_id>.<digest of username>`.
///
/// The id is a pure function of `(post_id, username)`, so a user can only ever hold one vote
/// item per post and the vote can be addressed without scanning the post's votes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoteId {
    post_id: String,
    user_digest: String,
}

impl VoteId {
    pub fn derive(post_id: &str, username: &str) -> Self {
        let digest = Sha256::digest(username.as_bytes());
        let mut user_digest = String::with_capacity(USER_DIGEST_LENGTH);
        for byte in digest.iter().take(USER_DIGEST_LENGTH / 2) {
            user_digest.push_str(&format!("{:02x}", byte));
        }

        VoteId {
            post_id: post_id.to_string(),
            user_digest,
        }
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn user_digest(&self) -> &str {
        &self.user_digest
    }
}

impl Display for VoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.post_id, self.user_digest)
    }
}

impl FromStr for VoteId {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (post_id, user_digest) = value
            .rsplit_once('.')
            .with_context(|| format!("'{}' is not a valid vote id", value))
            .mark_invalid()?;

        if post_id.is_empty()
            || post_id.contains('#')
            || user_digest.len() != USER_DIGEST_LENGTH
            || !user_digest.chars().all(|c| c.is_ascii_hexdigit())
        {
            crate::forum_bail!(ErrorKind::Validation, "'{}' is not a valid vote id", value);
        }

        Ok(VoteId {
            post_id: post_id.to_string(),
            user_digest: user_digest.to_string(),
        })
    }
}

impl TryFrom<String> for VoteId {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VoteId> for String {
    fn from(id: VoteId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;

    #[test]
    fn vote_id_is_deterministic_per_post_and_user() {
        assert_eq!(VoteId::derive("p1", "alice"), VoteId::derive("p1", "alice"));
        assert_ne!(VoteId::derive("p1", "alice"), VoteId::derive("p1", "bob"));
        assert_ne!(VoteId::derive("p1", "alice"), VoteId::derive("p2", "alice"));
    }

    #[test]
    fn vote_id_parses_its_own_rendering() {
        let id = VoteId::derive("P1", "Jane Doe#1");
        let rendered = id.to_string();

        assert!(rendered.starts_with("P1."));
        assert_eq!(rendered.parse::<VoteId>().unwrap(), id);
    }

    #[test]
    fn vote_ids_of_dotted_post_ids_parse() {
        let id = VoteId::derive("v1.2.release", "alice");

        let parsed = id.to_string().parse::<VoteId>().unwrap();
        assert_eq!(parsed.post_id(), "v1.2.release");
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_vote_ids_are_validation_errors() {
        for candidate in ["", "nodot", ".abc", "p1.xyz", "p#1.0123456789abcdef0123456789abcdef"] {
            let err = candidate.parse::<VoteId>().unwrap_err();
            assert_eq!(kind_of(&err), Some(ErrorKind::Validation), "{}", candidate);
        }
    }

    #[test]
    fn vote_serializes_id_as_string() {
        let vote = Vote {
            id: VoteId::derive("p1", "alice"),
            post_id: "p1".to_string(),
            username: "alice".to_string(),
            upvote: true,
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
        };

        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["id"], serde_json::json!(vote.id.to_string()));
        assert_eq!(serde_json::from_value::<Vote>(json).unwrap(), vote);
    }
}
