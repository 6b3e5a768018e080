use crate::keys;
use crate::model::{DeletedVote, Vote, VoteId};
use crate::resolver::Resolvers;
use crate::store::{Condition, Item, from_item};
use crate::validation::{validate_id, validate_username};
use anyhow::Context;
use serde_json::Value;

impl Resolvers {
    /// Records a new vote of the user on an existing post.
    ///
    /// Fails with `ConditionFailed` if the user already voted on the post.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn add_vote(
        &self,
        username: &str,
        post_id: &str,
        upvote: bool,
    ) -> anyhow::Result<Vote> {
        validate_username(username)?;
        let post = self.get_post(post_id).await?;

        let vote = Vote {
            id: VoteId::derive(&post.id, username),
            post_id: post.id,
            username: username.to_string(),
            upvote,
            created_at: self.now(),
        };

        self.insert(&vote, &keys::vote_keys(&vote))
            .await
            .with_context(|| format!("Failed to add vote of '{}' to post '{}'", username, post_id))?;

        Ok(vote)
    }

    /// Changes the direction of an existing vote. Fails with `NotFound` if there is none.
    #[tracing::instrument(level = "debug", skip(self), fields(id = %id), err(Display))]
    pub async fn update_vote(&self, id: &VoteId, upvote: bool) -> anyhow::Result<Vote> {
        let mut attributes = Item::new();
        attributes.insert("upvote".to_string(), Value::Bool(upvote));

        let updated = self
            .store()
            .update_item(&keys::vote_key(id), attributes, Some(Condition::ItemExists))
            .await
            .with_context(|| format!("Failed to update vote '{}'", id))?;

        from_item(updated)
    }

    /// Removes a vote. Removing an absent vote succeeds as well.
    #[tracing::instrument(level = "debug", skip(self), fields(id = %id), err(Display))]
    pub async fn delete_vote(&self, id: &VoteId) -> anyhow::Result<DeletedVote> {
        self.store()
            .delete_item(&keys::vote_key(id))
            .await
            .with_context(|| format!("Failed to delete vote '{}'", id))?;

        Ok(DeletedVote { id: id.clone() })
    }

    /// Point read of the vote a user cast on a post, if any.
    pub async fn find_vote(&self, username: &str, post_id: &str) -> anyhow::Result<Option<Vote>> {
        validate_id("post_id", post_id)?;
        let id = VoteId::derive(post_id, username);

        self.store()
            .get_item(&keys::vote_key(&id))
            .await
            .with_context(|| format!("Failed to read vote '{}'", id))?
            .map(from_item)
            .transpose()
    }
}
