use crate::keys;
use crate::model::Comment;
use crate::resolver::Resolvers;
use crate::tools::id_generator::generate_entity_id;
use crate::validation::{MAX_COMMENT_LENGTH, validate_str, validate_username};
use anyhow::Context;

impl Resolvers {
    /// Adds a comment to an existing post.
    #[tracing::instrument(level = "debug", skip(self, text), err(Display))]
    pub async fn add_comment(
        &self,
        username: &str,
        post_id: &str,
        text: &str,
    ) -> anyhow::Result<Comment> {
        validate_username(username)?;
        validate_str("text", text, 1, MAX_COMMENT_LENGTH)?;

        // No orphans: the post must exist.
        let post = self.get_post(post_id).await?;

        let comment = Comment {
            id: generate_entity_id(),
            post_id: post.id,
            username: username.to_string(),
            text: text.to_string(),
            created_at: self.now(),
        };

        self.insert(&comment, &keys::comment_keys(&comment))
            .await
            .with_context(|| format!("Failed to add comment to post '{}'", post_id))?;

        Ok(comment)
    }
}
