use crate::error::ErrorKind;
use crate::forum_bail;
use crate::keys::{self, Index, METADATA};
use crate::model::{Comment, Post, Subreddit, Vote};
use crate::resolver::Resolvers;
use crate::store::{IndexQuery, ScanFilter, collect_entities, from_item, query_all, scan_all};
use crate::tools::id_generator::generate_entity_id;
use crate::validation::{
    MAX_BODY_LENGTH, MAX_IMAGE_LENGTH, MAX_TITLE_LENGTH, validate_id, validate_str,
    validate_topic, validate_username,
};
use crate::votes::{VoteTally, tally};
use anyhow::Context;
use futures_util::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};

/// Number of post graphs resolved at the same time by [`Resolvers::resolve_post_graphs`].
const GRAPH_CONCURRENCY: usize = 8;

/// Input of `createPost`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewPost {
    pub subreddit_id: String,
    pub username: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub image: String,
}

impl NewPost {
    pub fn new(subreddit_id: &str, username: &str, title: &str) -> Self {
        NewPost {
            subreddit_id: subreddit_id.to_string(),
            username: username.to_string(),
            title: title.to_string(),
            body: String::new(),
            image: String::new(),
        }
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    fn validate(&self) -> anyhow::Result<()> {
        validate_id("subreddit_id", &self.subreddit_id)?;
        validate_username(&self.username)?;
        validate_str("title", &self.title, 1, MAX_TITLE_LENGTH)?;
        validate_str("body", &self.body, 0, MAX_BODY_LENGTH)?;
        validate_str("image", &self.image, 0, MAX_IMAGE_LENGTH)?;

        Ok(())
    }
}

/// A post submitted by topic rather than by subreddit id.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Submission {
    pub topic: String,
    pub username: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub image: String,
}

/// A post together with its resolved fields.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PostGraph {
    #[serde(flatten)]
    pub post: Post,
    /// Absent if the referenced subreddit no longer exists.
    pub subreddit: Option<Subreddit>,
    pub comments: Vec<Comment>,
    pub votes: Vec<Vote>,
    pub tally: VoteTally,
}

impl Resolvers {
    /// Returns every post by scanning the whole table. No order is guaranteed.
    ///
    /// The cost grows with the table, not with the number of posts.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn list_posts(&self) -> anyhow::Result<Vec<Post>> {
        collect_entities(scan_all(
            self.store(),
            ScanFilter::new(keys::post_key_prefix()).with_sk(METADATA),
        ))
        .await
        .context("Failed to list posts")
    }

    /// Returns the posts filed under the given topic, newest first.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn list_posts_by_topic(&self, topic: &str) -> anyhow::Result<Vec<Post>> {
        validate_topic(topic)?;

        let mut posts: Vec<Post> = collect_entities(query_all(
            self.store(),
            IndexQuery::new(Index::PostsByTopic, keys::topic_partition(topic)),
        ))
        .await
        .with_context(|| format!("Failed to list posts of topic '{}'", topic))?;
        posts.reverse();

        Ok(posts)
    }

    /// Fetches a post, failing with `NotFound` if it does not exist.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn get_post(&self, id: &str) -> anyhow::Result<Post> {
        match self.find_post(id).await? {
            Some(post) => Ok(post),
            None => forum_bail!(ErrorKind::NotFound, "Post '{}' does not exist", id),
        }
    }

    pub async fn find_post(&self, id: &str) -> anyhow::Result<Option<Post>> {
        validate_id("post_id", id)?;

        self.store()
            .get_item(&keys::post_key(id))
            .await
            .with_context(|| format!("Failed to read post '{}'", id))?
            .map(from_item)
            .transpose()
    }

    /// Field resolver `post.comment`: comments of the post, oldest first.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn post_comments(&self, post_id: &str) -> anyhow::Result<Vec<Comment>> {
        collect_entities(query_all(
            self.store(),
            IndexQuery::new(Index::CommentsByPost, keys::post_partition(post_id)),
        ))
        .await
        .with_context(|| format!("Failed to list comments of post '{}'", post_id))
    }

    /// Field resolver `post.vote`: votes of the post, ordered by username.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn post_votes(&self, post_id: &str) -> anyhow::Result<Vec<Vote>> {
        collect_entities(query_all(
            self.store(),
            IndexQuery::new(Index::VotesByPost, keys::post_partition(post_id)),
        ))
        .await
        .with_context(|| format!("Failed to list votes of post '{}'", post_id))
    }

    /// Field resolver `post.subreddit`. A dangling reference resolves to `None`.
    pub async fn post_subreddit(&self, post: &Post) -> anyhow::Result<Option<Subreddit>> {
        let subreddit = self.get_subreddit(&post.subreddit_id).await?;
        if subreddit.is_none() {
            tracing::warn!(
                "Post '{}' references missing subreddit '{}'",
                post.id,
                post.subreddit_id
            );
        }

        Ok(subreddit)
    }

    /// Resolves all fields of a post concurrently.
    #[tracing::instrument(level = "debug", skip(self, post), fields(post = %post.id), err(Display))]
    pub async fn resolve_post_graph(&self, post: Post) -> anyhow::Result<PostGraph> {
        let (subreddit, comments, votes) = tokio::try_join!(
            self.post_subreddit(&post),
            self.post_comments(&post.id),
            self.post_votes(&post.id)
        )?;
        let tally = tally(&votes);

        Ok(PostGraph {
            post,
            subreddit,
            comments,
            votes,
            tally,
        })
    }

    /// Resolves the graphs of several posts, keeping their order.
    pub async fn resolve_post_graphs(&self, posts: Vec<Post>) -> anyhow::Result<Vec<PostGraph>> {
        stream::iter(posts)
            .map(|post| self.resolve_post_graph(post))
            .buffered(GRAPH_CONCURRENCY)
            .try_collect()
            .await
    }

    /// Creates a post within an existing subreddit.
    ///
    /// The topic index key is computed from the subreddit's topic at this point in time.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn create_post(&self, new_post: NewPost) -> anyhow::Result<Post> {
        new_post.validate()?;

        let Some(subreddit) = self.get_subreddit(&new_post.subreddit_id).await? else {
            forum_bail!(
                ErrorKind::NotFound,
                "Subreddit '{}' does not exist",
                new_post.subreddit_id
            );
        };

        let post = Post {
            id: generate_entity_id(),
            title: new_post.title,
            body: new_post.body,
            image: new_post.image,
            username: new_post.username,
            subreddit_id: subreddit.id,
            created_at: self.now(),
        };

        self.insert(&post, &keys::post_keys(&post, &subreddit.topic))
            .await
            .with_context(|| format!("Failed to create post '{}'", post.id))?;

        tracing::info!(
            "Created post '{}' in subreddit '{}' ({})",
            post.id,
            post.subreddit_id,
            subreddit.topic
        );

        Ok(post)
    }

    /// Files a post under a topic, creating a subreddit for the topic if there is none yet.
    ///
    /// If several subreddits share the topic, the oldest one receives the post.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn submit_post(&self, submission: Submission) -> anyhow::Result<Post> {
        validate_topic(&submission.topic)?;

        let existing = self
            .get_subreddits_by_topic(&submission.topic)
            .await?
            .into_iter()
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let subreddit = match existing {
            Some(subreddit) => subreddit,
            None => self.create_subreddit_by_topic(&submission.topic).await?,
        };

        self.create_post(NewPost {
            subreddit_id: subreddit.id,
            username: submission.username,
            title: submission.title,
            body: submission.body,
            image: submission.image,
        })
        .await
    }
}
