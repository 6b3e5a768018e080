use crate::keys::{self, Index, TOPIC_PARTITION};
use crate::model::{Post, Subreddit};
use crate::resolver::Resolvers;
use crate::store::{IndexQuery, collect_entities, from_item, query_all};
use crate::tools::id_generator::generate_entity_id;
use crate::validation::{validate_id, validate_topic};
use anyhow::Context;

impl Resolvers {
    /// Returns all subreddits carrying the given topic.
    ///
    /// Topics are not unique, so there may be any number of them.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn get_subreddits_by_topic(&self, topic: &str) -> anyhow::Result<Vec<Subreddit>> {
        validate_topic(topic)?;

        let subreddits = self.list_subreddits().await?;
        Ok(subreddits
            .into_iter()
            .filter(|subreddit| subreddit.topic == topic)
            .collect())
    }

    /// Returns every subreddit, ordered by id.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn list_subreddits(&self) -> anyhow::Result<Vec<Subreddit>> {
        collect_entities(query_all(
            self.store(),
            IndexQuery::new(Index::Subreddits, TOPIC_PARTITION),
        ))
        .await
        .context("Failed to list subreddits")
    }

    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn get_subreddit(&self, id: &str) -> anyhow::Result<Option<Subreddit>> {
        validate_id("subreddit_id", id)?;

        self.store()
            .get_item(&keys::subreddit_key(id))
            .await
            .with_context(|| format!("Failed to read subreddit '{}'", id))?
            .map(from_item)
            .transpose()
    }

    /// Creates a new subreddit. Does not check whether the topic is already taken.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn create_subreddit_by_topic(&self, topic: &str) -> anyhow::Result<Subreddit> {
        validate_topic(topic)?;

        let subreddit = Subreddit {
            id: generate_entity_id(),
            topic: topic.to_string(),
            created_at: self.now(),
        };

        self.insert(&subreddit, &keys::subreddit_keys(&subreddit))
            .await
            .with_context(|| format!("Failed to create subreddit for topic '{}'", topic))?;

        tracing::info!("Created subreddit '{}' for topic '{}'", subreddit.id, topic);

        Ok(subreddit)
    }

    /// Field resolver `subreddit.post`: the subreddit's posts, newest first.
    ///
    /// Posts are found via the topic index, so posts not yet repaired after a topic change show
    /// up under the old topic until the next backfill.
    #[tracing::instrument(level = "debug", skip(self, subreddit), fields(subreddit = %subreddit.id), err(Display))]
    pub async fn subreddit_posts(&self, subreddit: &Subreddit) -> anyhow::Result<Vec<Post>> {
        let posts = self.list_posts_by_topic(&subreddit.topic).await?;

        Ok(posts
            .into_iter()
            .filter(|post| post.subreddit_id == subreddit.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ErrorKind, kind_of};
    use crate::keys::subreddit_key;
    use crate::resolver::NewPost;
    use crate::resolver::test::{lost_ack_resolvers, memory_resolvers, start};
    use crate::store::ItemStore;

    #[tokio::test]
    async fn a_subreddit_whose_acknowledgement_was_lost_is_created_once() {
        let (resolvers, store) = lost_ack_resolvers();
        let subreddit = resolvers.create_subreddit_by_topic("golang").await.unwrap();

        assert_eq!(resolvers.list_subreddits().await.unwrap(), vec![subreddit]);
        assert_eq!(store.inner().inner.len().await, 1);
    }

    #[tokio::test]
    async fn created_subreddits_are_listed_and_found_by_topic() {
        let (resolvers, _) = memory_resolvers();
        let golang = resolvers.create_subreddit_by_topic("golang").await.unwrap();
        let rust = resolvers.create_subreddit_by_topic("rust").await.unwrap();
        assert_eq!(golang.created_at, start());

        let all = resolvers.list_subreddits().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.windows(2).all(|pair| pair[0].id < pair[1].id));

        let found = resolvers.get_subreddits_by_topic("rust").await.unwrap();
        assert_eq!(found, vec![rust]);
        assert_eq!(
            resolvers.get_subreddit(&golang.id).await.unwrap(),
            Some(golang)
        );
    }

    #[tokio::test]
    async fn topics_are_not_unique() {
        let (resolvers, _) = memory_resolvers();
        resolvers.create_subreddit_by_topic("golang").await.unwrap();
        resolvers.create_subreddit_by_topic("golang").await.unwrap();

        assert_eq!(
            resolvers
                .get_subreddits_by_topic("golang")
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn subreddit_items_carry_the_topic_index_keys() {
        let (resolvers, store) = memory_resolvers();
        let subreddit = resolvers.create_subreddit_by_topic("golang").await.unwrap();

        let item = store
            .get_item(&subreddit_key(&subreddit.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item["GSI2PK"], "TOPIC");
        assert_eq!(item["GSI2SK"], format!("SUBREDDIT#{}", subreddit.id));
        assert_eq!(item["topic"], "golang");
    }

    #[tokio::test]
    async fn invalid_topics_are_rejected() {
        let (resolvers, store) = memory_resolvers();

        let err = resolvers
            .create_subreddit_by_topic("go#lang")
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::Validation));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn subreddit_posts_only_lists_own_posts() {
        let (resolvers, _) = memory_resolvers();
        let first = resolvers.create_subreddit_by_topic("golang").await.unwrap();
        let second = resolvers.create_subreddit_by_topic("golang").await.unwrap();

        let post = resolvers
            .create_post(NewPost::new(&first.id, "alice", "Generics"))
            .await
            .unwrap();
        resolvers
            .create_post(NewPost::new(&second.id, "bob", "Channels"))
            .await
            .unwrap();

        assert_eq!(resolvers.subreddit_posts(&first).await.unwrap(), vec![post]);
    }

    #[tokio::test]
    async fn missing_subreddits_resolve_to_none() {
        let (resolvers, _) = memory_resolvers();
        assert_eq!(resolvers.get_subreddit("nope").await.unwrap(), None);
    }
}
