//! JSON endpoints of the forum below `/api/v1`.
//!
//! | Route | Operation |
//! |-------|-----------|
//! | `GET /api/v1/subreddits[?topic=t]` | all subreddits or those of a topic |
//! | `POST /api/v1/subreddits` | create a subreddit for a topic |
//! | `GET /api/v1/subreddits/{id}/posts` | posts of a subreddit, newest first |
//! | `GET /api/v1/posts[?topic=t]` | post graphs of all posts or those of a topic |
//! | `GET /api/v1/posts/{id}` | graph of a single post |
//! | `POST /api/v1/posts` | create a post in a subreddit |
//! | `POST /api/v1/submissions` | create a post by topic, creating the subreddit if needed |
//! | `POST /api/v1/comments` | comment on a post |
//! | `POST /api/v1/votes` | add a vote |
//! | `POST /api/v1/votes/cast` | cast a vote via the vote state machine |
//! | `PUT /api/v1/votes/{id}` | change the direction of a vote |
//! | `DELETE /api/v1/votes/{id}` | remove a vote |

use crate::error::ErrorKind;
use crate::forum_bail;
use crate::model::{DeletedVote, Post, Vote, VoteId};
use crate::resolver::{NewPost, PostGraph, Resolvers, Submission};
use crate::routes;
use crate::votes;
use crate::web::DEFAULT_MAX_JSON_BODY_SIZE;
use crate::web::warp::{
    into_response, into_response_with_status, with_body_as_json, with_cloneable,
};
use serde::Deserialize;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection};

#[derive(Debug, Default, Deserialize)]
struct TopicFilter {
    topic: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewSubreddit {
    topic: String,
}

#[derive(Debug, Deserialize)]
struct NewComment {
    username: String,
    post_id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct NewVote {
    username: String,
    post_id: String,
    upvote: bool,
}

#[derive(Debug, Deserialize)]
struct VoteDirection {
    upvote: bool,
}

/// Combines all forum endpoints into a single filter.
pub fn forum_routes(resolvers: Resolvers) -> BoxedFilter<(impl warp::Reply,)> {
    let api = warp::path("api").and(warp::path("v1"));
    let with_resolvers = with_cloneable(resolvers);

    let list_subreddits = warp::path!("subreddits")
        .and(warp::get())
        .and(with_resolvers.clone())
        .and(warp::query::<TopicFilter>())
        .and_then(handle_list_subreddits);
    let create_subreddit = warp::path!("subreddits")
        .and(warp::post())
        .and(with_resolvers.clone())
        .and(with_body_as_json(DEFAULT_MAX_JSON_BODY_SIZE))
        .and_then(handle_create_subreddit);
    let subreddit_posts = warp::path!("subreddits" / String / "posts")
        .and(warp::get())
        .and(with_resolvers.clone())
        .and_then(handle_subreddit_posts);

    let list_posts = warp::path!("posts")
        .and(warp::get())
        .and(with_resolvers.clone())
        .and(warp::query::<TopicFilter>())
        .and_then(handle_list_posts);
    let get_post = warp::path!("posts" / String)
        .and(warp::get())
        .and(with_resolvers.clone())
        .and_then(handle_get_post);
    let create_post = warp::path!("posts")
        .and(warp::post())
        .and(with_resolvers.clone())
        .and(with_body_as_json(DEFAULT_MAX_JSON_BODY_SIZE))
        .and_then(handle_create_post);
    let submit_post = warp::path!("submissions")
        .and(warp::post())
        .and(with_resolvers.clone())
        .and(with_body_as_json(DEFAULT_MAX_JSON_BODY_SIZE))
        .and_then(handle_submit_post);

    let add_comment = warp::path!("comments")
        .and(warp::post())
        .and(with_resolvers.clone())
        .and(with_body_as_json(DEFAULT_MAX_JSON_BODY_SIZE))
        .and_then(handle_add_comment);

    let add_vote = warp::path!("votes")
        .and(warp::post())
        .and(with_resolvers.clone())
        .and(with_body_as_json(DEFAULT_MAX_JSON_BODY_SIZE))
        .and_then(handle_add_vote);
    let cast_vote = warp::path!("votes" / "cast")
        .and(warp::post())
        .and(with_resolvers.clone())
        .and(with_body_as_json(DEFAULT_MAX_JSON_BODY_SIZE))
        .and_then(handle_cast_vote);
    let update_vote = warp::path!("votes" / String)
        .and(warp::put())
        .and(with_resolvers.clone())
        .and(with_body_as_json(DEFAULT_MAX_JSON_BODY_SIZE))
        .and_then(handle_update_vote);
    let delete_vote = warp::path!("votes" / String)
        .and(warp::delete())
        .and(with_resolvers)
        .and_then(handle_delete_vote);

    api.and(routes![
        list_subreddits,
        create_subreddit,
        subreddit_posts,
        list_posts,
        get_post,
        create_post,
        submit_post,
        add_comment,
        add_vote,
        cast_vote,
        update_vote,
        delete_vote
    ])
    .boxed()
}

fn created<S: serde::Serialize>(result: anyhow::Result<S>) -> Result<Response, Rejection> {
    into_response_with_status(result.map(|data| (StatusCode::CREATED, data)))
}

#[tracing::instrument(level = "debug", name = "GET /api/v1/subreddits", skip(resolvers))]
async fn handle_list_subreddits(
    resolvers: Resolvers,
    filter: TopicFilter,
) -> Result<Response, Rejection> {
    into_response(match filter.topic {
        Some(topic) => resolvers.get_subreddits_by_topic(&topic).await,
        None => resolvers.list_subreddits().await,
    })
}

#[tracing::instrument(level = "debug", name = "POST /api/v1/subreddits", skip(resolvers))]
async fn handle_create_subreddit(
    resolvers: Resolvers,
    input: NewSubreddit,
) -> Result<Response, Rejection> {
    created(resolvers.create_subreddit_by_topic(&input.topic).await)
}

#[tracing::instrument(level = "debug", name = "GET /api/v1/subreddits/{id}/posts", skip(resolvers))]
async fn handle_subreddit_posts(id: String, resolvers: Resolvers) -> Result<Response, Rejection> {
    into_response(subreddit_posts(&resolvers, &id).await)
}

async fn subreddit_posts(resolvers: &Resolvers, id: &str) -> anyhow::Result<Vec<Post>> {
    let Some(subreddit) = resolvers.get_subreddit(id).await? else {
        forum_bail!(ErrorKind::NotFound, "Subreddit '{}' does not exist", id);
    };

    resolvers.subreddit_posts(&subreddit).await
}

#[tracing::instrument(level = "debug", name = "GET /api/v1/posts", skip(resolvers))]
async fn handle_list_posts(
    resolvers: Resolvers,
    filter: TopicFilter,
) -> Result<Response, Rejection> {
    into_response(post_graphs(&resolvers, filter.topic.as_deref()).await)
}

async fn post_graphs(resolvers: &Resolvers, topic: Option<&str>) -> anyhow::Result<Vec<PostGraph>> {
    let posts = match topic {
        Some(topic) => resolvers.list_posts_by_topic(topic).await?,
        None => resolvers.list_posts().await?,
    };

    resolvers.resolve_post_graphs(posts).await
}

#[tracing::instrument(level = "debug", name = "GET /api/v1/posts/{id}", skip(resolvers))]
async fn handle_get_post(id: String, resolvers: Resolvers) -> Result<Response, Rejection> {
    into_response(post_graph(&resolvers, &id).await)
}

async fn post_graph(resolvers: &Resolvers, id: &str) -> anyhow::Result<PostGraph> {
    let post = resolvers.get_post(id).await?;
    resolvers.resolve_post_graph(post).await
}

#[tracing::instrument(level = "debug", name = "POST /api/v1/posts", skip_all)]
async fn handle_create_post(
    resolvers: Resolvers,
    new_post: NewPost,
) -> Result<Response, Rejection> {
    created(resolvers.create_post(new_post).await)
}

#[tracing::instrument(level = "debug", name = "POST /api/v1/submissions", skip_all)]
async fn handle_submit_post(
    resolvers: Resolvers,
    submission: Submission,
) -> Result<Response, Rejection> {
    created(resolvers.submit_post(submission).await)
}

#[tracing::instrument(level = "debug", name = "POST /api/v1/comments", skip_all)]
async fn handle_add_comment(
    resolvers: Resolvers,
    input: NewComment,
) -> Result<Response, Rejection> {
    created(
        resolvers
            .add_comment(&input.username, &input.post_id, &input.text)
            .await,
    )
}

#[tracing::instrument(level = "debug", name = "POST /api/v1/votes", skip(resolvers))]
async fn handle_add_vote(resolvers: Resolvers, input: NewVote) -> Result<Response, Rejection> {
    created(
        resolvers
            .add_vote(&input.username, &input.post_id, input.upvote)
            .await,
    )
}

#[tracing::instrument(level = "debug", name = "POST /api/v1/votes/cast", skip(resolvers))]
async fn handle_cast_vote(resolvers: Resolvers, input: NewVote) -> Result<Response, Rejection> {
    into_response(votes::cast(&resolvers, &input.username, &input.post_id, input.upvote).await)
}

#[tracing::instrument(level = "debug", name = "PUT /api/v1/votes/{id}", skip(resolvers))]
async fn handle_update_vote(
    id: String,
    resolvers: Resolvers,
    input: VoteDirection,
) -> Result<Response, Rejection> {
    into_response(update_vote(&resolvers, &id, input.upvote).await)
}

async fn update_vote(resolvers: &Resolvers, id: &str, upvote: bool) -> anyhow::Result<Vote> {
    let id: VoteId = id.parse()?;
    resolvers.update_vote(&id, upvote).await
}

#[tracing::instrument(level = "debug", name = "DELETE /api/v1/votes/{id}", skip(resolvers))]
async fn handle_delete_vote(id: String, resolvers: Resolvers) -> Result<Response, Rejection> {
    into_response(delete_vote(&resolvers, &id).await)
}

async fn delete_vote(resolvers: &Resolvers, id: &str) -> anyhow::Result<DeletedVote> {
    let id: VoteId = id.parse()?;
    resolvers.delete_vote(&id).await
}
