//! Vote state machine: one vote per user and post, which can be cast, flipped and retracted.
//!
//! | Current   | Cast    | Action  | Next      |
//! |-----------|---------|---------|-----------|
//! | NoVote    | up      | create  | Upvoted   |
//! | NoVote    | down    | create  | Downvoted |
//! | Upvoted   | up      | retract | NoVote    |
//! | Upvoted   | down    | flip    | Downvoted |
//! | Downvoted | down    | retract | NoVote    |
//! | Downvoted | up      | flip    | Upvoted   |
//!
//! The current state is read via the deterministic [`VoteId`](crate::model::VoteId) of the pair.
//! Creation only succeeds if no vote exists yet and flipping only if one still exists, so two
//! concurrent casts never produce a second vote item. A cast that loses such a race re-reads the
//! state and plans again.

use crate::error::{ErrorKind, is_kind};
use crate::forum_bail;
use crate::model::Vote;
use crate::resolver::Resolvers;
use serde::Serialize;

/// Number of read-plan-write rounds before a cast gives up.
pub const MAX_CAST_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteState {
    NoVote,
    Upvoted,
    Downvoted,
}

impl VoteState {
    pub fn of(vote: Option<&Vote>) -> Self {
        match vote {
            None => VoteState::NoVote,
            Some(vote) if vote.upvote => VoteState::Upvoted,
            Some(_) => VoteState::Downvoted,
        }
    }
}

/// The write needed to get from one state to the next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Create { upvote: bool },
    Flip { upvote: bool },
    Retract,
}

impl Transition {
    pub fn target(self) -> VoteState {
        match self {
            Transition::Create { upvote } | Transition::Flip { upvote } if upvote => {
                VoteState::Upvoted
            }
            Transition::Create { .. } | Transition::Flip { .. } => VoteState::Downvoted,
            Transition::Retract => VoteState::NoVote,
        }
    }
}

/// Determines the transition for casting `upvote` in the given state.
pub fn plan(current: VoteState, upvote: bool) -> Transition {
    match (current, upvote) {
        (VoteState::NoVote, upvote) => Transition::Create { upvote },
        (VoteState::Upvoted, true) | (VoteState::Downvoted, false) => Transition::Retract,
        (VoteState::Upvoted, false) | (VoteState::Downvoted, true) => Transition::Flip { upvote },
    }
}

/// Result of a cast.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CastOutcome {
    pub previous: VoteState,
    pub current: VoteState,
    /// The vote after the cast, absent if it was retracted.
    pub vote: Option<Vote>,
}

/// Casts a vote of the user on the post, applying the transition table.
#[tracing::instrument(level = "debug", skip(resolvers), err(Display))]
pub async fn cast(
    resolvers: &Resolvers,
    username: &str,
    post_id: &str,
    upvote: bool,
) -> anyhow::Result<CastOutcome> {
    for attempt in 1..=MAX_CAST_ATTEMPTS {
        let existing = resolvers.find_vote(username, post_id).await?;
        let previous = VoteState::of(existing.as_ref());
        let transition = plan(previous, upvote);

        let result = match (&existing, transition) {
            (Some(vote), Transition::Flip { upvote }) => {
                resolvers.update_vote(&vote.id, upvote).await.map(Some)
            }
            (Some(vote), Transition::Retract) => {
                resolvers.delete_vote(&vote.id).await.map(|_| None)
            }
            _ => resolvers
                .add_vote(username, post_id, upvote)
                .await
                .map(Some),
        };

        match result {
            Ok(vote) => {
                return Ok(CastOutcome {
                    previous,
                    current: transition.target(),
                    vote,
                });
            }
            Err(err)
                if is_kind(&err, ErrorKind::ConditionFailed)
                    || (is_kind(&err, ErrorKind::NotFound)
                        && matches!(transition, Transition::Flip { .. })) =>
            {
                tracing::debug!(
                    attempt,
                    "Vote of '{}' on '{}' changed concurrently: {:#}",
                    username,
                    post_id,
                    err
                );
            }
            Err(err) => return Err(err),
        }
    }

    forum_bail!(
        ErrorKind::ConditionFailed,
        "Vote of '{}' on post '{}' kept changing concurrently",
        username,
        post_id
    );
}

/// Summary of the votes of a post.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VoteTally {
    pub upvotes: usize,
    pub downvotes: usize,
    /// `upvotes - downvotes`
    pub score: i64,
}

pub fn tally(votes: &[Vote]) -> VoteTally {
    let upvotes = votes.iter().filter(|vote| vote.upvote).count();
    let downvotes = votes.len() - upvotes;

    VoteTally {
        upvotes,
        downvotes,
        score: upvotes as i64 - downvotes as i64,
    }
}
