//! Player message handlers
//!
//! Joins, submissions and votes. These need no owner token.

use crate::protocol::Message;
use crate::state::AppState;
use crate::types::*;
use std::sync::Arc;

/// Add the participant, tell everyone else, and reply with the lobby snapshot
pub async fn handle_participant_joined(
    state: &Arc<AppState>,
    origin: &str,
    lobby_code: LobbyCode,
    name: ParticipantName,
) -> Vec<Message> {
    let game = reply_on_err!(state.join_participant(&lobby_code, &name).await);
    state.relay.to_others(origin, &Message::GameUpdate(game));
    state.snapshot(&lobby_code).await.unwrap_or_default()
}

pub async fn handle_submission_new(
    state: &Arc<AppState>,
    origin: &str,
    lobby_code: LobbyCode,
    submission: Submission,
) -> Vec<Message> {
    let merge = reply_on_err!(state.add_submission(&lobby_code, submission.clone()).await);
    if merge.should_relay() {
        state.relay.to_others(
            origin,
            &Message::SubmissionNew {
                lobby_code,
                submission,
            },
        );
    }
    Vec::new()
}

pub async fn handle_vote_new(
    state: &Arc<AppState>,
    origin: &str,
    lobby_code: LobbyCode,
    track_index: TrackIndex,
    vote: Vote,
) -> Vec<Message> {
    let merge = reply_on_err!(state.cast_vote(&lobby_code, track_index, vote.clone()).await);
    if merge.should_relay() {
        state.relay.to_others(
            origin,
            &Message::VoteNew {
                lobby_code,
                track_index,
                vote,
            },
        );
    } else {
        tracing::debug!(
            "Dropping vote by {} for track {} in lobby {}",
            vote.voter_name,
            track_index,
            lobby_code
        );
    }
    Vec::new()
}
