//! WebSocket message dispatch
//!
//! Decodes a frame and routes it to the presenter or player handlers. Each
//! handler applies the message to the session store, re-emits it to the
//! other connections and returns replies meant only for the sender.

use crate::protocol::{decode, Decoded, Frame, Message};
use crate::state::AppState;
use std::sync::Arc;

use super::{player, presenter};

/// Handle one raw text frame and return replies for the sender
pub async fn handle_text(text: &str, origin: &str, state: &Arc<AppState>) -> Vec<Message> {
    match decode(text) {
        Ok(Decoded::Frame(frame)) => handle_frame(frame, origin, state).await,
        Ok(Decoded::Passthrough { kind }) => {
            tracing::debug!("Forwarding unknown message type {} from {}", kind, origin);
            state.relay.forward_raw(origin, text);
            Vec::new()
        }
        Err(e) => {
            tracing::debug!("Dropping malformed frame from {}: {}", origin, e);
            Vec::new()
        }
    }
}

/// Handle a decoded frame and return replies for the sender
pub async fn handle_frame(frame: Frame, origin: &str, state: &Arc<AppState>) -> Vec<Message> {
    let token = frame.owner_token.as_deref();
    match frame.message {
        // Presenter writes (owner token checked by the session store)
        Message::GameUpdate(game) => {
            presenter::handle_game_state(state, origin, game, token, false).await
        }
        Message::GameStart(game) => {
            presenter::handle_game_state(state, origin, game, token, true).await
        }
        Message::TrackNext {
            lobby_code,
            new_index,
        } => presenter::handle_track_next(state, origin, lobby_code, new_index, token).await,
        Message::SubmissionBulk {
            lobby_code,
            submissions,
        } => presenter::handle_submission_bulk(state, origin, lobby_code, submissions, token).await,
        Message::VotesBulk { lobby_code, votes } => {
            presenter::handle_votes_bulk(state, origin, lobby_code, votes, token).await
        }

        // Player messages
        Message::ParticipantJoined { name, lobby_code } => {
            player::handle_participant_joined(state, origin, lobby_code, name).await
        }
        Message::SubmissionNew {
            lobby_code,
            submission,
        } => player::handle_submission_new(state, origin, lobby_code, submission).await,
        Message::VoteNew {
            lobby_code,
            track_index,
            vote,
        } => player::handle_vote_new(state, origin, lobby_code, track_index, vote).await,

        // Only the relay emits these
        message @ (Message::LobbyOwner { .. }
        | Message::ScoresFinal { .. }
        | Message::Error { .. }) => {
            tracing::debug!("Ignoring {} sent by client {}", message.kind(), origin);
            Vec::new()
        }
    }
}
