//! Presenter message handlers
//!
//! State-replacing writes. Once a lobby has an owner these require its token.

use crate::protocol::Message;
use crate::state::AppState;
use crate::types::*;
use std::sync::Arc;

pub async fn handle_game_state(
    state: &Arc<AppState>,
    origin: &str,
    game: GameState,
    owner_token: Option<&str>,
    start: bool,
) -> Vec<Message> {
    let code = game.lobby_code.clone();
    let replaced = reply_on_err!(state.replace_game(game, owner_token).await);

    let stored = if start {
        tracing::info!(
            "Lobby {} started with {} tracks",
            code,
            replaced.game.shuffled_playlist.len()
        );
        Message::GameStart(replaced.game)
    } else {
        Message::GameUpdate(replaced.game)
    };
    state.relay.to_others(origin, &stored);

    if let Some(scores) = replaced.finished {
        state.relay.to_all(&Message::ScoresFinal {
            lobby_code: code.clone(),
            scores,
        });
    }

    // The stored state goes back to the writer too. A reconnecting presenter
    // reads it after the connect-time snapshot, so it is applied last.
    let mut replies = Vec::with_capacity(2);
    if let Some(owner_token) = replaced.claimed {
        replies.push(Message::LobbyOwner {
            lobby_code: code,
            owner_token,
        });
    }
    replies.push(stored);
    replies
}

pub async fn handle_track_next(
    state: &Arc<AppState>,
    origin: &str,
    lobby_code: LobbyCode,
    new_index: TrackIndex,
    owner_token: Option<&str>,
) -> Vec<Message> {
    let merge = reply_on_err!(state.advance_track(&lobby_code, new_index, owner_token).await);
    if merge.should_relay() {
        state.relay.to_others(
            origin,
            &Message::TrackNext {
                lobby_code,
                new_index,
            },
        );
    }
    Vec::new()
}

pub async fn handle_submission_bulk(
    state: &Arc<AppState>,
    origin: &str,
    lobby_code: LobbyCode,
    submissions: Vec<Submission>,
    owner_token: Option<&str>,
) -> Vec<Message> {
    let merge = reply_on_err!(
        state
            .replace_submissions(&lobby_code, submissions.clone(), owner_token)
            .await
    );
    if merge.should_relay() {
        state.relay.to_others(
            origin,
            &Message::SubmissionBulk {
                lobby_code,
                submissions,
            },
        );
    }
    Vec::new()
}

pub async fn handle_votes_bulk(
    state: &Arc<AppState>,
    origin: &str,
    lobby_code: LobbyCode,
    votes: VoteMap,
    owner_token: Option<&str>,
) -> Vec<Message> {
    let merge = reply_on_err!(
        state
            .replace_votes(&lobby_code, votes.clone(), owner_token)
            .await
    );
    if merge.should_relay() {
        state
            .relay
            .to_others(origin, &Message::VotesBulk { lobby_code, votes });
    }
    Vec::new()
}
