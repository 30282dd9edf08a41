use super::projection::{LobbyEvent, Merge};
use super::score::rank_guessers;
use super::AppState;
use crate::error::LobbyError;
use crate::protocol::Message;
use crate::types::*;
use std::time::Duration;

/// Outcome of a presenter's state write
#[derive(Debug, Clone, PartialEq)]
pub struct GameReplaced {
    /// Stored state after merging
    pub game: GameState,
    pub merge: Merge,
    /// Set when this write created or claimed the lobby
    pub claimed: Option<OwnerToken>,
    /// Set when this write moved the lobby into `finished`
    pub finished: Option<Scoreboard>,
}

impl AppState {
    /// Replace a lobby's game state. Creates the lobby on first write and
    /// hands ownership to the first writer; later writes must carry its token.
    pub async fn replace_game(
        &self,
        game: GameState,
        owner_token: Option<&str>,
    ) -> Result<GameReplaced, LobbyError> {
        let code = game.lobby_code.clone();
        let mut lobbies = self.lobbies.write().await;
        let lobby = self.lobby_entry(&mut lobbies, &code)?;

        let claimed = if lobby.owner.is_none() {
            let token = lobby.claim();
            tracing::info!("Lobby {} claimed by a presenter", code);
            Some(token)
        } else {
            lobby.authorize(owner_token)?;
            None
        };

        let was_finished = lobby.projection().game.status == GameStatus::Finished;
        let merge = lobby.record(LobbyEvent::StateReplaced { game });

        let mut finished = None;
        if !was_finished && lobby.projection().game.status == GameStatus::Finished {
            let scores = lobby.projection().final_scores();
            lobby.record(LobbyEvent::GameFinished {
                scores: scores.clone(),
            });
            match rank_guessers(&scores).first() {
                Some((name, best)) => tracing::info!(
                    "Lobby {} finished; best guesser {} with {} correct",
                    code,
                    name,
                    best.correct_guesses_made
                ),
                None => tracing::info!("Lobby {} finished with no participants", code),
            }
            finished = Some(scores);
        }

        Ok(GameReplaced {
            game: lobby.projection().game.clone(),
            merge,
            claimed,
            finished,
        })
    }

    /// Add a participant to an existing lobby and return its stored state
    pub async fn join_participant(
        &self,
        code: &LobbyCode,
        name: &str,
    ) -> Result<GameState, LobbyError> {
        if name.trim().is_empty() {
            return Err(LobbyError::InvalidName(code.clone()));
        }
        let mut lobbies = self.lobbies.write().await;
        let lobby = lobbies
            .get_mut(code)
            .ok_or_else(|| LobbyError::UnknownLobby(code.clone()))?;

        if lobby.record(LobbyEvent::ParticipantJoined {
            name: name.to_string(),
        })
        .is_applied()
        {
            tracing::info!("{} joined lobby {}", name.trim(), code);
        }
        Ok(lobby.projection().game.clone())
    }

    pub async fn advance_track(
        &self,
        code: &LobbyCode,
        index: TrackIndex,
        owner_token: Option<&str>,
    ) -> Result<Merge, LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        let lobby = self.lobby_entry(&mut lobbies, code)?;
        lobby.authorize(owner_token)?;
        Ok(lobby.record(LobbyEvent::TrackAdvanced { index }))
    }

    /// Catch-up messages for one lobby
    pub async fn snapshot(&self, code: &LobbyCode) -> Option<Vec<Message>> {
        self.lobbies.read().await.get(code).map(|lobby| lobby.snapshot())
    }

    /// Catch-up messages for every live lobby, oldest lobby first
    pub async fn snapshot_all(&self) -> Vec<Message> {
        let lobbies = self.lobbies.read().await;
        let mut ordered: Vec<_> = lobbies.values().collect();
        ordered.sort_by_key(|lobby| lobby.created_at);
        ordered.into_iter().flat_map(|lobby| lobby.snapshot()).collect()
    }

    /// Drop lobbies with no activity for longer than `max_idle`
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<LobbyCode> {
        let mut lobbies = self.lobbies.write().await;
        let idle: Vec<LobbyCode> = lobbies
            .values()
            .filter(|lobby| lobby.last_activity.elapsed() >= max_idle)
            .map(|lobby| lobby.code.clone())
            .collect();

        for code in &idle {
            if let Some(lobby) = lobbies.remove(code) {
                tracing::info!(
                    "Evicting idle lobby {} ({} events, created {})",
                    code,
                    lobby.log().len(),
                    lobby.created_at.to_rfc3339()
                );
            }
        }
        idle
    }
}
