use super::projection::{LobbyEvent, Merge};
use super::AppState;
use crate::error::LobbyError;
use crate::types::*;

impl AppState {
    /// Record a vote. A voter gets one vote per track; the first one stands.
    pub async fn cast_vote(
        &self,
        code: &LobbyCode,
        track_index: TrackIndex,
        vote: Vote,
    ) -> Result<Merge, LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        let lobby = self.lobby_entry(&mut lobbies, code)?;
        Ok(lobby.record(LobbyEvent::VoteCast { track_index, vote }))
    }

    /// Replace a lobby's vote map wholesale
    pub async fn replace_votes(
        &self,
        code: &LobbyCode,
        votes: VoteMap,
        owner_token: Option<&str>,
    ) -> Result<Merge, LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        let lobby = self.lobby_entry(&mut lobbies, code)?;
        lobby.authorize(owner_token)?;
        Ok(lobby.record(LobbyEvent::VotesReplaced { votes }))
    }

    /// Number of votes per track
    pub async fn vote_counts(&self, code: &LobbyCode) -> Vec<(TrackIndex, usize)> {
        self.get_projection(code)
            .await
            .map(|p| {
                p.game
                    .votes
                    .iter()
                    .map(|(index, votes)| (*index, votes.len()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
