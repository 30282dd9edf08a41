use super::projection::{LobbyEvent, Merge};
use super::AppState;
use crate::error::LobbyError;
use crate::types::*;

impl AppState {
    /// Record a submission. Idempotent by submission id.
    pub async fn add_submission(
        &self,
        code: &LobbyCode,
        submission: Submission,
    ) -> Result<Merge, LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        let lobby = self.lobby_entry(&mut lobbies, code)?;
        let id = submission.id.clone();
        let merge = lobby.record(LobbyEvent::SubmissionAdded { submission });
        if merge.is_applied() {
            tracing::debug!("Lobby {}: stored submission {}", code, id);
        }
        Ok(merge)
    }

    /// Replace a lobby's submission set wholesale
    pub async fn replace_submissions(
        &self,
        code: &LobbyCode,
        submissions: Vec<Submission>,
        owner_token: Option<&str>,
    ) -> Result<Merge, LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        let lobby = self.lobby_entry(&mut lobbies, code)?;
        lobby.authorize(owner_token)?;
        Ok(lobby.record(LobbyEvent::SubmissionsReplaced { submissions }))
    }

    pub async fn get_submissions(&self, code: &LobbyCode) -> Vec<Submission> {
        self.get_projection(code)
            .await
            .map(|p| p.submissions)
            .unwrap_or_default()
    }
}
