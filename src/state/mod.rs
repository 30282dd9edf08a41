mod lobby;
pub mod projection;
pub mod score;
mod submission;
mod vote;

pub use lobby::GameReplaced;

use crate::broadcast::Relay;
use crate::config::RelayConfig;
use crate::error::LobbyError;
use crate::protocol::Message;
use crate::types::*;
use chrono::{DateTime, Utc};
use projection::{LobbyEvent, LobbyProjection, Merge};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Applied events kept before the log is folded into a checkpoint
const MAX_LOG_LEN: usize = 256;

/// One lobby: its applied event log and the projection folded from it
#[derive(Debug, Clone)]
pub struct Lobby {
    pub code: LobbyCode,
    pub owner: Option<OwnerToken>,
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
    log: Vec<LobbyEvent>,
    projection: LobbyProjection,
}

impl Lobby {
    pub fn new(code: LobbyCode, round_timer_seconds: u32) -> Self {
        Self {
            projection: LobbyProjection::new(code.clone(), round_timer_seconds),
            code,
            owner: None,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            log: Vec::new(),
        }
    }

    /// Apply an event and append it to the log if it changed anything
    pub fn record(&mut self, event: LobbyEvent) -> Merge {
        self.last_activity = Instant::now();
        let merge = self.projection.apply(&event);
        match &merge {
            Merge::Applied => {
                self.log.push(event);
                if self.log.len() > MAX_LOG_LEN {
                    self.log = self.checkpoint();
                }
            }
            Merge::Duplicate => {}
            Merge::Rejected(reason) => {
                tracing::debug!("Lobby {}: rejected {:?}: {}", self.code, event, reason);
            }
        }
        merge
    }

    pub fn projection(&self) -> &LobbyProjection {
        &self.projection
    }

    pub fn log(&self) -> &[LobbyEvent] {
        &self.log
    }

    /// Events that rebuild the current projection on top of a fresh lobby.
    /// Scores come first: a later state replacement keeps them unless it
    /// returns to setup.
    fn checkpoint(&self) -> Vec<LobbyEvent> {
        let projection = &self.projection;
        let mut events = Vec::with_capacity(3);
        if let Some(scores) = &projection.scores {
            events.push(LobbyEvent::GameFinished {
                scores: scores.clone(),
            });
        }
        events.push(LobbyEvent::StateReplaced {
            game: projection.game.clone(),
        });
        if !projection.submissions.is_empty() {
            events.push(LobbyEvent::SubmissionsReplaced {
                submissions: projection.submissions.clone(),
            });
        }
        events
    }

    /// Fail unless the lobby is unowned or `token` matches its owner
    pub fn authorize(&self, token: Option<&str>) -> Result<(), LobbyError> {
        match &self.owner {
            None => Ok(()),
            Some(owner) if token == Some(owner.as_str()) => Ok(()),
            Some(_) => Err(LobbyError::NotOwner(self.code.clone())),
        }
    }

    /// Assign a fresh owner token
    pub fn claim(&mut self) -> OwnerToken {
        let bytes: [u8; 16] = rand::rng().random();
        let token = hex::encode(bytes);
        self.owner = Some(token.clone());
        token
    }

    /// Everything a late joiner needs to catch up, in apply order. Empty
    /// collections are left out.
    pub fn snapshot(&self) -> Vec<Message> {
        let projection = &self.projection;
        let mut messages = vec![Message::GameUpdate(projection.game.clone())];
        if !projection.submissions.is_empty() {
            messages.push(Message::SubmissionBulk {
                lobby_code: self.code.clone(),
                submissions: projection.submissions.clone(),
            });
        }
        if !projection.game.votes.is_empty() {
            messages.push(Message::VotesBulk {
                lobby_code: self.code.clone(),
                votes: projection.game.votes.clone(),
            });
        }
        if let Some(scores) = &projection.scores {
            messages.push(Message::ScoresFinal {
                lobby_code: self.code.clone(),
                scores: scores.clone(),
            });
        }
        messages
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub lobbies: Arc<RwLock<HashMap<LobbyCode, Lobby>>>,
    pub relay: Relay,
    pub config: RelayConfig,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            lobbies: Arc::new(RwLock::new(HashMap::new())),
            relay: Relay::new(config.channel_capacity),
            config,
        }
    }

    /// Lobby for `code`, created on first reference
    pub async fn get_or_create(&self, code: &LobbyCode) -> Result<LobbyProjection, LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        let lobby = self.lobby_entry(&mut lobbies, code)?;
        Ok(lobby.projection().clone())
    }

    pub async fn get_projection(&self, code: &LobbyCode) -> Option<LobbyProjection> {
        self.lobbies
            .read()
            .await
            .get(code)
            .map(|lobby| lobby.projection().clone())
    }

    pub async fn lobby_count(&self) -> usize {
        self.lobbies.read().await.len()
    }

    fn lobby_entry<'a>(
        &self,
        lobbies: &'a mut HashMap<LobbyCode, Lobby>,
        code: &LobbyCode,
    ) -> Result<&'a mut Lobby, LobbyError> {
        if !code.is_well_formed() {
            return Err(LobbyError::InvalidLobbyCode(code.clone()));
        }
        Ok(lobbies.entry(code.clone()).or_insert_with(|| {
            tracing::info!("Creating lobby {}", code);
            Lobby::new(code.clone(), self.config.round_timer_seconds)
        }))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}
