use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ClientError;

/// Opaque ID types for readability
pub type SubmissionId = String;
pub type ParticipantName = String;
pub type TrackIndex = usize;
pub type OwnerToken = String;
pub type ConnectionId = String;

/// Votes recorded per playlist position
pub type VoteMap = BTreeMap<TrackIndex, Vec<Vote>>;

/// Final per-participant statistics keyed by name
pub type Scoreboard = BTreeMap<ParticipantName, ParticipantScore>;

pub const DEFAULT_ROUND_TIMER_SECS: u32 = 30;
const LOBBY_CODE_LEN: usize = 4;

/// Four-digit lobby identifier.
///
/// Always stored trimmed and uppercased so that every comparison is
/// normalized. Deserialization normalizes but does not validate; use
/// [`LobbyCode::parse`] or [`LobbyCode::is_well_formed`] for that.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LobbyCode(String);

impl LobbyCode {
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    /// Normalize and validate a user-entered code
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let code = Self::normalize(raw);
        if code.is_well_formed() {
            Ok(code)
        } else {
            Err(ClientError::InvalidLobbyCode(raw.to_string()))
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.0.len() == LOBBY_CODE_LEN && self.0.bytes().all(|b| b.is_ascii_digit())
    }

    /// Random code in 1000..=9999. No collision check: the relay's
    /// ownership token rejects a second presenter on a taken code.
    pub fn generate() -> Self {
        let n: u16 = rand::rng().random_range(1000..10000);
        Self(n.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for LobbyCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Older clients occasionally send the code as a JSON number
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self::normalize(&s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Setup,
    Playing,
    Finished,
}

/// A submitted clip. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: SubmissionId,
    pub sender_name: ParticipantName,
    #[serde(rename = "youtubeUrl")]
    pub source_url: String,
    #[serde(rename = "videoId")]
    pub source_id: String,
    #[serde(rename = "videoTitle", default)]
    pub title: String,
    #[serde(rename = "startTime", default)]
    pub start_offset_seconds: u32,
    /// Epoch milliseconds
    #[serde(rename = "timestamp", default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub voter_name: ParticipantName,
    pub guessed_name: ParticipantName,
}

/// The shared per-lobby document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameState {
    pub lobby_code: LobbyCode,
    pub status: GameStatus,
    pub current_track_index: TrackIndex,
    pub shuffled_playlist: Vec<Submission>,
    pub participants: Vec<ParticipantName>,
    pub votes: VoteMap,
    #[serde(rename = "roundTimer", alias = "roundTimerSeconds")]
    pub round_timer_seconds: u32,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(LobbyCode::default(), DEFAULT_ROUND_TIMER_SECS)
    }
}

impl GameState {
    pub fn new(lobby_code: LobbyCode, round_timer_seconds: u32) -> Self {
        Self {
            lobby_code,
            status: GameStatus::Setup,
            current_track_index: 0,
            shuffled_playlist: Vec::new(),
            participants: Vec::new(),
            votes: VoteMap::new(),
            round_timer_seconds,
        }
    }

    pub fn has_participant(&self, name: &str) -> bool {
        self.participants.iter().any(|p| p == name)
    }

    pub fn vote_of(&self, track_index: TrackIndex, voter_name: &str) -> Option<&Vote> {
        self.votes
            .get(&track_index)
            .and_then(|votes| votes.iter().find(|v| v.voter_name == voter_name))
    }

    /// Whether the current track is the last one of the playlist
    pub fn is_last_track(&self) -> bool {
        self.current_track_index + 1 >= self.shuffled_playlist.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantScore {
    pub correct_guesses_made: u32,
    pub correct_identifications_received: u32,
    pub submission_count: u32,
}
