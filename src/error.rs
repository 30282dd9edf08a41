//! Error types for the relay and the client side.

use crate::types::LobbyCode;

/// Rejections produced by the relay; each maps to a wire error code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("Lobby {0} does not exist")]
    UnknownLobby(LobbyCode),

    #[error("Lobby {0} is controlled by another presenter")]
    NotOwner(LobbyCode),

    #[error("Invalid lobby code: {0:?}")]
    InvalidLobbyCode(LobbyCode),

    #[error("Participant name must not be empty")]
    InvalidName(LobbyCode),
}

impl LobbyError {
    pub const UNKNOWN_LOBBY: &'static str = "UNKNOWN_LOBBY";
    pub const NOT_OWNER: &'static str = "NOT_OWNER";
    pub const INVALID_LOBBY_CODE: &'static str = "INVALID_LOBBY_CODE";
    pub const INVALID_NAME: &'static str = "INVALID_NAME";

    /// Stable code sent in the `error` payload
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownLobby(_) => Self::UNKNOWN_LOBBY,
            Self::NotOwner(_) => Self::NOT_OWNER,
            Self::InvalidLobbyCode(_) => Self::INVALID_LOBBY_CODE,
            Self::InvalidName(_) => Self::INVALID_NAME,
        }
    }

    pub fn lobby_code(&self) -> &LobbyCode {
        match self {
            Self::UnknownLobby(code)
            | Self::NotOwner(code)
            | Self::InvalidLobbyCode(code)
            | Self::InvalidName(code) => code,
        }
    }
}

/// Local rejections on a participating device. None of these reach the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Lobby code must be exactly 4 digits, got {0:?}")]
    InvalidLobbyCode(String),

    #[error("Player name must not be empty")]
    EmptyName,

    #[error("Not a playable video URL: {0}")]
    InvalidSourceUrl(String),

    #[error("Not associated with a lobby")]
    NoLobby,

    #[error("Only the presenter can do this")]
    NotPresenter,

    #[error("Only a player can do this")]
    NotPlayer,

    #[error("Already voted for this track")]
    AlreadyVoted,

    #[error("Cannot start a game without submissions")]
    NoSubmissions,

    #[error("Game is not in progress")]
    NotPlaying,

    #[error("Game has already started")]
    AlreadyStarted,

    #[error("Not connected to the relay")]
    Disconnected,
}
