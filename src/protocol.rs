//! Wire protocol: `{type, payload}` envelopes shared by relay and clients.
//!
//! Known types decode into [`Message`]. Unknown types are not an error: the
//! relay forwards them verbatim so newer clients can talk through an older
//! relay.

use crate::error::LobbyError;
use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope key carrying the presenter's authority token
pub const OWNER_TOKEN_KEY: &str = "ownerToken";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    #[serde(rename = "game:update")]
    GameUpdate(GameState),

    #[serde(rename = "game:start")]
    GameStart(GameState),

    #[serde(rename = "participant:joined", rename_all = "camelCase")]
    ParticipantJoined {
        name: ParticipantName,
        lobby_code: LobbyCode,
    },

    #[serde(rename = "submission:new", rename_all = "camelCase")]
    SubmissionNew {
        lobby_code: LobbyCode,
        submission: Submission,
    },

    /// Reconnection catch-up and bulk fixtures
    #[serde(rename = "submission:bulk", rename_all = "camelCase")]
    SubmissionBulk {
        lobby_code: LobbyCode,
        #[serde(default)]
        submissions: Vec<Submission>,
    },

    #[serde(rename = "vote:new", rename_all = "camelCase")]
    VoteNew {
        lobby_code: LobbyCode,
        track_index: TrackIndex,
        vote: Vote,
    },

    #[serde(rename = "votes:bulk", rename_all = "camelCase")]
    VotesBulk {
        lobby_code: LobbyCode,
        #[serde(default)]
        votes: VoteMap,
    },

    #[serde(rename = "track:next", rename_all = "camelCase")]
    TrackNext {
        lobby_code: LobbyCode,
        new_index: TrackIndex,
    },

    /// Sent only to the connection that created or claimed a lobby
    #[serde(rename = "lobby:owner", rename_all = "camelCase")]
    LobbyOwner {
        lobby_code: LobbyCode,
        owner_token: OwnerToken,
    },

    /// Broadcast once when a lobby reaches `finished`
    #[serde(rename = "scores:final", rename_all = "camelCase")]
    ScoresFinal {
        lobby_code: LobbyCode,
        scores: Scoreboard,
    },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lobby_code: Option<LobbyCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl Message {
    /// Every `type` string this crate understands
    pub const KINDS: &'static [&'static str] = &[
        "game:update",
        "game:start",
        "participant:joined",
        "submission:new",
        "submission:bulk",
        "vote:new",
        "votes:bulk",
        "track:next",
        "lobby:owner",
        "scores:final",
        "error",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            Self::GameUpdate(_) => "game:update",
            Self::GameStart(_) => "game:start",
            Self::ParticipantJoined { .. } => "participant:joined",
            Self::SubmissionNew { .. } => "submission:new",
            Self::SubmissionBulk { .. } => "submission:bulk",
            Self::VoteNew { .. } => "vote:new",
            Self::VotesBulk { .. } => "votes:bulk",
            Self::TrackNext { .. } => "track:next",
            Self::LobbyOwner { .. } => "lobby:owner",
            Self::ScoresFinal { .. } => "scores:final",
            Self::Error { .. } => "error",
        }
    }

    /// The lobby this message belongs to, if it names one
    pub fn lobby_code(&self) -> Option<&LobbyCode> {
        match self {
            Self::GameUpdate(game) | Self::GameStart(game) => Some(&game.lobby_code),
            Self::ParticipantJoined { lobby_code, .. }
            | Self::SubmissionNew { lobby_code, .. }
            | Self::SubmissionBulk { lobby_code, .. }
            | Self::VoteNew { lobby_code, .. }
            | Self::VotesBulk { lobby_code, .. }
            | Self::TrackNext { lobby_code, .. }
            | Self::LobbyOwner { lobby_code, .. }
            | Self::ScoresFinal { lobby_code, .. } => Some(lobby_code),
            Self::Error { lobby_code, .. } => lobby_code.as_ref(),
        }
    }
}

impl From<&LobbyError> for Message {
    fn from(err: &LobbyError) -> Self {
        Self::Error {
            message: err.to_string(),
            lobby_code: Some(err.lobby_code().clone()),
            code: Some(err.code().to_string()),
        }
    }
}

/// A decoded message together with the envelope-level owner token
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message: Message,
    pub owner_token: Option<OwnerToken>,
}

impl Frame {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            owner_token: None,
        }
    }

    pub fn with_owner_token(message: Message, owner_token: Option<OwnerToken>) -> Self {
        Self {
            message,
            owner_token,
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}

#[derive(Debug)]
pub enum Decoded {
    Frame(Frame),
    /// Well-formed envelope with a `type` this crate does not know
    Passthrough { kind: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Frame is not JSON: {0}")]
    NotJson(serde_json::Error),

    #[error("Envelope has no type")]
    MissingType,

    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        source: serde_json::Error,
    },
}

/// Decode one text frame
pub fn decode(text: &str) -> Result<Decoded, DecodeError> {
    let mut value: Value = serde_json::from_str(text).map_err(DecodeError::NotJson)?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .ok_or(DecodeError::MissingType)?
        .to_string();

    if !Message::KINDS.contains(&kind.as_str()) {
        return Ok(Decoded::Passthrough { kind });
    }

    let owner_token = value
        .as_object_mut()
        .and_then(|obj| obj.remove(OWNER_TOKEN_KEY))
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|t| !t.is_empty());

    let message = serde_json::from_value::<Message>(value)
        .map_err(|source| DecodeError::InvalidPayload { kind, source })?;

    Ok(Decoded::Frame(Frame {
        message,
        owner_token,
    }))
}

/// Encode a frame, placing the owner token (if any) next to `type`
pub fn encode(frame: &Frame) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(&frame.message)?;
    if let (Some(token), Some(obj)) = (&frame.owner_token, value.as_object_mut()) {
        obj.insert(OWNER_TOKEN_KEY.to_string(), Value::String(token.clone()));
    }
    serde_json::to_string(&value)
}

/// Encode a message with no token
pub fn encode_message(message: &Message) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_frame(text: &str) -> Frame {
        match decode(text).unwrap() {
            Decoded::Frame(frame) => frame,
            other => panic!("Expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_vote_new() {
        let frame = decode_frame(
            r#"{"type":"vote:new","payload":{"lobbyCode":" 4242","trackIndex":0,"vote":{"voterName":"BOB","guessedName":"ALICE"}}}"#,
        );
        match frame.message {
            Message::VoteNew {
                lobby_code,
                track_index,
                vote,
            } => {
                assert_eq!(lobby_code.as_str(), "4242");
                assert_eq!(track_index, 0);
                assert_eq!(vote.guessed_name, "ALICE");
            }
            other => panic!("Expected VoteNew, got {:?}", other),
        }
        assert!(frame.owner_token.is_none());
    }

    #[test]
    fn test_decode_owner_token() {
        let frame = decode_frame(
            r#"{"type":"track:next","ownerToken":"abc","payload":{"lobbyCode":"4242","newIndex":2}}"#,
        );
        assert_eq!(frame.owner_token.as_deref(), Some("abc"));
        assert_eq!(
            frame.message,
            Message::TrackNext {
                lobby_code: LobbyCode::normalize("4242"),
                new_index: 2
            }
        );
    }

    #[test]
    fn test_unknown_type_is_passthrough() {
        match decode(r#"{"type":"timer:tick","payload":{"left":3}}"#).unwrap() {
            Decoded::Passthrough { kind } => assert_eq!(kind, "timer:tick"),
            other => panic!("Expected passthrough, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode("not json"), Err(DecodeError::NotJson(_))));
        assert!(matches!(
            decode(r#"{"payload":{}}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            decode(r#"{"type":"vote:new","payload":{"lobbyCode":"4242"}}"#),
            Err(DecodeError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_encode_places_token_in_envelope() {
        let frame = Frame::with_owner_token(
            Message::TrackNext {
                lobby_code: LobbyCode::normalize("4242"),
                new_index: 1,
            },
            Some("tok".to_string()),
        );
        let value: Value = serde_json::from_str(&encode(&frame).unwrap()).unwrap();
        assert_eq!(value["type"], "track:next");
        assert_eq!(value["ownerToken"], "tok");
        assert_eq!(value["payload"]["newIndex"], 1);
        assert!(value["payload"].get("ownerToken").is_none());
    }

    #[test]
    fn test_error_message_from_lobby_error() {
        let err = LobbyError::UnknownLobby(LobbyCode::normalize("9999"));
        let value = serde_json::to_value(Message::from(&err)).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["lobbyCode"], "9999");
        assert_eq!(value["payload"]["code"], "UNKNOWN_LOBBY");
    }

    #[test]
    fn test_kinds_cover_every_variant() {
        let code = LobbyCode::normalize("4242");
        let samples = vec![
            Message::GameUpdate(GameState::new(code.clone(), 30)),
            Message::GameStart(GameState::new(code.clone(), 30)),
            Message::TrackNext {
                lobby_code: code.clone(),
                new_index: 0,
            },
            Message::ScoresFinal {
                lobby_code: code,
                scores: Scoreboard::new(),
            },
        ];
        for msg in samples {
            assert!(Message::KINDS.contains(&msg.kind()));
            let value = serde_json::to_value(&msg).unwrap();
            assert_eq!(value["type"], msg.kind());
        }
    }
}
