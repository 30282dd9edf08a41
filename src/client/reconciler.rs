//! Device-local view of one lobby.
//!
//! Local actions apply optimistically and return the frame to send. Inbound
//! messages merge through the same projection rules the relay uses, so
//! redelivered or reordered messages converge to the relay's state.

use crate::client::cache::{CachedSession, StateCache};
use crate::client::media::SourceRef;
use crate::error::{ClientError, LobbyError};
use crate::protocol::{Frame, Message};
use crate::state::projection::{LobbyEvent, LobbyProjection, Merge};
use crate::types::*;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ClientRole {
    /// Runs the shared screen and owns the lobby
    Presenter,
    Player { name: ParticipantName },
}

/// What an inbound message did to the local view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    /// Already known or not applicable
    Unchanged,
    /// Addressed to a lobby this device is not in
    ForeignLobby,
    /// The relay granted this presenter ownership of its lobby
    OwnerAssigned,
    /// The relay does not know our lobby; the association was dropped
    JoinRejected { message: String },
    /// Our lobby is owned by someone else and we never held its token, so a
    /// fresh lobby replaced it. Send [`Reconciler::on_open`] to claim it.
    Relocated { lobby_code: LobbyCode },
    Failed { message: String },
}

pub struct Reconciler {
    role: Option<ClientRole>,
    lobby_code: Option<LobbyCode>,
    owner_token: Option<OwnerToken>,
    projection: LobbyProjection,
    round_timer_seconds: u32,
    cache: Option<Box<dyn StateCache>>,
}

impl Reconciler {
    pub fn new(round_timer_seconds: u32) -> Self {
        Self {
            role: None,
            lobby_code: None,
            owner_token: None,
            projection: LobbyProjection::default(),
            round_timer_seconds,
            cache: None,
        }
    }

    /// Attach a cache and resume whatever session it holds
    pub fn with_cache(mut self, cache: Box<dyn StateCache>) -> Self {
        match cache.load() {
            Ok(Some(session)) => {
                tracing::info!("Resuming cached session for lobby {:?}", session.lobby_code);
                self.role = session.role;
                self.lobby_code = session.lobby_code;
                self.owner_token = session.owner_token;
                self.projection = session.projection;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring unreadable session cache: {}", e),
        }
        self.cache = Some(cache);
        self
    }

    pub fn role(&self) -> Option<&ClientRole> {
        self.role.as_ref()
    }

    pub fn lobby_code(&self) -> Option<&LobbyCode> {
        self.lobby_code.as_ref()
    }

    pub fn owner_token(&self) -> Option<&str> {
        self.owner_token.as_deref()
    }

    pub fn projection(&self) -> &LobbyProjection {
        &self.projection
    }

    pub fn game(&self) -> &GameState {
        &self.projection.game
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.projection.submissions
    }

    pub fn scores(&self) -> Option<&Scoreboard> {
        self.projection.scores.as_ref()
    }

    /// Submissions sent by this device's player
    pub fn my_submissions(&self) -> Vec<&Submission> {
        match &self.role {
            Some(ClientRole::Player { name }) => self
                .projection
                .submissions
                .iter()
                .filter(|s| &s.sender_name == name)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether this player already voted on the current track
    pub fn has_voted(&self) -> bool {
        match &self.role {
            Some(ClientRole::Player { name }) => self
                .game()
                .vote_of(self.game().current_track_index, name)
                .is_some(),
            _ => false,
        }
    }

    /// Start a new lobby as its presenter
    pub fn create_lobby(&mut self) -> Frame {
        let code = LobbyCode::generate();
        tracing::info!("Creating lobby {}", code);
        self.role = Some(ClientRole::Presenter);
        self.owner_token = None;
        self.lobby_code = Some(code.clone());
        self.projection = LobbyProjection::new(code, self.round_timer_seconds);
        self.persist();
        Frame::new(Message::GameUpdate(self.projection.game.clone()))
    }

    pub fn join(&mut self, raw_code: &str, raw_name: &str) -> Result<Frame, ClientError> {
        let code = LobbyCode::parse(raw_code)?;
        let name = raw_name.trim().to_uppercase();
        if name.is_empty() {
            return Err(ClientError::EmptyName);
        }

        if self.lobby_code.as_ref() != Some(&code) {
            self.projection = LobbyProjection::new(code.clone(), self.round_timer_seconds);
        }
        self.role = Some(ClientRole::Player { name: name.clone() });
        self.owner_token = None;
        self.lobby_code = Some(code.clone());
        self.projection
            .apply(&LobbyEvent::ParticipantJoined { name: name.clone() });
        self.persist();

        Ok(Frame::new(Message::ParticipantJoined {
            name,
            lobby_code: code,
        }))
    }

    pub fn set_round_timer(&mut self, seconds: u32) -> Result<Frame, ClientError> {
        self.require_presenter()?;
        let mut game = self.projection.game.clone();
        game.round_timer_seconds = seconds;
        self.projection.apply(&LobbyEvent::StateReplaced { game });
        self.persist();
        Ok(self.owned(Message::GameUpdate(self.projection.game.clone())))
    }

    /// Send a clip. `title` is usually the result of
    /// [`resolve_title`](crate::client::media::resolve_title).
    pub fn submit(&mut self, source: SourceRef, title: String) -> Result<Frame, ClientError> {
        let name = self.require_player()?;
        let lobby_code = self.require_lobby()?;

        let submission = Submission {
            id: ulid::Ulid::new().to_string(),
            sender_name: name,
            source_url: source.url,
            source_id: source.video_id,
            title,
            start_offset_seconds: source.start_offset_seconds,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.projection.apply(&LobbyEvent::SubmissionAdded {
            submission: submission.clone(),
        });
        self.persist();

        Ok(Frame::new(Message::SubmissionNew {
            lobby_code,
            submission,
        }))
    }

    /// Freeze a shuffled playlist and start playing
    pub fn start_game<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Frame, ClientError> {
        self.require_presenter()?;
        if self.projection.game.status != GameStatus::Setup {
            return Err(ClientError::AlreadyStarted);
        }
        if self.projection.submissions.is_empty() {
            return Err(ClientError::NoSubmissions);
        }

        let mut game = self.projection.game.clone();
        let mut playlist = self.projection.submissions.clone();
        playlist.shuffle(rng);
        for submission in &playlist {
            if !game.has_participant(&submission.sender_name) {
                game.participants.push(submission.sender_name.clone());
            }
        }
        game.shuffled_playlist = playlist;
        game.status = GameStatus::Playing;
        game.current_track_index = 0;
        game.votes = VoteMap::new();

        self.projection.apply(&LobbyEvent::StateReplaced { game });
        self.persist();
        Ok(self.owned(Message::GameStart(self.projection.game.clone())))
    }

    /// Guess who sent the current track
    pub fn vote(&mut self, guessed_name: &str) -> Result<Frame, ClientError> {
        let voter_name = self.require_player()?;
        let lobby_code = self.require_lobby()?;
        if self.projection.game.status != GameStatus::Playing {
            return Err(ClientError::NotPlaying);
        }
        if self.has_voted() {
            return Err(ClientError::AlreadyVoted);
        }

        let track_index = self.projection.game.current_track_index;
        let vote = Vote {
            voter_name,
            guessed_name: guessed_name.to_string(),
        };
        let merge = self.projection.apply(&LobbyEvent::VoteCast {
            track_index,
            vote: vote.clone(),
        });
        if let Merge::Rejected(reason) = merge {
            tracing::debug!("Local vote rejected: {}", reason);
            return Err(ClientError::NotPlaying);
        }
        self.persist();

        Ok(Frame::new(Message::VoteNew {
            lobby_code,
            track_index,
            vote,
        }))
    }

    /// Advance to the next track, or finish after the last one
    pub fn next_track(&mut self) -> Result<Frame, ClientError> {
        self.require_presenter()?;
        let lobby_code = self.require_lobby()?;
        if self.projection.game.status != GameStatus::Playing {
            return Err(ClientError::NotPlaying);
        }

        let frame = if self.projection.game.is_last_track() {
            let mut game = self.projection.game.clone();
            game.status = GameStatus::Finished;
            self.projection.apply(&LobbyEvent::StateReplaced { game });
            let scores = self.projection.final_scores();
            self.projection.apply(&LobbyEvent::GameFinished { scores });
            tracing::info!("Lobby {} finished", lobby_code);
            self.owned(Message::GameUpdate(self.projection.game.clone()))
        } else {
            let new_index = self.projection.game.current_track_index + 1;
            self.projection
                .apply(&LobbyEvent::TrackAdvanced { index: new_index });
            self.owned(Message::TrackNext {
                lobby_code,
                new_index,
            })
        };
        self.persist();
        Ok(frame)
    }

    /// Frames to send whenever a connection opens, so the relay learns about
    /// this device again after a restart or reconnect
    pub fn on_open(&self) -> Vec<Frame> {
        match (&self.role, &self.lobby_code) {
            (Some(ClientRole::Player { name }), Some(code)) => {
                vec![Frame::new(Message::ParticipantJoined {
                    name: name.clone(),
                    lobby_code: code.clone(),
                })]
            }
            (Some(ClientRole::Presenter), Some(_)) => {
                vec![self.owned(Message::GameUpdate(self.projection.game.clone()))]
            }
            _ => Vec::new(),
        }
    }

    /// Forget the lobby and the cached session
    pub fn leave(&mut self) {
        self.role = None;
        self.lobby_code = None;
        self.owner_token = None;
        self.projection = LobbyProjection::default();
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear() {
                tracing::warn!("Failed to clear session cache: {}", e);
            }
        }
    }

    /// Merge one inbound frame into the local view
    pub fn reconcile(&mut self, frame: Frame) -> ReconcileOutcome {
        let message = frame.message;

        if let Message::Error {
            message: text,
            lobby_code,
            code,
        } = &message
        {
            return self.reconcile_error(text, lobby_code.as_ref(), code.as_deref());
        }

        let Some(local) = &self.lobby_code else {
            return ReconcileOutcome::ForeignLobby;
        };
        if message.lobby_code() != Some(local) {
            return ReconcileOutcome::ForeignLobby;
        }

        if let Message::LobbyOwner { owner_token, .. } = message {
            if self.role != Some(ClientRole::Presenter) {
                return ReconcileOutcome::Unchanged;
            }
            tracing::info!("Relay granted ownership of lobby {}", local);
            self.owner_token = Some(owner_token);
            self.persist();
            return ReconcileOutcome::OwnerAssigned;
        }

        let Some(event) = LobbyEvent::from_message(&message) else {
            return ReconcileOutcome::Unchanged;
        };
        match self.projection.apply(&event) {
            Merge::Applied => {
                self.persist();
                ReconcileOutcome::Applied
            }
            Merge::Duplicate => ReconcileOutcome::Unchanged,
            Merge::Rejected(reason) => {
                tracing::debug!("Dropping inbound {}: {}", message.kind(), reason);
                ReconcileOutcome::Unchanged
            }
        }
    }

    fn reconcile_error(
        &mut self,
        message: &str,
        lobby_code: Option<&LobbyCode>,
        code: Option<&str>,
    ) -> ReconcileOutcome {
        if lobby_code.is_some() && lobby_code != self.lobby_code.as_ref() {
            return ReconcileOutcome::ForeignLobby;
        }
        tracing::warn!("Relay error: {}", message);
        if code == Some(LobbyError::UNKNOWN_LOBBY) && lobby_code.is_some() {
            self.leave();
            return ReconcileOutcome::JoinRejected {
                message: message.to_string(),
            };
        }
        if code == Some(LobbyError::NOT_OWNER)
            && lobby_code.is_some()
            && self.role == Some(ClientRole::Presenter)
            && self.owner_token.is_none()
        {
            return self.relocate();
        }
        ReconcileOutcome::Failed {
            message: message.to_string(),
        }
    }

    /// Move a presenter locked out of its lobby to a fresh code, keeping
    /// the round timer it chose
    fn relocate(&mut self) -> ReconcileOutcome {
        let lost = self.lobby_code.clone();
        let round_timer = self.projection.game.round_timer_seconds;
        let mut code = LobbyCode::generate();
        while Some(&code) == lost.as_ref() {
            code = LobbyCode::generate();
        }
        tracing::warn!(
            "Lobby {:?} is owned elsewhere, moving to lobby {}",
            lost,
            code
        );
        self.projection = LobbyProjection::new(code.clone(), round_timer);
        self.lobby_code = Some(code.clone());
        self.persist();
        ReconcileOutcome::Relocated { lobby_code: code }
    }

    fn owned(&self, message: Message) -> Frame {
        Frame::with_owner_token(message, self.owner_token.clone())
    }

    fn require_lobby(&self) -> Result<LobbyCode, ClientError> {
        self.lobby_code.clone().ok_or(ClientError::NoLobby)
    }

    fn require_presenter(&self) -> Result<(), ClientError> {
        self.require_lobby()?;
        match self.role {
            Some(ClientRole::Presenter) => Ok(()),
            _ => Err(ClientError::NotPresenter),
        }
    }

    fn require_player(&self) -> Result<ParticipantName, ClientError> {
        self.require_lobby()?;
        match &self.role {
            Some(ClientRole::Player { name }) => Ok(name.clone()),
            _ => Err(ClientError::NotPlayer),
        }
    }

    fn persist(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        let session = CachedSession {
            role: self.role.clone(),
            lobby_code: self.lobby_code.clone(),
            owner_token: self.owner_token.clone(),
            projection: self.projection.clone(),
        };
        if let Err(e) = cache.store(&session) {
            tracing::warn!("Failed to persist session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::cache::MemoryCache;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn source(id: &str) -> SourceRef {
        SourceRef {
            url: format!("https://youtu.be/{id}"),
            video_id: id.to_string(),
            start_offset_seconds: 0,
        }
    }

    /// Presenter that owns `code` and has ALICE and BOB's submissions
    fn presenter_with_submissions() -> (Reconciler, LobbyCode) {
        let mut presenter = Reconciler::new(30);
        let frame = presenter.create_lobby();
        let code = frame.message.lobby_code().unwrap().clone();
        presenter.reconcile(Frame::new(Message::LobbyOwner {
            lobby_code: code.clone(),
            owner_token: "tok".into(),
        }));

        let mut alice = Reconciler::new(30);
        alice.join(code.as_str(), "alice").unwrap();
        let mut bob = Reconciler::new(30);
        bob.join(code.as_str(), "bob").unwrap();
        for frame in [
            alice.submit(source("aaaaaaaaaaa"), "A".into()).unwrap(),
            bob.submit(source("bbbbbbbbbbb"), "B".into()).unwrap(),
        ] {
            presenter.reconcile(frame);
        }
        (presenter, code)
    }

    #[test]
    fn test_join_validates_input() {
        let mut player = Reconciler::new(30);
        assert!(matches!(
            player.join("42", "ALICE"),
            Err(ClientError::InvalidLobbyCode(_))
        ));
        assert_eq!(player.join("4242", "  "), Err(ClientError::EmptyName));
        assert!(player.lobby_code().is_none());

        let frame = player.join(" 4242 ", "alice").unwrap();
        assert_eq!(
            frame.message,
            Message::ParticipantJoined {
                name: "ALICE".into(),
                lobby_code: LobbyCode::normalize("4242"),
            }
        );
        assert!(player.game().has_participant("ALICE"));
    }

    #[test]
    fn test_foreign_lobby_messages_are_dropped() {
        let mut player = Reconciler::new(30);
        player.join("4242", "ALICE").unwrap();
        let before = player.projection().clone();

        let outcome = player.reconcile(Frame::new(Message::GameUpdate(GameState::new(
            LobbyCode::normalize("1111"),
            30,
        ))));

        assert_eq!(outcome, ReconcileOutcome::ForeignLobby);
        assert_eq!(player.projection(), &before);
    }

    #[test]
    fn test_presenter_actions_carry_owner_token() {
        let (mut presenter, _code) = presenter_with_submissions();
        assert_eq!(presenter.owner_token(), Some("tok"));
        assert_eq!(presenter.submissions().len(), 2);

        let frame = presenter.start_game(&mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(frame.owner_token.as_deref(), Some("tok"));
        assert_eq!(frame.message.kind(), "game:start");
        assert_eq!(presenter.game().status, GameStatus::Playing);
        assert_eq!(presenter.game().shuffled_playlist.len(), 2);
        assert_eq!(presenter.game().participants, vec!["ALICE", "BOB"]);

        assert_eq!(
            presenter.start_game(&mut StdRng::seed_from_u64(7)),
            Err(ClientError::AlreadyStarted)
        );
    }

    #[test]
    fn test_start_requires_submissions_and_presenter() {
        let mut presenter = Reconciler::new(30);
        presenter.create_lobby();
        assert_eq!(
            presenter.start_game(&mut StdRng::seed_from_u64(1)),
            Err(ClientError::NoSubmissions)
        );

        let mut player = Reconciler::new(30);
        player.join("4242", "ALICE").unwrap();
        assert_eq!(
            player.start_game(&mut StdRng::seed_from_u64(1)),
            Err(ClientError::NotPresenter)
        );
        assert_eq!(player.next_track(), Err(ClientError::NotPresenter));
    }

    #[test]
    fn test_vote_once_per_track() {
        let (mut presenter, code) = presenter_with_submissions();
        let start = presenter.start_game(&mut StdRng::seed_from_u64(3)).unwrap();

        let mut bob = Reconciler::new(30);
        bob.join(code.as_str(), "BOB").unwrap();
        assert_eq!(bob.vote("ALICE"), Err(ClientError::NotPlaying));
        assert_eq!(bob.reconcile(start), ReconcileOutcome::Applied);

        let frame = bob.vote("ALICE").unwrap();
        assert!(bob.has_voted());
        assert_eq!(bob.vote("CAROL"), Err(ClientError::AlreadyVoted));

        // Redelivery of our own vote changes nothing
        assert_eq!(bob.reconcile(frame.clone()), ReconcileOutcome::Unchanged);
        assert_eq!(presenter.reconcile(frame), ReconcileOutcome::Applied);
        assert_eq!(presenter.game().votes[&0].len(), 1);
    }

    #[test]
    fn test_next_track_then_finish() {
        let (mut presenter, _code) = presenter_with_submissions();
        presenter.start_game(&mut StdRng::seed_from_u64(3)).unwrap();

        let frame = presenter.next_track().unwrap();
        assert_eq!(frame.message.kind(), "track:next");
        assert_eq!(presenter.game().current_track_index, 1);

        let frame = presenter.next_track().unwrap();
        assert_eq!(frame.message.kind(), "game:update");
        assert_eq!(presenter.game().status, GameStatus::Finished);
        let scores = presenter.scores().unwrap();
        assert_eq!(scores["ALICE"].submission_count, 1);

        assert_eq!(presenter.next_track(), Err(ClientError::NotPlaying));
    }

    #[test]
    fn test_unknown_lobby_clears_association() {
        let mut player = Reconciler::new(30);
        player.join("4242", "ALICE").unwrap();

        let outcome = player.reconcile(Frame::new(Message::from(&LobbyError::UnknownLobby(
            LobbyCode::normalize("4242"),
        ))));

        assert!(matches!(outcome, ReconcileOutcome::JoinRejected { .. }));
        assert!(player.lobby_code().is_none());
        assert!(player.role().is_none());
    }

    #[test]
    fn test_presenter_without_token_moves_to_fresh_lobby() {
        let mut presenter = Reconciler::new(30);
        let lost = presenter.create_lobby().message.lobby_code().unwrap().clone();
        presenter.set_round_timer(45).unwrap();

        let outcome = presenter.reconcile(Frame::new(Message::from(&LobbyError::NotOwner(
            lost.clone(),
        ))));

        let lobby_code = match outcome {
            ReconcileOutcome::Relocated { lobby_code } => lobby_code,
            other => panic!("Expected relocation, got {:?}", other),
        };
        assert_ne!(lobby_code, lost);
        assert_eq!(presenter.lobby_code(), Some(&lobby_code));
        assert_eq!(presenter.game().round_timer_seconds, 45);
        let frames = presenter.on_open();
        assert_eq!(frames[0].message.lobby_code(), Some(&lobby_code));
        assert!(frames[0].owner_token.is_none());
    }

    #[test]
    fn test_presenter_with_token_is_not_relocated() {
        let (mut presenter, code) = presenter_with_submissions();
        let outcome = presenter.reconcile(Frame::new(Message::from(&LobbyError::NotOwner(
            code.clone(),
        ))));
        assert!(matches!(outcome, ReconcileOutcome::Failed { .. }));
        assert_eq!(presenter.lobby_code(), Some(&code));
    }

    #[test]
    fn test_on_open_reannounces() {
        let mut player = Reconciler::new(30);
        assert!(player.on_open().is_empty());
        player.join("4242", "ALICE").unwrap();
        let frames = player.on_open();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message.kind(), "participant:joined");

        let (presenter, _) = presenter_with_submissions();
        let frames = presenter.on_open();
        assert_eq!(frames[0].message.kind(), "game:update");
        assert_eq!(frames[0].owner_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_owner_token_ignored_by_players() {
        let mut player = Reconciler::new(30);
        player.join("4242", "ALICE").unwrap();
        let outcome = player.reconcile(Frame::new(Message::LobbyOwner {
            lobby_code: LobbyCode::normalize("4242"),
            owner_token: "tok".into(),
        }));
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert!(player.owner_token().is_none());
    }

    struct SharedCache(Arc<MemoryCache>);

    impl StateCache for SharedCache {
        fn load(&self) -> Result<Option<CachedSession>, crate::client::cache::CacheError> {
            self.0.load()
        }
        fn store(&self, session: &CachedSession) -> Result<(), crate::client::cache::CacheError> {
            self.0.store(session)
        }
        fn clear(&self) -> Result<(), crate::client::cache::CacheError> {
            self.0.clear()
        }
    }

    #[test]
    fn test_session_survives_restart() {
        let store = Arc::new(MemoryCache::default());

        let mut player = Reconciler::new(30).with_cache(Box::new(SharedCache(store.clone())));
        player.join("4242", "ALICE").unwrap();
        player.submit(source("aaaaaaaaaaa"), "A".into()).unwrap();
        drop(player);

        let resumed = Reconciler::new(30).with_cache(Box::new(SharedCache(store.clone())));
        assert_eq!(resumed.lobby_code(), Some(&LobbyCode::normalize("4242")));
        assert_eq!(resumed.my_submissions().len(), 1);
        assert_eq!(resumed.on_open()[0].message.kind(), "participant:joined");

        let mut resumed = resumed;
        resumed.leave();
        assert!(store.load().unwrap().is_none());
    }
}
