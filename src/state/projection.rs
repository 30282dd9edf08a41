//! Lobby event log and the projection folded from it.
//!
//! Relay and clients apply the same [`LobbyEvent`]s through
//! [`LobbyProjection::apply`], so both sides share one set of merge rules.
//! Every rule is idempotent: applying an event twice leaves the projection
//! as applying it once.

use crate::protocol::Message;
use crate::state::score::compute_scores;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    StateReplaced { game: GameState },
    ParticipantJoined { name: ParticipantName },
    SubmissionAdded { submission: Submission },
    SubmissionsReplaced { submissions: Vec<Submission> },
    VoteCast { track_index: TrackIndex, vote: Vote },
    VotesReplaced { votes: VoteMap },
    TrackAdvanced { index: TrackIndex },
    GameFinished { scores: Scoreboard },
}

impl LobbyEvent {
    /// The event a broadcast message stands for, if it mutates lobby state
    pub fn from_message(message: &Message) -> Option<Self> {
        let event = match message {
            Message::GameUpdate(game) | Message::GameStart(game) => {
                Self::StateReplaced { game: game.clone() }
            }
            Message::ParticipantJoined { name, .. } => {
                Self::ParticipantJoined { name: name.clone() }
            }
            Message::SubmissionNew { submission, .. } => Self::SubmissionAdded {
                submission: submission.clone(),
            },
            Message::SubmissionBulk { submissions, .. } => Self::SubmissionsReplaced {
                submissions: submissions.clone(),
            },
            Message::VoteNew {
                track_index, vote, ..
            } => Self::VoteCast {
                track_index: *track_index,
                vote: vote.clone(),
            },
            Message::VotesBulk { votes, .. } => Self::VotesReplaced {
                votes: votes.clone(),
            },
            Message::TrackNext { new_index, .. } => Self::TrackAdvanced { index: *new_index },
            Message::ScoresFinal { scores, .. } => Self::GameFinished {
                scores: scores.clone(),
            },
            Message::LobbyOwner { .. } | Message::Error { .. } => return None,
        };
        Some(event)
    }
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    /// The projection changed
    Applied,
    /// Already reflected in the projection (redelivery)
    Duplicate,
    /// Violates a lobby invariant; the projection is untouched
    Rejected(&'static str),
}

impl Merge {
    pub fn is_applied(&self) -> bool {
        matches!(self, Merge::Applied)
    }

    /// Applied and duplicate merges are safe to re-emit to peers
    pub fn should_relay(&self) -> bool {
        !matches!(self, Merge::Rejected(_))
    }

    fn from_changed(changed: bool) -> Self {
        if changed {
            Merge::Applied
        } else {
            Merge::Duplicate
        }
    }
}

/// State derived from a lobby's event log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyProjection {
    pub game: GameState,
    pub submissions: Vec<Submission>,
    #[serde(default)]
    pub scores: Option<Scoreboard>,
}

impl LobbyProjection {
    pub fn new(lobby_code: LobbyCode, round_timer_seconds: u32) -> Self {
        Self {
            game: GameState::new(lobby_code, round_timer_seconds),
            submissions: Vec::new(),
            scores: None,
        }
    }

    /// Fold a log on top of `base`
    pub fn replay<'a>(base: Self, events: impl IntoIterator<Item = &'a LobbyEvent>) -> Self {
        let mut projection = base;
        for event in events {
            projection.apply(event);
        }
        projection
    }

    pub fn apply(&mut self, event: &LobbyEvent) -> Merge {
        match event {
            LobbyEvent::StateReplaced { game } => self.replace_state(game),
            LobbyEvent::ParticipantJoined { name } => {
                if name.trim().is_empty() {
                    Merge::Rejected("blank participant name")
                } else {
                    Merge::from_changed(self.add_participant(name))
                }
            }
            LobbyEvent::SubmissionAdded { submission } => self.add_submission(submission),
            LobbyEvent::SubmissionsReplaced { submissions } => {
                let submissions = dedup_submissions(submissions);
                if submissions == self.submissions {
                    Merge::Duplicate
                } else {
                    self.submissions = submissions;
                    Merge::Applied
                }
            }
            LobbyEvent::VoteCast { track_index, vote } => self.cast_vote(*track_index, vote),
            LobbyEvent::VotesReplaced { votes } => {
                let votes = dedup_votes(votes);
                if votes == self.game.votes {
                    Merge::Duplicate
                } else {
                    self.game.votes = votes;
                    Merge::Applied
                }
            }
            LobbyEvent::TrackAdvanced { index } => {
                let len = self.game.shuffled_playlist.len();
                if len > 0 && *index >= len {
                    Merge::Rejected("track index past the end of the playlist")
                } else if *index == self.game.current_track_index {
                    Merge::Duplicate
                } else {
                    self.game.current_track_index = *index;
                    Merge::Applied
                }
            }
            LobbyEvent::GameFinished { scores } => {
                if self.game.status == GameStatus::Finished
                    && self.scores.as_ref() == Some(scores)
                {
                    Merge::Duplicate
                } else {
                    self.game.status = GameStatus::Finished;
                    self.scores = Some(scores.clone());
                    Merge::Applied
                }
            }
        }
    }

    /// Scoreboard for the current playlist and votes, with a zero entry for
    /// every known participant
    pub fn final_scores(&self) -> Scoreboard {
        let mut scores = compute_scores(&self.game.shuffled_playlist, &self.game.votes);
        for name in &self.game.participants {
            scores.entry(name.clone()).or_default();
        }
        scores
    }

    pub fn has_submission(&self, id: &str) -> bool {
        self.submissions.iter().any(|s| s.id == id)
    }

    fn add_participant(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.game.has_participant(name) {
            return false;
        }
        self.game.participants.push(name.to_string());
        true
    }

    fn add_submission(&mut self, submission: &Submission) -> Merge {
        let joined = self.add_participant(&submission.sender_name);
        if self.has_submission(&submission.id) {
            return Merge::from_changed(joined);
        }
        self.submissions.push(submission.clone());
        Merge::Applied
    }

    fn cast_vote(&mut self, track_index: TrackIndex, vote: &Vote) -> Merge {
        if self.game.status != GameStatus::Playing {
            return Merge::Rejected("game is not in progress");
        }
        if track_index >= self.game.shuffled_playlist.len() {
            return Merge::Rejected("no such track");
        }
        if track_index > self.game.current_track_index {
            return Merge::Rejected("round is not open yet");
        }
        if vote.voter_name.trim().is_empty() {
            return Merge::Rejected("blank voter name");
        }
        match self.game.vote_of(track_index, &vote.voter_name) {
            Some(existing) if existing == vote => Merge::Duplicate,
            Some(_) => Merge::Rejected("voter already voted for this track"),
            None => {
                self.game
                    .votes
                    .entry(track_index)
                    .or_default()
                    .push(vote.clone());
                Merge::Applied
            }
        }
    }

    fn replace_state(&mut self, incoming: &GameState) -> Merge {
        let mut next = incoming.clone();
        let both_started =
            self.game.status != GameStatus::Setup && next.status != GameStatus::Setup;

        // The playlist is frozen once a game has started
        if both_started
            && !self.game.shuffled_playlist.is_empty()
            && next.shuffled_playlist != self.game.shuffled_playlist
        {
            tracing::debug!(
                "Keeping frozen playlist of lobby {} over replacement",
                self.game.lobby_code
            );
            next.shuffled_playlist = self.game.shuffled_playlist.clone();
        }

        // Participants only grow
        let mut participants = Vec::with_capacity(next.participants.len());
        for name in next.participants.iter().chain(self.game.participants.iter()) {
            let name = name.trim();
            if !name.is_empty() && !participants.iter().any(|p: &String| p == name) {
                participants.push(name.to_string());
            }
        }
        next.participants = participants;

        // Votes are never retracted while a game runs; recorded votes win
        next.votes = if both_started {
            let mut merged = self.game.votes.clone();
            for (index, votes) in &next.votes {
                let slot = merged.entry(*index).or_default();
                for vote in votes {
                    if !slot.iter().any(|v| v.voter_name == vote.voter_name) {
                        slot.push(vote.clone());
                    }
                }
            }
            merged.retain(|_, slot| !slot.is_empty());
            merged
        } else {
            dedup_votes(&next.votes)
        };

        if next == self.game {
            return Merge::Duplicate;
        }
        if next.status == GameStatus::Setup {
            self.scores = None;
        }
        self.game = next;
        Merge::Applied
    }
}

fn dedup_submissions(submissions: &[Submission]) -> Vec<Submission> {
    let mut seen = HashSet::new();
    submissions
        .iter()
        .filter(|s| seen.insert(s.id.clone()))
        .cloned()
        .collect()
}

/// First vote per voter wins within each track
fn dedup_votes(votes: &VoteMap) -> VoteMap {
    votes
        .iter()
        .map(|(index, list)| {
            let mut seen = HashSet::new();
            let kept: Vec<Vote> = list
                .iter()
                .filter(|v| seen.insert(v.voter_name.clone()))
                .cloned()
                .collect();
            (*index, kept)
        })
        .filter(|(_, list)| !list.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> LobbyCode {
        LobbyCode::normalize("4242")
    }

    fn submission(id: &str, sender: &str) -> Submission {
        Submission {
            id: id.to_string(),
            sender_name: sender.to_string(),
            source_url: format!("https://youtu.be/{id}xxxxxxxxx"),
            source_id: format!("{id}xxxxxxxxx"),
            title: "Track".to_string(),
            start_offset_seconds: 0,
            created_at: 0,
        }
    }

    fn vote(voter: &str, guessed: &str) -> Vote {
        Vote {
            voter_name: voter.to_string(),
            guessed_name: guessed.to_string(),
        }
    }

    fn playing(playlist: Vec<Submission>) -> LobbyProjection {
        let mut projection = LobbyProjection::new(code(), 30);
        let mut game = projection.game.clone();
        game.status = GameStatus::Playing;
        game.shuffled_playlist = playlist;
        assert_eq!(
            projection.apply(&LobbyEvent::StateReplaced { game }),
            Merge::Applied
        );
        projection
    }

    #[test]
    fn test_submission_merge_is_idempotent() {
        let mut projection = LobbyProjection::new(code(), 30);
        let event = LobbyEvent::SubmissionAdded {
            submission: submission("a1", "ALICE"),
        };

        assert_eq!(projection.apply(&event), Merge::Applied);
        let once = projection.clone();
        assert_eq!(projection.apply(&event), Merge::Duplicate);

        assert_eq!(projection, once);
        assert_eq!(projection.submissions.len(), 1);
        assert_eq!(projection.game.participants, vec!["ALICE".to_string()]);
    }

    #[test]
    fn test_participants_have_set_semantics() {
        let mut projection = LobbyProjection::new(code(), 30);
        for name in ["ALICE", "BOB", "ALICE", " BOB "] {
            projection.apply(&LobbyEvent::ParticipantJoined {
                name: name.to_string(),
            });
        }
        assert_eq!(projection.game.participants, vec!["ALICE", "BOB"]);
        assert_eq!(
            projection.apply(&LobbyEvent::ParticipantJoined {
                name: "  ".to_string()
            }),
            Merge::Rejected("blank participant name")
        );
    }

    #[test]
    fn test_at_most_one_vote_per_voter_and_track() {
        let mut projection = playing(vec![submission("a1", "ALICE"), submission("b1", "BOB")]);

        let first = LobbyEvent::VoteCast {
            track_index: 0,
            vote: vote("BOB", "ALICE"),
        };
        let changed_mind = LobbyEvent::VoteCast {
            track_index: 0,
            vote: vote("BOB", "CAROL"),
        };

        assert_eq!(projection.apply(&first), Merge::Applied);
        assert_eq!(projection.apply(&first), Merge::Duplicate);
        assert!(matches!(projection.apply(&changed_mind), Merge::Rejected(_)));

        let votes = &projection.game.votes[&0];
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].guessed_name, "ALICE");
    }

    #[test]
    fn test_votes_require_an_open_round() {
        let mut setup = LobbyProjection::new(code(), 30);
        assert!(matches!(
            setup.apply(&LobbyEvent::VoteCast {
                track_index: 0,
                vote: vote("BOB", "ALICE")
            }),
            Merge::Rejected(_)
        ));

        let mut projection = playing(vec![submission("a1", "ALICE"), submission("b1", "BOB")]);
        assert_eq!(
            projection.apply(&LobbyEvent::VoteCast {
                track_index: 1,
                vote: vote("BOB", "ALICE")
            }),
            Merge::Rejected("round is not open yet")
        );
        assert_eq!(
            projection.apply(&LobbyEvent::VoteCast {
                track_index: 5,
                vote: vote("BOB", "ALICE")
            }),
            Merge::Rejected("no such track")
        );

        // A late vote for an earlier track still counts
        projection.apply(&LobbyEvent::TrackAdvanced { index: 1 });
        assert_eq!(
            projection.apply(&LobbyEvent::VoteCast {
                track_index: 0,
                vote: vote("BOB", "ALICE")
            }),
            Merge::Applied
        );
    }

    #[test]
    fn test_vote_order_does_not_change_projection() {
        let playlist = vec![submission("a1", "ALICE"), submission("b1", "BOB")];
        let votes = [
            LobbyEvent::VoteCast {
                track_index: 0,
                vote: vote("BOB", "ALICE"),
            },
            LobbyEvent::VoteCast {
                track_index: 0,
                vote: vote("ALICE", "BOB"),
            },
            LobbyEvent::VoteCast {
                track_index: 0,
                vote: vote("BOB", "ALICE"),
            },
        ];

        let forward = LobbyProjection::replay(playing(playlist.clone()), votes.iter());
        let backward = LobbyProjection::replay(playing(playlist), votes.iter().rev());

        assert_eq!(forward.final_scores(), backward.final_scores());
        assert_eq!(forward.game.votes[&0].len(), 2);
        assert_eq!(backward.game.votes[&0].len(), 2);
    }

    #[test]
    fn test_playlist_is_frozen_once_started() {
        let mut projection = playing(vec![submission("a1", "ALICE"), submission("b1", "BOB")]);
        let frozen = projection.game.shuffled_playlist.clone();

        let mut replacement = projection.game.clone();
        replacement.shuffled_playlist.reverse();
        replacement.current_track_index = 1;
        projection.apply(&LobbyEvent::StateReplaced { game: replacement });

        assert_eq!(projection.game.shuffled_playlist, frozen);
        assert_eq!(projection.game.current_track_index, 1);
    }

    #[test]
    fn test_stale_state_cannot_drop_votes() {
        let mut projection = playing(vec![submission("a1", "ALICE"), submission("b1", "BOB")]);
        let stale = projection.game.clone();
        projection.apply(&LobbyEvent::VoteCast {
            track_index: 0,
            vote: vote("BOB", "ALICE"),
        });

        assert_eq!(
            projection.apply(&LobbyEvent::StateReplaced { game: stale }),
            Merge::Duplicate
        );
        assert_eq!(projection.game.votes[&0].len(), 1);
    }

    #[test]
    fn test_returning_to_setup_clears_scores() {
        let mut projection = playing(vec![submission("a1", "ALICE")]);
        let scores = projection.final_scores();
        projection.apply(&LobbyEvent::GameFinished { scores });
        assert_eq!(projection.game.status, GameStatus::Finished);
        assert!(projection.scores.is_some());

        let fresh = GameState::new(code(), 30);
        assert_eq!(
            projection.apply(&LobbyEvent::StateReplaced { game: fresh }),
            Merge::Applied
        );
        assert_eq!(projection.game.status, GameStatus::Setup);
        assert!(projection.scores.is_none());
    }

    #[test]
    fn test_bulk_replacements_drop_duplicates() {
        let mut projection = LobbyProjection::new(code(), 30);
        projection.apply(&LobbyEvent::SubmissionsReplaced {
            submissions: vec![
                submission("a1", "ALICE"),
                submission("a1", "ALICE"),
                submission("b1", "BOB"),
            ],
        });
        assert_eq!(projection.submissions.len(), 2);

        let mut votes = VoteMap::new();
        votes.insert(0, vec![vote("BOB", "ALICE"), vote("BOB", "CAROL")]);
        projection.apply(&LobbyEvent::VotesReplaced { votes });
        assert_eq!(projection.game.votes[&0], vec![vote("BOB", "ALICE")]);
    }

    #[test]
    fn test_track_advance_bounds() {
        let mut projection = playing(vec![submission("a1", "ALICE"), submission("b1", "BOB")]);
        assert_eq!(
            projection.apply(&LobbyEvent::TrackAdvanced { index: 1 }),
            Merge::Applied
        );
        assert_eq!(
            projection.apply(&LobbyEvent::TrackAdvanced { index: 1 }),
            Merge::Duplicate
        );
        assert!(matches!(
            projection.apply(&LobbyEvent::TrackAdvanced { index: 2 }),
            Merge::Rejected(_)
        ));
    }

    #[test]
    fn test_event_from_message() {
        let msg = Message::TrackNext {
            lobby_code: code(),
            new_index: 3,
        };
        assert_eq!(
            LobbyEvent::from_message(&msg),
            Some(LobbyEvent::TrackAdvanced { index: 3 })
        );
        let owner = Message::LobbyOwner {
            lobby_code: code(),
            owner_token: "t".to_string(),
        };
        assert!(LobbyEvent::from_message(&owner).is_none());
    }
}
