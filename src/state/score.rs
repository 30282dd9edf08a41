//! Final scoring. Pure functions of the frozen playlist and the recorded votes.

use crate::types::*;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Compute per-participant statistics.
///
/// - every sender gets one `submission_count` per playlist entry
/// - a vote whose guess names the track's sender counts once for the voter
///   (`correct_guesses_made`) and once for the sender
///   (`correct_identifications_received`)
///
/// Votes for indices outside the playlist are ignored and each voter counts
/// at most once per track. A voter listed more than once on a track counts
/// as correct only if every one of those guesses is correct, so the result
/// does not depend on the order in which votes were recorded.
pub fn compute_scores(playlist: &[Submission], votes: &VoteMap) -> Scoreboard {
    let mut scores = Scoreboard::new();

    for submission in playlist {
        scores
            .entry(submission.sender_name.clone())
            .or_default()
            .submission_count += 1;
    }

    for (index, track_votes) in votes {
        let Some(track) = playlist.get(*index) else {
            continue;
        };
        let mut verdicts: BTreeMap<&str, bool> = BTreeMap::new();
        for vote in track_votes {
            let correct = vote.guessed_name == track.sender_name;
            verdicts
                .entry(vote.voter_name.as_str())
                .and_modify(|all| *all &= correct)
                .or_insert(correct);
        }
        for (voter_name, correct) in verdicts {
            let voter = scores.entry(voter_name.to_string()).or_default();
            if correct {
                voter.correct_guesses_made += 1;
                scores
                    .entry(track.sender_name.clone())
                    .or_default()
                    .correct_identifications_received += 1;
            }
        }
    }

    scores
}

/// Lookup with unseen participants defaulting to zero
pub fn score_of(scores: &Scoreboard, name: &str) -> ParticipantScore {
    scores.get(name).copied().unwrap_or_default()
}

/// Best guessers first; ties broken by name
pub fn rank_guessers(scores: &Scoreboard) -> Vec<(&ParticipantName, &ParticipantScore)> {
    let mut ranked: Vec<_> = scores.iter().collect();
    ranked.sort_by_key(|(name, score)| (Reverse(score.correct_guesses_made), *name));
    ranked
}

/// Hardest to identify first, among participants who submitted something
pub fn rank_least_identified(
    scores: &Scoreboard,
) -> Vec<(&ParticipantName, &ParticipantScore)> {
    let mut ranked: Vec<_> = scores
        .iter()
        .filter(|(_, score)| score.submission_count > 0)
        .collect();
    ranked.sort_by_key(|(name, score)| (score.correct_identifications_received, *name));
    ranked
}
