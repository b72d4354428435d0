//! Balance algorithms over roster snapshots
//!
//! These functions are pure: they operate on player lists and a map of
//! cached elo values, leaving roster mutation and messaging to the core.
//! The swap search is a deliberately cheap single-swap local search that the
//! core re-runs after applying each swap until no strictly improving swap
//! remains.

use crate::types::{PlayerId, SwapSuggestion, Team};
use std::collections::HashMap;

/// Cached elo per player, snapshotted for one computation.
pub type EloMap = HashMap<PlayerId, i32>;

fn elo_of(elos: &EloMap, player: &PlayerId) -> i32 {
    debug_assert!(
        elos.contains_key(player),
        "player {} missing from elo snapshot",
        player
    );
    // Production behavior degrades to 0 instead of taking the engine down.
    elos.get(player).copied().unwrap_or(0)
}

/// Mean cached elo of a team; an empty team averages to 0.
pub fn team_average(team: &[PlayerId], elos: &EloMap) -> f64 {
    if team.is_empty() {
        return 0.0;
    }
    let sum: i64 = team.iter().map(|p| i64::from(elo_of(elos, p))).sum();
    sum as f64 / team.len() as f64
}

/// Find the single red/blue pair whose swap most reduces the inter-team
/// average gap. Returns `None` unless the best swap is strictly improving;
/// ties between equally good swaps are broken by iteration order.
pub fn suggest_swap(red: &[PlayerId], blue: &[PlayerId], elos: &EloMap) -> Option<SwapSuggestion> {
    if red.is_empty() || blue.is_empty() {
        return None;
    }

    let red_sum: i64 = red.iter().map(|p| i64::from(elo_of(elos, p))).sum();
    let blue_sum: i64 = blue.iter().map(|p| i64::from(elo_of(elos, p))).sum();
    let red_len = red.len() as f64;
    let blue_len = blue.len() as f64;

    let current_gap = (red_sum as f64 / red_len - blue_sum as f64 / blue_len).abs();

    let mut best_gap = f64::INFINITY;
    let mut best_pair: Option<(PlayerId, PlayerId)> = None;

    for red_player in red {
        let red_elo = i64::from(elo_of(elos, red_player));
        for blue_player in blue {
            let blue_elo = i64::from(elo_of(elos, blue_player));
            let new_red = (red_sum - red_elo + blue_elo) as f64 / red_len;
            let new_blue = (blue_sum - blue_elo + red_elo) as f64 / blue_len;
            let gap = (new_red - new_blue).abs();
            if gap < best_gap {
                best_gap = gap;
                best_pair = Some((red_player.clone(), blue_player.clone()));
            }
        }
    }

    match best_pair {
        Some((red_player, blue_player)) if best_gap < current_gap => Some(SwapSuggestion {
            red_player,
            blue_player,
            improvement: current_gap - best_gap,
        }),
        _ => None,
    }
}

/// Players to move from the larger team to even out roster sizes, with their
/// destination. Assumes an even combined total; a 1-player difference cannot
/// occur then and sizes differing by less than 2 need no moves.
pub fn moves_to_even(red: &[PlayerId], blue: &[PlayerId]) -> Vec<(PlayerId, Team)> {
    let diff = red.len() as i64 - blue.len() as i64;
    if diff.abs() < 2 {
        return Vec::new();
    }
    let count = (diff.unsigned_abs() / 2) as usize;
    if diff > 0 {
        red.iter()
            .rev()
            .take(count)
            .map(|p| (p.clone(), Team::Blue))
            .collect()
    } else {
        blue.iter()
            .rev()
            .take(count)
            .map(|p| (p.clone(), Team::Red))
            .collect()
    }
}
