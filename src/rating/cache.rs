//! In-memory rating cache
//!
//! Maps canonical player identities to per-mode rating records. Data arrives
//! in batches from different sources (manual ratings, the external rating
//! service) and is merged without clobbering modes that are already cached,
//! so manually-set values always win. The store itself is plain data; the
//! engine serializes access through its shared lock.

use crate::types::{GameMode, PlayerId, RatingBatchEntry, RatingRecord, RawRating};
use std::collections::HashMap;

/// Floor/ceiling clamping bounds; zero disables the respective bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClampSettings {
    pub floor: i32,
    pub ceiling: i32,
}

impl ClampSettings {
    pub fn new(floor: i32, ceiling: i32) -> Self {
        Self { floor, ceiling }
    }

    /// Apply the configured bounds to a raw rating, recording the true value
    /// whenever clamping changed it.
    pub fn clamp(&self, raw: RawRating) -> RatingRecord {
        if self.floor != 0 && raw.elo < self.floor {
            RatingRecord {
                elo: self.floor,
                rank: raw.rank,
                real_elo: Some(raw.elo),
            }
        } else if self.ceiling != 0 && raw.elo > self.ceiling {
            RatingRecord {
                elo: self.ceiling,
                rank: raw.rank,
                real_elo: Some(raw.elo),
            }
        } else {
            RatingRecord {
                elo: raw.elo,
                rank: raw.rank,
                real_elo: None,
            }
        }
    }
}

/// Per-player cache entry: one record per game mode, plus an alias tag when
/// the entry was populated as a byproduct of resolving an alias lookup.
#[derive(Debug, Clone, Default)]
struct PlayerEntry {
    records: HashMap<GameMode, RatingRecord>,
    alias_of: Option<PlayerId>,
}

/// In-memory mapping from canonical player identity to rating records
#[derive(Debug, Default)]
pub struct RatingStore {
    entries: HashMap<PlayerId, PlayerEntry>,
}

impl RatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached record for a (player, mode) pair, if any.
    pub fn get(&self, name: &PlayerId, mode: GameMode) -> Option<RatingRecord> {
        self.entries
            .get(name)
            .and_then(|entry| entry.records.get(&mode))
            .copied()
    }

    pub fn is_cached(&self, name: &PlayerId, mode: GameMode) -> bool {
        self.get(name, mode).is_some()
    }

    /// The canonical identity this entry is an alias of, if it was populated
    /// through alias resolution.
    pub fn alias_of(&self, name: &PlayerId) -> Option<&PlayerId> {
        self.entries.get(name).and_then(|e| e.alias_of.as_ref())
    }

    /// Players from `names` that have no cached record for `mode`.
    pub fn uncached(&self, names: &[PlayerId], mode: GameMode) -> Vec<PlayerId> {
        names
            .iter()
            .filter(|n| !self.is_cached(n, mode))
            .cloned()
            .collect()
    }

    /// Merge a batch of ratings into the cache.
    ///
    /// Each entry is clamped per `clamp`. A mode already recorded for a player
    /// is never overwritten, so manual/local data takes precedence over later
    /// service results. Alias-sourced entries additionally store a copy under
    /// the canonical name (with the alias marker stripped), subject to the
    /// same non-clobber rule.
    pub fn merge(&mut self, batch: Vec<RatingBatchEntry>, clamp: &ClampSettings) {
        for entry in batch {
            let records: HashMap<GameMode, RatingRecord> = entry
                .modes
                .into_iter()
                .map(|(mode, raw)| (mode, clamp.clamp(raw)))
                .collect();

            if let Some(real_name) = &entry.alias_of {
                let canonical = self.entries.entry(real_name.clone()).or_default();
                canonical.alias_of = None;
                for (mode, record) in &records {
                    canonical.records.entry(*mode).or_insert(*record);
                }
            }

            let observed = self.entries.entry(entry.name).or_default();
            if entry.alias_of.is_some() {
                observed.alias_of = entry.alias_of;
            }
            for (mode, record) in records {
                observed.records.entry(mode).or_insert(record);
            }
        }
    }

    /// Drop the cached record for one (player, mode) pair, forcing the next
    /// read to treat it as uncached. Used whenever a manual rating is set or
    /// removed locally.
    pub fn clear(&mut self, name: &PlayerId, mode: GameMode) -> bool {
        let Some(entry) = self.entries.get_mut(name) else {
            return false;
        };
        let removed = entry.records.remove(&mode).is_some();
        if entry.records.is_empty() && entry.alias_of.is_none() {
            self.entries.remove(name);
        }
        removed
    }

    /// Number of players with at least one cached record.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RatingBatchEntry;
    use proptest::prelude::*;

    fn entry(name: &str, mode: GameMode, elo: i32, rank: i32) -> RatingBatchEntry {
        RatingBatchEntry::new(PlayerId::new(name)).with_mode(mode, elo, rank)
    }

    #[test]
    fn test_merge_and_get() {
        let mut store = RatingStore::new();
        store.merge(
            vec![entry("eve", GameMode::ClanArena, 1600, 40)],
            &ClampSettings::default(),
        );

        let record = store.get(&PlayerId::new("eve"), GameMode::ClanArena).unwrap();
        assert_eq!(record.elo, 1600);
        assert_eq!(record.rank, 40);
        assert_eq!(record.real_elo, None);
        assert!(!store.is_cached(&PlayerId::new("eve"), GameMode::Duel));
    }

    #[test]
    fn test_floor_clamp_records_real_elo() {
        let mut store = RatingStore::new();
        store.merge(
            vec![entry("newbie", GameMode::Duel, 700, 9000)],
            &ClampSettings::new(900, 0),
        );

        let record = store.get(&PlayerId::new("newbie"), GameMode::Duel).unwrap();
        assert_eq!(record.elo, 900);
        assert_eq!(record.real_elo, Some(700));
        assert_eq!(record.effective_elo(), 700);
    }

    #[test]
    fn test_ceiling_clamp_records_real_elo() {
        let mut store = RatingStore::new();
        store.merge(
            vec![entry("pro", GameMode::Duel, 2400, 3)],
            &ClampSettings::new(0, 2000),
        );

        let record = store.get(&PlayerId::new("pro"), GameMode::Duel).unwrap();
        assert_eq!(record.elo, 2000);
        assert_eq!(record.real_elo, Some(2400));
    }

    #[test]
    fn test_existing_mode_not_overwritten() {
        let mut store = RatingStore::new();
        // Manually-set rating arrives first.
        store.merge(
            vec![entry("eve", GameMode::ClanArena, 1800, -1)],
            &ClampSettings::default(),
        );
        // A later service fetch reports a different value for the same mode.
        store.merge(
            vec![entry("eve", GameMode::ClanArena, 1600, 40)
                .with_mode(GameMode::Duel, 1550, 55)],
            &ClampSettings::default(),
        );

        let eve = PlayerId::new("eve");
        assert_eq!(store.get(&eve, GameMode::ClanArena).unwrap().elo, 1800);
        // The new mode still gets added.
        assert_eq!(store.get(&eve, GameMode::Duel).unwrap().elo, 1550);
    }

    #[test]
    fn test_alias_entry_also_cached_under_canonical_name() {
        let mut store = RatingStore::new();
        let mut smurf = entry("smurf", GameMode::ClanArena, 1600, 40);
        smurf.alias_of = Some(PlayerId::new("eve"));
        store.merge(vec![smurf], &ClampSettings::default());

        let smurf_id = PlayerId::new("smurf");
        let eve_id = PlayerId::new("eve");
        assert_eq!(store.get(&smurf_id, GameMode::ClanArena).unwrap().elo, 1600);
        assert_eq!(store.alias_of(&smurf_id), Some(&eve_id));
        // The canonical identity gets a copy without the alias marker.
        assert_eq!(store.get(&eve_id, GameMode::ClanArena).unwrap().elo, 1600);
        assert_eq!(store.alias_of(&eve_id), None);
    }

    #[test]
    fn test_alias_data_does_not_clobber_canonical_modes() {
        let mut store = RatingStore::new();
        store.merge(
            vec![entry("eve", GameMode::ClanArena, 1800, -1)],
            &ClampSettings::default(),
        );

        let mut smurf = entry("smurf", GameMode::ClanArena, 1600, 40);
        smurf.alias_of = Some(PlayerId::new("eve"));
        store.merge(vec![smurf], &ClampSettings::default());

        assert_eq!(
            store.get(&PlayerId::new("eve"), GameMode::ClanArena).unwrap().elo,
            1800
        );
    }

    #[test]
    fn test_clear_forces_uncached() {
        let mut store = RatingStore::new();
        store.merge(
            vec![entry("eve", GameMode::ClanArena, 1600, 40)],
            &ClampSettings::default(),
        );
        let eve = PlayerId::new("eve");

        assert!(store.clear(&eve, GameMode::ClanArena));
        assert!(!store.is_cached(&eve, GameMode::ClanArena));
        assert!(!store.clear(&eve, GameMode::ClanArena));
        assert!(store.is_empty());
    }

    #[test]
    fn test_uncached_filter() {
        let mut store = RatingStore::new();
        store.merge(
            vec![entry("a", GameMode::Duel, 1500, 10)],
            &ClampSettings::default(),
        );

        let names = vec![PlayerId::new("a"), PlayerId::new("b")];
        let missing = store.uncached(&names, GameMode::Duel);
        assert_eq!(missing, vec![PlayerId::new("b")]);
    }

    proptest! {
        #[test]
        fn prop_clamped_elo_within_bounds(
            elo in -500i32..4000,
            floor in 0i32..1500,
            extra in 0i32..2000,
        ) {
            let ceiling = if floor == 0 { 0 } else { floor + extra };
            let clamp = ClampSettings::new(floor, ceiling);
            let record = clamp.clamp(RawRating { elo, rank: 1 });

            if floor != 0 {
                prop_assert!(record.elo >= floor);
            }
            if ceiling != 0 {
                prop_assert!(record.elo <= ceiling);
            }
            match record.real_elo {
                // A clamp happened: the true value must be preserved.
                Some(real) => {
                    prop_assert_eq!(real, elo);
                    prop_assert_ne!(record.elo, elo);
                }
                None => prop_assert_eq!(record.elo, elo),
            }
        }
    }
}
