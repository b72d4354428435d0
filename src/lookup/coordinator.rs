//! Outstanding-lookup bookkeeping
//!
//! Tracks batch fetches that have been dispatched but not yet merged into
//! the cache. At most one outstanding lookup may cover a player name at a
//! time; new requests for covered names are folded away by the engine.

use crate::server::Reply;
use crate::types::PlayerId;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// One in-flight batch fetch against the rating service
pub struct OutstandingLookup {
    pub id: Uuid,
    /// Every name this lookup covers: the requested names plus the canonical
    /// names actually sent to the service.
    pub names: HashSet<PlayerId>,
    /// Canonical name sent to the service -> requested alias name, used to
    /// attribute results back to the name that was asked for.
    pub aliases: HashMap<PlayerId, PlayerId>,
    /// Channel that requested the fetch, for failure messages.
    pub reply: Reply,
}

impl OutstandingLookup {
    pub fn new(names: HashSet<PlayerId>, aliases: HashMap<PlayerId, PlayerId>, reply: Reply) -> Self {
        Self {
            id: Uuid::new_v4(),
            names,
            aliases,
            reply,
        }
    }
}

/// Table of in-flight lookups keyed by their token
#[derive(Default)]
pub struct LookupTable {
    lookups: HashMap<Uuid, OutstandingLookup>,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any outstanding lookup already covers this name.
    pub fn covers(&self, name: &PlayerId) -> bool {
        self.lookups.values().any(|l| l.names.contains(name))
    }

    /// Drop names already covered by an outstanding lookup, returning the
    /// ones that still need a fetch.
    pub fn filter_uncovered(&self, names: Vec<PlayerId>) -> Vec<PlayerId> {
        names.into_iter().filter(|n| !self.covers(n)).collect()
    }

    pub fn register(&mut self, lookup: OutstandingLookup) -> Uuid {
        let id = lookup.id;
        self.lookups.insert(id, lookup);
        id
    }

    pub fn remove(&mut self, id: Uuid) -> Option<OutstandingLookup> {
        self.lookups.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_for(names: &[&str]) -> OutstandingLookup {
        OutstandingLookup::new(
            names.iter().map(|n| PlayerId::new(n)).collect(),
            HashMap::new(),
            None,
        )
    }

    #[test]
    fn test_covers_and_filter() {
        let mut table = LookupTable::new();
        table.register(lookup_for(&["a", "b"]));

        assert!(table.covers(&PlayerId::new("a")));
        assert!(!table.covers(&PlayerId::new("c")));

        let remaining = table.filter_uncovered(vec![
            PlayerId::new("a"),
            PlayerId::new("b"),
            PlayerId::new("c"),
        ]);
        assert_eq!(remaining, vec![PlayerId::new("c")]);
    }

    #[test]
    fn test_remove_uncovers_names() {
        let mut table = LookupTable::new();
        let id = table.register(lookup_for(&["a"]));
        assert_eq!(table.len(), 1);

        let removed = table.remove(id).unwrap();
        assert!(removed.names.contains(&PlayerId::new("a")));
        assert!(!table.covers(&PlayerId::new("a")));
        assert!(table.is_empty());
        assert!(table.remove(id).is_none());
    }

    #[test]
    fn test_alias_covers_canonical_query_name() {
        let mut table = LookupTable::new();
        let mut aliases = HashMap::new();
        aliases.insert(PlayerId::new("eve"), PlayerId::new("smurf"));
        let names: HashSet<_> = [PlayerId::new("smurf"), PlayerId::new("eve")]
            .into_iter()
            .collect();
        table.register(OutstandingLookup::new(names, aliases, None));

        // A direct request for the canonical identity must be folded into the
        // alias lookup already in flight.
        assert!(table.covers(&PlayerId::new("eve")));
        assert!(table.covers(&PlayerId::new("smurf")));
    }
}
