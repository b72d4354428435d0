//! Deferred operations waiting on missing cache data
//!
//! Operations that cannot complete because ratings are not cached yet are
//! recorded here as typed variants (never stored callables) and replayed by
//! the engine once a fetch completes. No equal (operation, arguments) pair
//! is ever queued twice; the reply channel is ignored for that comparison.

use crate::server::Reply;
use crate::types::{GameMode, PlayerId};

/// A deferred caller-facing operation with its typed payload
#[derive(Clone)]
pub enum PendingTask {
    TeamsInfo {
        mode: GameMode,
        reply: Reply,
    },
    Balance {
        mode: GameMode,
        reply: Reply,
    },
    IndividualRating {
        name: PlayerId,
        mode: GameMode,
        reply: Reply,
    },
    RosterRatings {
        mode: GameMode,
        reply: Reply,
    },
    RatingCheck {
        names: Vec<PlayerId>,
        mode: GameMode,
        reply: Reply,
    },
}

impl PendingTask {
    /// Whether two tasks are the same operation with the same arguments.
    /// Reply channels are deliberately not compared.
    pub fn same_operation(&self, other: &PendingTask) -> bool {
        match (self, other) {
            (PendingTask::TeamsInfo { mode: a, .. }, PendingTask::TeamsInfo { mode: b, .. }) => {
                a == b
            }
            (PendingTask::Balance { mode: a, .. }, PendingTask::Balance { mode: b, .. }) => a == b,
            (
                PendingTask::IndividualRating {
                    name: na, mode: ma, ..
                },
                PendingTask::IndividualRating {
                    name: nb, mode: mb, ..
                },
            ) => na == nb && ma == mb,
            (
                PendingTask::RosterRatings { mode: a, .. },
                PendingTask::RosterRatings { mode: b, .. },
            ) => a == b,
            (
                PendingTask::RatingCheck {
                    names: na, mode: ma, ..
                },
                PendingTask::RatingCheck {
                    names: nb, mode: mb, ..
                },
            ) => na == nb && ma == mb,
            _ => false,
        }
    }

    /// Short label for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            PendingTask::TeamsInfo { .. } => "teams_info",
            PendingTask::Balance { .. } => "balance",
            PendingTask::IndividualRating { .. } => "individual_rating",
            PendingTask::RosterRatings { .. } => "roster_ratings",
            PendingTask::RatingCheck { .. } => "rating_check",
        }
    }
}

impl std::fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PendingTask::{}", self.kind())
    }
}

/// Ordered queue of deferred operations
#[derive(Debug, Default)]
pub struct PendingQueue {
    tasks: Vec<PendingTask>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless an equal operation is already queued. Returns whether
    /// the task was added.
    pub fn enqueue(&mut self, task: PendingTask) -> bool {
        if self.tasks.iter().any(|t| t.same_operation(&task)) {
            return false;
        }
        self.tasks.push(task);
        true
    }

    /// Take every queued task, in order, leaving the queue empty. Tasks that
    /// are still blocked re-enqueue themselves when re-dispatched.
    pub fn drain(&mut self) -> Vec<PendingTask> {
        std::mem::take(&mut self.tasks)
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task: &PendingTask) -> bool {
        self.tasks.iter().any(|t| t.same_operation(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_dedups_same_operation() {
        let mut queue = PendingQueue::new();
        assert!(queue.enqueue(PendingTask::TeamsInfo {
            mode: GameMode::ClanArena,
            reply: None,
        }));
        // Same operation and arguments, different (absent) channel: rejected.
        assert!(!queue.enqueue(PendingTask::TeamsInfo {
            mode: GameMode::ClanArena,
            reply: None,
        }));
        assert_eq!(queue.len(), 1);

        // Different arguments: accepted.
        assert!(queue.enqueue(PendingTask::TeamsInfo {
            mode: GameMode::Duel,
            reply: None,
        }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_different_operations_do_not_collide() {
        let mut queue = PendingQueue::new();
        queue.enqueue(PendingTask::TeamsInfo {
            mode: GameMode::ClanArena,
            reply: None,
        });
        assert!(queue.enqueue(PendingTask::Balance {
            mode: GameMode::ClanArena,
            reply: None,
        }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drain_empties_queue_in_order() {
        let mut queue = PendingQueue::new();
        queue.enqueue(PendingTask::Balance {
            mode: GameMode::Duel,
            reply: None,
        });
        queue.enqueue(PendingTask::IndividualRating {
            name: PlayerId::new("eve"),
            mode: GameMode::Duel,
            reply: None,
        });

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind(), "balance");
        assert_eq!(drained[1].kind(), "individual_rating");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rating_check_compares_name_sets() {
        let mut queue = PendingQueue::new();
        let names = vec![PlayerId::new("a"), PlayerId::new("b")];
        queue.enqueue(PendingTask::RatingCheck {
            names: names.clone(),
            mode: GameMode::ClanArena,
            reply: None,
        });
        assert!(!queue.enqueue(PendingTask::RatingCheck {
            names,
            mode: GameMode::ClanArena,
            reply: None,
        }));
        assert!(queue.enqueue(PendingTask::RatingCheck {
            names: vec![PlayerId::new("c")],
            mode: GameMode::ClanArena,
            reply: None,
        }));
    }
}
