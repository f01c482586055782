use serde::{Deserialize, Serialize};
use tasklist_core::{ActorId, clock::Lamport};

/// A single last-writer-wins field, winner tracked by `(clock, actor)`.
///
/// This is the unit the ordered-set CRDT's per-field update rule (§4.2) is
/// built from: every payload field is one of these, so "apply iff arriving
/// `(clock, actor) >` the per-field winner's" is implemented once here and
/// reused by every payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lww<T> {
    value: T,
    winner_clock: Lamport,
    winner_actor: ActorId,
}

impl<T> Lww<T> {
    pub fn new(value: T, clock: Lamport, actor: ActorId) -> Self {
        Self {
            value,
            winner_clock: clock,
            winner_actor: actor,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn winner(&self) -> (Lamport, &ActorId) {
        (self.winner_clock, &self.winner_actor)
    }

    /// Apply `value` iff `(clock, actor)` beats the recorded winner.
    /// Returns whether it was applied.
    pub fn apply(&mut self, value: T, clock: Lamport, actor: &ActorId) -> bool {
        if (clock, actor) > (self.winner_clock, &self.winner_actor) {
            self.value = value;
            self.winner_clock = clock;
            self.winner_actor = actor.clone();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(s: &str) -> ActorId {
        ActorId::from(s)
    }

    #[test]
    fn higher_clock_wins() {
        let mut f = Lww::new("a".to_string(), Lamport::new(1), actor("x"));
        assert!(f.apply("b".to_string(), Lamport::new(2), &actor("y")));
        assert_eq!(f.get(), "b");
    }

    #[test]
    fn lower_clock_is_rejected() {
        let mut f = Lww::new("a".to_string(), Lamport::new(5), actor("x"));
        assert!(!f.apply("b".to_string(), Lamport::new(2), &actor("z")));
        assert_eq!(f.get(), "a");
    }

    #[test]
    fn tie_breaks_on_actor() {
        let mut f = Lww::new("a".to_string(), Lamport::new(5), actor("m"));
        assert!(!f.apply("b".to_string(), Lamport::new(5), &actor("a")));
        assert!(f.apply("c".to_string(), Lamport::new(5), &actor("z")));
        assert_eq!(f.get(), "c");
    }
}
