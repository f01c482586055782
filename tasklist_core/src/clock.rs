use std::time::SystemTime;

/// Per-actor monotonic logical time.
///
/// A non-negative integer; the instance's clock is always at least as large
/// as every `clock` value it has observed on any applied operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Lamport(u64);

impl Lamport {
    pub const ZERO: Lamport = Lamport(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Merge in an observed clock value without advancing past it; used when
    /// applying a remote operation (not generating a new one).
    pub fn merge(&mut self, observed: Lamport) {
        self.0 = self.0.max(observed.0);
    }

    /// Advance past the larger of the local clock and an optionally observed
    /// remote clock, as required for locally generated operations
    /// (`clock = max(local, observed_remote_on_that_op) + 1`).
    pub fn advance(&mut self, observed: Option<Lamport>) -> Lamport {
        if let Some(observed) = observed {
            self.merge(observed);
        }
        self.0 += 1;
        *self
    }
}

/// Injected source of wall-clock time for `createdAt`/`updatedAt` fields.
///
/// Never used for CRDT ordering — only the [`Lamport`] clock and actor id
/// decide winners. Exists as a trait so tests can supply a fixed clock.
pub trait Clock {
    fn now(&self) -> SystemTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_without_observation_just_increments() {
        let mut clock = Lamport::ZERO;
        assert_eq!(clock.advance(None).value(), 1);
        assert_eq!(clock.advance(None).value(), 2);
    }

    #[test]
    fn advance_jumps_past_observed_remote_clock() {
        let mut clock = Lamport::new(3);
        let produced = clock.advance(Some(Lamport::new(10)));
        assert_eq!(produced.value(), 11);
    }

    #[test]
    fn merge_never_moves_backwards() {
        let mut clock = Lamport::new(10);
        clock.merge(Lamport::new(3));
        assert_eq!(clock.value(), 10);
        clock.merge(Lamport::new(20));
        assert_eq!(clock.value(), 20);
    }
}
