use crate::actor::ActorId;
use crate::errors::{InvalidOrderingSnafu, MissingActorSnafu, Result};
use snafu::ensure;

/// One `(digit, actor)` pair in a [`Position`].
///
/// Field order matters: deriving `Ord` here gives exactly the comparison the
/// algebra requires — digit first, actor as the tie-break at equal digit.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Component {
    pub digit: u32,
    pub actor: ActorId,
}

/// A fractional identifier placing an entry in an ordered-set CRDT.
///
/// Comparison is exactly `Vec<Component>`'s default lexicographic order,
/// which already gives "a shorter prefix is less than any of its
/// extensions" for free.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Position(Vec<Component>);

impl Position {
    pub fn components(&self) -> &[Component] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    fn from_digits(digits: &[(u32, &str)]) -> Self {
        Position(
            digits
                .iter()
                .map(|(digit, actor)| Component {
                    digit: *digit,
                    actor: ActorId::from(*actor),
                })
                .collect(),
        )
    }
}

/// One past the largest digit assignable at the root level; stands in for
/// `+∞` whenever a bound is absent or its tail has been fully consumed.
const VIRTUAL_CEIL: i64 = 1024;
/// One below the smallest assignable digit (0); stands in for `-∞`.
const VIRTUAL_FLOOR: i64 = -1;

/// Find a position strictly between `left` and `right`, breaking ties in
/// favour of `actor` when digits collide.
///
/// `left`/`right` of `None` mean "no boundary" (±∞). Fails with
/// [`CoreError::InvalidOrdering`] if both are given and `left >= right`, and
/// with [`CoreError::MissingActor`] if `actor` is empty.
pub fn between(left: Option<&Position>, right: Option<&Position>, actor: &ActorId) -> Result<Position> {
    ensure!(!actor.is_empty(), MissingActorSnafu);
    if let (Some(l), Some(r)) = (left, right) {
        ensure!(
            l < r,
            InvalidOrderingSnafu {
                left: format!("{l:?}"),
                right: format!("{r:?}"),
            }
        );
    }

    let mut left_tail: &[Component] = left.map(Position::components).unwrap_or(&[]);
    let mut right_tail: &[Component] = right.map(Position::components).unwrap_or(&[]);
    let mut result = Vec::new();

    loop {
        let digit_l = left_tail.first().map_or(VIRTUAL_FLOOR, |c| c.digit as i64);
        let digit_r = right_tail.first().map_or(VIRTUAL_CEIL, |c| c.digit as i64);
        let gap = digit_r - digit_l;

        if gap >= 2 {
            let mid = digit_l + (gap + 1) / 2;
            result.push(Component {
                digit: mid as u32,
                actor: actor.clone(),
            });
            return Ok(Position(result));
        }

        if gap == 1 {
            if let Some((head, rest)) = left_tail.split_first() {
                // `head` already keeps us strictly below `right` at this
                // depth; everything deeper only has to clear `left`'s own
                // remainder, so `right` stops constraining the search.
                result.push(head.clone());
                left_tail = rest;
                right_tail = &[];
                continue;
            }
            let (head, rest) = right_tail
                .split_first()
                .expect("gap of 1 with both sides virtual is impossible (virtual gap is 1025)");
            if actor < &head.actor {
                result.push(Component {
                    digit: head.digit,
                    actor: actor.clone(),
                });
                return Ok(Position(result));
            }
            result.push(head.clone());
            right_tail = rest;
            continue;
        }

        // gap == 0: both sides carry the same real digit here.
        let left_head = left_tail.first().expect("gap == 0 implies a real left digit");
        let right_head = right_tail.first().expect("gap == 0 implies a real right digit");
        if &left_head.actor < actor && actor < &right_head.actor {
            result.push(Component {
                digit: left_head.digit,
                actor: actor.clone(),
            });
            return Ok(Position(result));
        }
        result.push(left_head.clone());
        left_tail = &left_tail[1..];
        right_tail = &right_tail[1..];
    }
}
