//! Entity trait: identity + continuity across state changes.

use std::collections::HashSet;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}

/// Remove later duplicates (by id), keeping first-seen order.
pub fn dedup_by_id<E: Entity>(entities: Vec<E>) -> Vec<E> {
    let mut seen = HashSet::with_capacity(entities.len());
    entities
        .into_iter()
        .filter(|e| seen.insert(e.id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Row(u32, &'static str);

    impl Entity for Row {
        type Id = u32;

        fn id(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let rows = vec![Row(1, "a"), Row(2, "b"), Row(1, "c"), Row(3, "d")];
        let out = dedup_by_id(rows);
        assert_eq!(out, vec![Row(1, "a"), Row(2, "b"), Row(3, "d")]);
    }
}
