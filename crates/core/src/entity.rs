//! Entity trait: identity that survives state changes.

/// Anything addressed by a stable, strongly-typed identifier.
///
/// Resolvers use this to deduplicate collections by identity rather than by
/// value (two reads of the same variant are the same variant).
pub trait Entity {
    type Id: Copy + Ord + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> Self::Id;
}

/// Keep the first occurrence of every entity, preserving encounter order.
pub fn distinct_by_id<'a, E, I>(items: I) -> Vec<&'a E>
where
    E: Entity + 'a,
    I: IntoIterator<Item = &'a E>,
{
    let mut seen = std::collections::BTreeSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Thing {
        id: u32,
        label: &'static str,
    }

    impl Entity for Thing {
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }
    }

    #[test]
    fn distinct_by_id_keeps_first_occurrence_in_order() {
        let things = [
            Thing { id: 2, label: "a" },
            Thing { id: 1, label: "b" },
            Thing { id: 2, label: "c" },
        ];

        let labels: Vec<_> = distinct_by_id(&things).iter().map(|t| t.label).collect();
        assert_eq!(labels, vec!["a", "b"]);
    }
}
