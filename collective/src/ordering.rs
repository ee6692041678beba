use std::collections::HashMap;

use comms::{SampleId, SampleRecord};

use crate::{CollectiveErr, Result};

/// Reorders `records` to follow the canonical identity order.
///
/// The output order only depends on `canonical`, never on which process
/// produced each record or in which order they were received.
///
/// # Arguments
/// * `records` - The gathered records, in any order.
/// * `canonical` - The full ordered list of sample identities.
///
/// # Returns
/// The records in canonical order.
///
/// # Errors
/// If `canonical` repeats an id, the record count doesn't match, or a record
/// is unknown or repeated.
pub fn order_by_identity(
    records: Vec<SampleRecord>,
    canonical: &[SampleId],
) -> Result<Vec<SampleRecord>> {
    if records.len() != canonical.len() {
        return Err(CollectiveErr::GatherCountMismatch {
            got: records.len(),
            expected: canonical.len(),
        });
    }

    let mut position: HashMap<&SampleId, usize> = HashMap::with_capacity(canonical.len());
    for (i, id) in canonical.iter().enumerate() {
        if position.insert(id, i).is_some() {
            return Err(CollectiveErr::AmbiguousOrder(id.clone()));
        }
    }

    let mut slots: Vec<Option<SampleRecord>> = (0..canonical.len()).map(|_| None).collect();

    for record in records {
        let Some(&i) = position.get(&record.id) else {
            return Err(CollectiveErr::UnknownSample(record.id));
        };

        if slots[i].is_some() {
            return Err(CollectiveErr::DuplicateSample(record.id));
        }

        slots[i] = Some(record);
    }

    // Equal counts with no unknown or repeated ids means every slot is filled.
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn record(id: &str) -> SampleRecord {
        SampleRecord::new(SampleId::new(id), BTreeMap::new(), 0.0)
    }

    fn ids(names: &[&str]) -> Vec<SampleId> {
        names.iter().map(|n| SampleId::new(*n)).collect()
    }

    #[test]
    fn reorders_to_canonical() {
        let canonical = ids(&["a", "b", "c"]);
        let got = order_by_identity(vec![record("c"), record("a"), record("b")], &canonical).unwrap();

        let got: Vec<_> = got.into_iter().map(|r| r.id).collect();
        assert_eq!(got, canonical);
    }

    #[test]
    fn rejects_missing_samples() {
        let canonical = ids(&["a", "b", "c"]);
        let err = order_by_identity(vec![record("a"), record("b")], &canonical).unwrap_err();
        assert!(matches!(
            err,
            CollectiveErr::GatherCountMismatch { got: 2, expected: 3 }
        ));
    }

    #[test]
    fn rejects_duplicates() {
        let canonical = ids(&["a", "b"]);
        let err = order_by_identity(vec![record("a"), record("a")], &canonical).unwrap_err();
        assert!(matches!(err, CollectiveErr::DuplicateSample(id) if id.as_str() == "a"));
    }

    #[test]
    fn rejects_unknown_samples() {
        let canonical = ids(&["a", "b"]);
        let err = order_by_identity(vec![record("a"), record("z")], &canonical).unwrap_err();
        assert!(matches!(err, CollectiveErr::UnknownSample(id) if id.as_str() == "z"));
    }

    #[test]
    fn rejects_a_canonical_order_with_repeated_ids() {
        let canonical = ids(&["a", "b", "a"]);
        let err = order_by_identity(vec![record("a"), record("b"), record("c")], &canonical)
            .unwrap_err();
        assert!(matches!(err, CollectiveErr::AmbiguousOrder(id) if id.as_str() == "a"));
    }
}
