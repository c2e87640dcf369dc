//! Client set maintenance: which names to add, which records to drop, and
//! which numeric slot a new client gets.

use crate::{ClientRecord, Error, Result};
use std::collections::HashSet;
use std::ops::RangeInclusive;

/// Last-octet range handed out to WireGuard peers (`.1` is the server)
pub const WIREGUARD_HOST_RANGE: RangeInclusive<u32> = 2..=254;

/// Range of Xray Reality short ids
pub const XRAY_SHORT_ID_RANGE: RangeInclusive<u32> = 1..=99;

/// Requested names that are not registered yet, deduplicated, in request order
pub fn new_client_names<C: ClientRecord>(requested: &[String], existing: &[C]) -> Vec<String> {
    let mut seen: HashSet<&str> = existing.iter().map(|c| c.name()).collect();
    requested
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

/// Drop every record whose name is listed. Unknown names are ignored.
pub fn remove_clients<C: ClientRecord>(clients: Vec<C>, names: &[String]) -> Vec<C> {
    if names.is_empty() {
        return clients;
    }
    clients
        .into_iter()
        .filter(|c| !names.iter().any(|n| n == c.name()))
        .collect()
}

/// Smallest number in `range` that is not taken
pub fn allocate_lowest(range: RangeInclusive<u32>, taken: &[u32]) -> Result<u32> {
    let (start, end) = (*range.start(), *range.end());
    range.into_iter().find(|n| !taken.contains(n)).ok_or_else(|| {
        Error::exhausted(format!(
            "all numbers in {}..={} are already assigned",
            start, end
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Named(String);

    impl ClientRecord for Named {
        fn name(&self) -> &str {
            &self.0
        }
    }

    fn named(names: &[&str]) -> Vec<Named> {
        names.iter().map(|n| Named(n.to_string())).collect()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_new_names_skip_existing_and_duplicates() {
        let existing = named(&["alice", "bob"]);
        let requested = strings(&["carol", "alice", "dave", "carol"]);
        assert_eq!(
            new_client_names(&requested, &existing),
            strings(&["carol", "dave"])
        );
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let clients = named(&["alice", "bob"]);
        let after = remove_clients(clients.clone(), &strings(&["zed"]));
        assert_eq!(after, clients);
    }

    #[test]
    fn test_remove_filters_listed() {
        let clients = named(&["alice", "bob", "carol"]);
        let after = remove_clients(clients, &strings(&["bob", "zed"]));
        assert_eq!(after, named(&["alice", "carol"]));
    }

    #[test]
    fn test_allocate_fills_gaps_first() {
        assert_eq!(allocate_lowest(2..=254, &[]).unwrap(), 2);
        assert_eq!(allocate_lowest(2..=254, &[2, 3, 5]).unwrap(), 4);
        assert_eq!(allocate_lowest(1..=99, &[2, 3]).unwrap(), 1);
    }

    #[test]
    fn test_allocate_exhausted() {
        let taken: Vec<u32> = (1..=99).collect();
        let err = allocate_lowest(XRAY_SHORT_ID_RANGE, &taken).unwrap_err();
        assert!(matches!(err, Error::Exhausted(_)));
    }

    proptest! {
        #[test]
        fn prop_add_then_remove_restores_existing(
            existing in prop::collection::hash_set("[a-m]{1,6}", 0..12),
            requested in prop::collection::hash_set("[n-z]{1,6}", 0..12),
        ) {
            let existing: Vec<Named> = existing.into_iter().map(Named).collect();
            let requested: Vec<String> = requested.into_iter().collect();

            let mut clients = existing.clone();
            for name in new_client_names(&requested, &clients) {
                clients.push(Named(name));
            }
            prop_assert_eq!(clients.len(), existing.len() + requested.len());

            let restored = remove_clients(clients, &requested);
            prop_assert_eq!(restored, existing);
        }

        #[test]
        fn prop_allocation_is_smallest_free(
            taken in prop::collection::vec(2u32..=254, 0..60),
        ) {
            let allocated = allocate_lowest(WIREGUARD_HOST_RANGE, &taken).unwrap();
            prop_assert!(!taken.contains(&allocated));
            prop_assert!((2..allocated).all(|n| taken.contains(&n)));
        }
    }
}
