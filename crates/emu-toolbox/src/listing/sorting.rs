//! Name ordering for listings.

use std::cmp::Ordering;

use super::DirectoryEntry;

/// Case-insensitive, locale-naive comparison: ASCII letters are folded, every other byte
/// compares by value.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}

/// Sorts entries by name. Stable, so entries whose names differ only in case keep device order.
pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| compare_names(&a.name, &b.name));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u8, name: &str) -> DirectoryEntry {
        DirectoryEntry {
            device_index: index,
            is_file: true,
            name: name.to_string(),
            size_bytes: 0,
        }
    }

    fn names(entries: &[DirectoryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_case_insensitive_order() {
        let mut entries = vec![entry(0, "beta"), entry(1, "Alpha"), entry(2, "GAMMA"), entry(3, "alpha2")];
        sort_entries(&mut entries);
        assert_eq!(names(&entries), vec!["Alpha", "alpha2", "beta", "GAMMA"]);
    }

    #[test]
    fn test_device_index_survives_sorting() {
        let mut entries = vec![entry(9, "b"), entry(4, "a")];
        sort_entries(&mut entries);
        assert_eq!(entries[0].device_index, 4);
        assert_eq!(entries[1].device_index, 9);
    }

    #[test]
    fn test_ties_keep_device_order() {
        let mut entries = vec![entry(1, "README"), entry(2, "readme"), entry(3, "ReadMe")];
        sort_entries(&mut entries);
        let order: Vec<u8> = entries.iter().map(|e| e.device_index).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_bytewise_not_natural() {
        // "img_10" sorts before "img_2" byte-wise
        let mut entries = vec![entry(0, "img_2"), entry(1, "img_10")];
        sort_entries(&mut entries);
        assert_eq!(names(&entries), vec!["img_10", "img_2"]);
    }

    #[test]
    fn test_idempotent_and_matches_reference() {
        let raw = ["zeta", "Eta", "_under", "eta", "Zeta", "0num", "~tilde", "ABC", "abc"];
        let mut entries: Vec<_> = raw.iter().enumerate().map(|(i, n)| entry(i as u8, n)).collect();
        sort_entries(&mut entries);
        let once = entries.clone();
        sort_entries(&mut entries);
        assert_eq!(entries, once);

        let mut reference: Vec<&str> = raw.to_vec();
        reference.sort_by_key(|n| n.to_ascii_lowercase().into_bytes());
        assert_eq!(names(&entries), reference);
    }
}
