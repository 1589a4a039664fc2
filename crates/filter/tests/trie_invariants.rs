use msgfilter::Trie;
use msgfilter::trie::{TrieSegment, TrieTraverser};
use rstest::rstest;

/// Every segment below the root carries a payload or branches.
fn assert_minimal<T>(segment: &TrieSegment<T>, is_root: bool) {
    if !is_root {
        assert!(segment.data().is_some() || segment.children().len() >= 2, "segment '{}{}' is redundant", segment.first(), segment.tail());
    }
    for pair in segment.children().windows(2) {
        assert!(pair[0].first() < pair[1].first());
    }
    for child in segment.children() {
        assert_minimal(child, false);
    }
}

const ENDPOINTS: [&str; 7] = [
    "http://svc/",
    "http://svc/orders",
    "http://svc/orders/archive",
    "http://svc/ordinal",
    "http://other/",
    "urn:local",
    "http://svc/orders/ärchiv",
];

#[rstest]
#[case(&[0, 1, 2, 3, 4, 5, 6])]
#[case(&[6, 5, 4, 3, 2, 1, 0])]
#[case(&[3, 0, 6, 1, 5, 2, 4])]
fn shape_does_not_depend_on_insertion_order(#[case] order: &[usize]) {
    let mut reference = Trie::new();
    for (i, key) in ENDPOINTS.iter().enumerate() {
        reference.insert(key, i);
    }
    let mut trie = Trie::new();
    for &i in order {
        trie.insert(ENDPOINTS[i], i);
        assert_minimal(trie.root(), true);
    }
    assert_eq!(trie.root(), reference.root());
    assert_eq!(trie.len(), ENDPOINTS.len());
}

#[test]
fn removal_restores_the_smaller_trie() {
    let mut trie = Trie::new();
    for key in &ENDPOINTS[..3] {
        trie.insert(key, key.len());
    }
    let before = trie.clone();
    for key in &ENDPOINTS[3..] {
        trie.insert(key, key.len());
    }
    for key in &ENDPOINTS[3..] {
        assert_eq!(trie.remove(key), Some(key.len()));
        assert_minimal(trie.root(), true);
    }
    assert_eq!(trie, before);
}

#[test]
fn prefixes_come_back_shortest_first() {
    let mut trie = Trie::new();
    for (i, key) in ENDPOINTS.iter().enumerate() {
        trie.insert(key, i);
    }
    let found: Vec<(&str, usize)> =
        trie.collect_prefixes("http://svc/orders/archive/2024").into_iter().map(|(p, v)| (p, *v)).collect();
    assert_eq!(found, [("http://svc/", 0), ("http://svc/orders", 1), ("http://svc/orders/archive", 2)]);
    assert!(trie.collect_prefixes("http://sv").is_empty());
}

#[test]
fn traversal_stops_at_the_deepest_full_segment() {
    let mut trie = Trie::new();
    trie.insert("http://svc/orders", ());
    trie.insert("http://svc/ordinal", ());
    let mut walk = TrieTraverser::new(&trie, "http://svc/ordering");
    while walk.move_next() {}
    assert_eq!(walk.consumed(), "http://svc/ord");
    assert_eq!(walk.remaining(), "ering");
    assert!(walk.segment().data().is_none());
}
