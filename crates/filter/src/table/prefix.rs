use super::{FilterTable, Hit, mismatch};
use crate::error::{FilterError, Result};
use crate::filter::{Filter, FilterKind, is_path_prefix, normalize_address, path_len};
use crate::message::MatchTarget;
use crate::trie::Trie;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

const TABLE: &str = "prefix-endpoint-address";

#[derive(Debug)]
struct Entry<T> {
    data: T,
    key: String,
    include_host_name: bool,
    seq: u64,
}

/// Indexes prefix-endpoint-address filters in two tries of normalized addresses, one for
/// host-sensitive and one for host-insensitive filters.
///
/// Multi-result queries return every filter whose address is a path prefix of the message's
/// `To`. Single-result queries return the filter with the longest such path, whatever its host
/// mode; two filters sharing that longest path are ambiguous.
#[derive(Debug)]
pub struct PrefixEndpointAddressFilterTable<T> {
    with_host: Trie<Vec<Filter>>,
    without_host: Trie<Vec<Filter>>,
    entries: HashMap<Filter, Entry<T>>,
    next_seq: u64,
}

impl<T> Default for PrefixEndpointAddressFilterTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PrefixEndpointAddressFilterTable<T> {
    pub fn new() -> Self {
        debug!("prefix endpoint address filter table created");
        Self { with_host: Trie::new(), without_host: Trie::new(), entries: HashMap::new(), next_seq: 0 }
    }

    fn trie_mut(&mut self, include_host_name: bool) -> &mut Trie<Vec<Filter>> {
        if include_host_name { &mut self.with_host } else { &mut self.without_host }
    }

    /// Filters whose address covers `to`, with the path length of the covering prefix.
    ///
    /// Host-sensitive keys carry the host and host-insensitive keys do not, so only the path
    /// part is comparable across the two tries.
    fn covering<'a>(&'a self, to: &Url) -> Vec<(usize, &'a Filter)> {
        let mut found = Vec::new();
        for (trie, include_host_name) in [(&self.with_host, true), (&self.without_host, false)] {
            if trie.is_empty() {
                continue;
            }
            let candidate = normalize_address(to, include_host_name);
            for (prefix, filters) in trie.collect_prefixes(&candidate) {
                if is_path_prefix(prefix, &candidate) {
                    let len = path_len(prefix);
                    found.extend(filters.iter().map(|f| (len, f)));
                }
            }
        }
        found
    }

    fn to_address<M: MatchTarget>(target: &M) -> Result<Option<Url>> {
        let addressing = target.addressing()?;
        Ok(addressing.to.as_deref().and_then(|to| Url::parse(to).ok()))
    }

    fn hit<'a>(&'a self, filter: &'a Filter) -> Option<Hit<'a, T>> {
        self.entries.get(filter).map(|e| (filter, &e.data))
    }
}

impl<T> FilterTable<T> for PrefixEndpointAddressFilterTable<T> {
    fn add(&mut self, filter: Filter, data: T) -> Result<()> {
        let FilterKind::PrefixEndpointAddress(prefix) = filter.kind() else {
            return Err(mismatch(TABLE, &filter));
        };
        if self.entries.contains_key(&filter) {
            return Err(FilterError::DuplicateFilter);
        }
        let key = prefix.key().to_string();
        let include_host_name = prefix.include_host_name();
        self.trie_mut(include_host_name).add(&key, Vec::new).push(filter.clone());
        debug!(%filter, %key, "prefix endpoint address filter added");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(filter, Entry { data, key, include_host_name, seq });
        Ok(())
    }

    fn remove(&mut self, filter: &Filter) -> Result<Option<T>> {
        let Some(entry) = self.entries.remove(filter) else {
            return Ok(None);
        };
        let trie = self.trie_mut(entry.include_host_name);
        if let Some(filters) = trie.find_mut(&entry.key) {
            filters.retain(|f| f != filter);
            if filters.is_empty() {
                trie.remove(&entry.key);
            }
        }
        debug!(%filter, "prefix endpoint address filter removed");
        Ok(Some(entry.data))
    }

    fn clear(&mut self) {
        self.with_host.clear();
        self.without_host.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, filter: &Filter) -> Option<&T> {
        self.entries.get(filter).map(|e| &e.data)
    }

    fn collect_matching<'a, M: MatchTarget>(&'a self, target: &M, out: &mut Vec<Hit<'a, T>>) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let Some(to) = Self::to_address(target)? else {
            return Ok(());
        };
        let mut found = self.covering(&to);
        found.sort_by_key(|(_, f)| self.entries.get(*f).map_or(u64::MAX, |e| e.seq));
        out.extend(found.into_iter().filter_map(|(_, f)| self.hit(f)));
        Ok(())
    }

    fn get_matching_entry<'a, M: MatchTarget>(&'a self, target: &M) -> Result<Option<Hit<'a, T>>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        let Some(to) = Self::to_address(target)? else {
            return Ok(None);
        };
        let found = self.covering(&to);
        let Some(longest) = found.iter().map(|(len, _)| *len).max() else {
            return Ok(None);
        };
        let mut best: Vec<&Filter> = found.into_iter().filter(|(len, _)| *len == longest).map(|(_, f)| f).collect();
        if best.len() > 1 {
            return Err(FilterError::AmbiguousMatch { filters: best.into_iter().cloned().collect() });
        }
        Ok(best.pop().and_then(|f| self.hit(f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::PrefixEndpointAddressFilter;
    use crate::message::{EnvelopeVersion, Message};
    use rstest::rstest;

    fn prefix(address: &str, include_host_name: bool) -> Filter {
        PrefixEndpointAddressFilter::new(address, include_host_name).unwrap().into()
    }

    fn to(address: &str) -> Message {
        Message::builder(EnvelopeVersion::Soap12).to(address).action("urn:a").build().unwrap()
    }

    fn table() -> PrefixEndpointAddressFilterTable<&'static str> {
        let mut table = PrefixEndpointAddressFilterTable::new();
        table.add(prefix("http://svc/", true), "root").unwrap();
        table.add(prefix("http://svc/orders", true), "orders").unwrap();
        table.add(prefix("http://svc/orders/archive", true), "archive").unwrap();
        table
    }

    #[rstest]
    #[case("http://svc/orders/archive/2024", &["root", "orders", "archive"])]
    #[case("http://svc/orders/", &["root", "orders"])]
    #[case("http://svc/ordersx", &["root"])]
    #[case("http://other/orders", &[])]
    fn all_covering_prefixes_match(#[case] address: &str, #[case] expected: &[&str]) {
        let table = table();
        let mut values = Vec::new();
        table.get_matching_values(&to(address), &mut values).unwrap();
        assert_eq!(values.into_iter().copied().collect::<Vec<_>>(), expected);
    }

    #[rstest]
    #[case("http://svc/orders/archive/2024", Some("archive"))]
    #[case("http://SVC/Orders/7", Some("orders"))]
    #[case("http://svc/", Some("root"))]
    #[case("http://other/", None)]
    fn longest_prefix_wins(#[case] address: &str, #[case] expected: Option<&str>) {
        assert_eq!(table().get_matching_value(&to(address)).unwrap().copied(), expected);
    }

    #[test]
    fn equal_longest_prefixes_are_ambiguous() {
        let mut table = table();
        table.add(prefix("http://svc/orders", true), "orders-again").unwrap();
        let err = table.get_matching_value(&to("http://svc/orders/1")).unwrap_err();
        assert!(matches!(err, FilterError::AmbiguousMatch { ref filters } if filters.len() == 2));
        assert_eq!(table.get_matching_value(&to("http://svc/orders/archive")).unwrap(), Some(&"archive"));
    }

    #[test]
    fn host_insensitive_prefixes_cover_any_host() {
        let mut table = PrefixEndpointAddressFilterTable::new();
        table.add(prefix("http://ignored/api", false), "api").unwrap();
        assert_eq!(table.get_matching_value(&to("http://elsewhere/api/v1")).unwrap(), Some(&"api"));
    }

    fn mixed_hosts() -> PrefixEndpointAddressFilterTable<&'static str> {
        let mut table = PrefixEndpointAddressFilterTable::new();
        table.add(prefix("http://svc.example.com/a", true), "host-a").unwrap();
        table.add(prefix("http://any/a/b/c", false), "any-abc").unwrap();
        table.add(prefix("http://any/x", false), "any-x").unwrap();
        table.add(prefix("http://svc.example.com/x/y", true), "host-xy").unwrap();
        table
    }

    #[rstest]
    #[case("http://svc.example.com/a/b/c", Some("any-abc"))]
    #[case("http://svc.example.com/a/b", Some("host-a"))]
    #[case("http://elsewhere.example.com/a/b/c/d", Some("any-abc"))]
    #[case("http://svc.example.com/x/y/z", Some("host-xy"))]
    #[case("http://elsewhere/x/y/z", Some("any-x"))]
    #[case("http://elsewhere/a/b", None)]
    fn longest_path_wins_across_host_modes(#[case] address: &str, #[case] expected: Option<&str>) {
        assert_eq!(mixed_hosts().get_matching_value(&to(address)).unwrap().copied(), expected);
    }

    #[rstest]
    #[case("http://svc.example.com/a", "http://other/a", "http://svc.example.com/a/x")]
    #[case("http://s/orders", "http://a-much-longer-host-name/orders", "http://s/orders")]
    #[case("http://a-much-longer-host-name/orders", "http://s/orders", "http://a-much-longer-host-name/orders/1")]
    fn equal_paths_across_host_modes_are_ambiguous(
        #[case] with_host: &str,
        #[case] without_host: &str,
        #[case] address: &str,
    ) {
        let mut table = PrefixEndpointAddressFilterTable::new();
        table.add(prefix(with_host, true), "host").unwrap();
        table.add(prefix(without_host, false), "any").unwrap();
        let err = table.get_matching_value(&to(address)).unwrap_err();
        assert!(matches!(err, FilterError::AmbiguousMatch { ref filters } if filters.len() == 2));

        let mut values = Vec::new();
        table.get_matching_values(&to(address), &mut values).unwrap();
        assert_eq!(values.into_iter().copied().collect::<Vec<_>>(), ["host", "any"]);
    }

    #[test]
    fn removal_prunes_the_trie() {
        let mut table = table();
        let orders = table.entries.keys().find(|f| f.to_string().ends_with("/orders")).cloned().unwrap();
        assert_eq!(table.remove(&orders).unwrap(), Some("orders"));
        assert_eq!(table.get_matching_value(&to("http://svc/orders/1")).unwrap(), Some(&"root"));
        assert_eq!(table.len(), 2);
    }
}
