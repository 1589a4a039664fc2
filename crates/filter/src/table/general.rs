use super::{
    ActionFilterTable, EndpointAddressFilterTable, FilterTable, Hit, PrefixEndpointAddressFilterTable,
    SequentialFilterTable, TableOptions, XPathFilterTable,
};
use crate::error::{FilterError, Result};
use crate::filter::{Filter, FilterKind};
use crate::message::MatchTarget;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Slot {
    XPath,
    EndpointAddress,
    PrefixEndpointAddress,
    Action,
    Sequential,
}

impl Slot {
    fn of(filter: &Filter) -> Self {
        match filter.kind() {
            FilterKind::XPath(_) => Self::XPath,
            FilterKind::EndpointAddress(_) => Self::EndpointAddress,
            FilterKind::PrefixEndpointAddress(_) => Self::PrefixEndpointAddress,
            FilterKind::Action(_) => Self::Action,
            FilterKind::MatchAll | FilterKind::MatchNone => Self::Sequential,
        }
    }
}

#[derive(Debug)]
enum SubTable<T> {
    XPath(XPathFilterTable<T>),
    EndpointAddress(EndpointAddressFilterTable<T>),
    PrefixEndpointAddress(PrefixEndpointAddressFilterTable<T>),
    Action(ActionFilterTable<T>),
    Sequential(SequentialFilterTable<T>),
}

/// Forward a call to whichever table a [`SubTable`] holds.
macro_rules! dispatch {
    ($table:expr, $t:ident => $body:expr) => {
        match $table {
            SubTable::XPath($t) => $body,
            SubTable::EndpointAddress($t) => $body,
            SubTable::PrefixEndpointAddress($t) => $body,
            SubTable::Action($t) => $body,
            SubTable::Sequential($t) => $body,
        }
    };
}

impl<T> SubTable<T> {
    fn new(slot: Slot, options: TableOptions) -> Self {
        match slot {
            Slot::XPath => Self::XPath(XPathFilterTable::new(options)),
            Slot::EndpointAddress => Self::EndpointAddress(EndpointAddressFilterTable::new()),
            Slot::PrefixEndpointAddress => Self::PrefixEndpointAddress(PrefixEndpointAddressFilterTable::new()),
            Slot::Action => Self::Action(ActionFilterTable::new()),
            Slot::Sequential => Self::Sequential(SequentialFilterTable::new()),
        }
    }

    fn add(&mut self, filter: Filter, data: T) -> Result<()> {
        dispatch!(self, t => t.add(filter, data))
    }

    fn remove(&mut self, filter: &Filter) -> Result<Option<T>> {
        dispatch!(self, t => t.remove(filter))
    }

    fn len(&self) -> usize {
        dispatch!(self, t => t.len())
    }

    fn get(&self, filter: &Filter) -> Option<&T> {
        dispatch!(self, t => t.get(filter))
    }

    fn collect_matching<'a, M: MatchTarget>(&'a self, target: &M, out: &mut Vec<Hit<'a, T>>) -> Result<()> {
        dispatch!(self, t => t.collect_matching(target, out))
    }

    fn get_matching_entry<'a, M: MatchTarget>(&'a self, target: &M) -> Result<Option<Hit<'a, T>>> {
        dispatch!(self, t => t.get_matching_entry(target))
    }
}

/// Every filter of one priority, one sub-table per filter kind.
#[derive(Debug)]
struct Bucket<T> {
    tables: BTreeMap<Slot, SubTable<T>>,
}

/// A table accepting every filter kind, ordered by priority.
///
/// Filters are grouped by priority, highest first. Single-result queries stop at the first
/// priority that produces a match and fail if that priority produced more than one.
/// Multi-result queries return the matches of every priority, highest first.
#[derive(Debug)]
pub struct MessageFilterTable<T> {
    options: TableOptions,
    buckets: BTreeMap<Reverse<i32>, Bucket<T>>,
    priorities: HashMap<Filter, i32>,
    default_priority: i32,
}

impl<T> Default for MessageFilterTable<T> {
    fn default() -> Self {
        Self::new(TableOptions::default())
    }
}

impl<T> MessageFilterTable<T> {
    pub fn new(options: TableOptions) -> Self {
        debug!(node_quota = %options.node_quota, "message filter table created");
        Self { options, buckets: BTreeMap::new(), priorities: HashMap::new(), default_priority: 0 }
    }

    /// Priority used by [`FilterTable::add`].
    #[must_use]
    pub fn with_default_priority(mut self, priority: i32) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn options(&self) -> TableOptions {
        self.options
    }

    pub fn add_with_priority(&mut self, filter: Filter, data: T, priority: i32) -> Result<()> {
        if self.priorities.contains_key(&filter) {
            return Err(FilterError::DuplicateFilter);
        }
        let slot = Slot::of(&filter);
        let options = self.options;
        let bucket = self.buckets.entry(Reverse(priority)).or_insert_with(|| {
            debug!(priority, "priority bucket created");
            Bucket { tables: BTreeMap::new() }
        });
        let table = bucket.tables.entry(slot).or_insert_with(|| SubTable::new(slot, options));
        let added = table.add(filter.clone(), data);
        if added.is_err() && table.len() == 0 {
            bucket.tables.remove(&slot);
            if bucket.tables.is_empty() {
                self.buckets.remove(&Reverse(priority));
            }
        }
        added?;
        debug!(%filter, priority, "filter added");
        self.priorities.insert(filter, priority);
        Ok(())
    }

    pub fn priority(&self, filter: &Filter) -> Option<i32> {
        self.priorities.get(filter).copied()
    }

    /// Registered filters with their priorities.
    pub fn filters(&self) -> impl Iterator<Item = (&Filter, i32)> {
        self.priorities.iter().map(|(f, p)| (f, *p))
    }

    /// Distinct priorities in use, highest first.
    pub fn priorities(&self) -> impl Iterator<Item = i32> + '_ {
        self.buckets.keys().map(|Reverse(p)| *p)
    }

    /// The first match of the highest matching priority, without the ambiguity check.
    ///
    /// Within a priority, filters of one kind are checked before the next kind, each kind in
    /// registration order.
    pub fn get_first_matching<'a, M: MatchTarget>(&'a self, target: &M) -> Result<Option<Hit<'a, T>>> {
        let mut hits = Vec::new();
        for bucket in self.buckets.values() {
            for table in bucket.tables.values() {
                table.collect_matching(target, &mut hits)?;
                if let Some(&hit) = hits.first() {
                    return Ok(Some(hit));
                }
            }
        }
        Ok(None)
    }
}

impl<T> FilterTable<T> for MessageFilterTable<T> {
    fn add(&mut self, filter: Filter, data: T) -> Result<()> {
        self.add_with_priority(filter, data, self.default_priority)
    }

    fn remove(&mut self, filter: &Filter) -> Result<Option<T>> {
        let Some(&priority) = self.priorities.get(filter) else {
            return Ok(None);
        };
        let slot = Slot::of(filter);
        let Some(bucket) = self.buckets.get_mut(&Reverse(priority)) else {
            return Err(FilterError::Internal("filter priority without bucket"));
        };
        let Some(table) = bucket.tables.get_mut(&slot) else {
            return Err(FilterError::Internal("filter kind without sub-table"));
        };
        let data = table.remove(filter)?;
        if table.len() == 0 {
            bucket.tables.remove(&slot);
            debug!(priority, ?slot, "sub-table retired");
        }
        if bucket.tables.is_empty() {
            self.buckets.remove(&Reverse(priority));
            debug!(priority, "priority bucket retired");
        }
        self.priorities.remove(filter);
        debug!(%filter, priority, "filter removed");
        Ok(data)
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.priorities.clear();
    }

    fn len(&self) -> usize {
        self.priorities.len()
    }

    fn get(&self, filter: &Filter) -> Option<&T> {
        let priority = self.priorities.get(filter)?;
        self.buckets.get(&Reverse(*priority))?.tables.get(&Slot::of(filter))?.get(filter)
    }

    fn collect_matching<'a, M: MatchTarget>(&'a self, target: &M, out: &mut Vec<Hit<'a, T>>) -> Result<()> {
        for bucket in self.buckets.values() {
            for table in bucket.tables.values() {
                table.collect_matching(target, out)?;
            }
        }
        Ok(())
    }

    fn get_matching_entry<'a, M: MatchTarget>(&'a self, target: &M) -> Result<Option<Hit<'a, T>>> {
        for bucket in self.buckets.values() {
            let mut found: Vec<Hit<'a, T>> = Vec::new();
            for table in bucket.tables.values() {
                match table.get_matching_entry(target) {
                    Ok(Some(hit)) => found.push(hit),
                    Ok(None) => {}
                    Err(FilterError::AmbiguousMatch { mut filters }) => {
                        filters.extend(found.iter().map(|(f, _)| (*f).clone()));
                        return Err(FilterError::AmbiguousMatch { filters });
                    }
                    Err(err) => return Err(err),
                }
            }
            match found.len() {
                0 => {}
                1 => return Ok(found.pop()),
                _ => {
                    return Err(FilterError::AmbiguousMatch { filters: found.into_iter().map(|(f, _)| f.clone()).collect() });
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ActionFilter, EndpointAddressFilter, PrefixEndpointAddressFilter};
    use crate::message::{EnvelopeVersion, Message};

    fn message() -> Message {
        Message::builder(EnvelopeVersion::Soap12).to("http://svc/orders/1").action("urn:get").build().unwrap()
    }

    #[test]
    fn higher_priority_shadows_lower() {
        let mut table = MessageFilterTable::default();
        table.add_with_priority(Filter::match_all(), "fallback", -1).unwrap();
        table.add_with_priority(ActionFilter::new(["urn:get"]).into(), "get", 5).unwrap();
        assert_eq!(table.get_matching_value(&message()).unwrap(), Some(&"get"));

        let mut values = Vec::new();
        table.get_matching_values(&message(), &mut values).unwrap();
        assert_eq!(values, [&"get", &"fallback"]);
        assert_eq!(table.get_first_matching(&message()).unwrap().map(|(_, v)| *v), Some("get"));
    }

    #[test]
    fn equal_priority_across_kinds_is_ambiguous() {
        let mut table = MessageFilterTable::default();
        table.add(ActionFilter::new(["urn:get"]).into(), "get").unwrap();
        table.add(PrefixEndpointAddressFilter::new("http://svc/orders", true).unwrap().into(), "orders").unwrap();
        table.add(EndpointAddressFilter::new("http://svc/elsewhere", true).unwrap().into(), "elsewhere").unwrap();
        match table.get_matching_value(&message()) {
            Err(FilterError::AmbiguousMatch { filters }) => assert_eq!(filters.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn a_lower_priority_is_consulted_when_the_higher_has_no_match() {
        let mut table = MessageFilterTable::default();
        table.add_with_priority(ActionFilter::new(["urn:put"]).into(), "put", 10).unwrap();
        table.add_with_priority(Filter::xpath("/s12:Envelope").unwrap(), "envelope", 1).unwrap();
        assert_eq!(table.get_matching_value(&message()).unwrap(), Some(&"envelope"));
    }

    #[test]
    fn emptied_buckets_are_retired() {
        let mut table = MessageFilterTable::default();
        let high = Filter::match_all();
        table.add_with_priority(high.clone(), 1, 3).unwrap();
        table.add_with_priority(Filter::match_all(), 2, 0).unwrap();
        assert_eq!(table.priorities().collect::<Vec<_>>(), [3, 0]);
        assert_eq!(table.get(&high), Some(&1));
        assert_eq!(table.remove(&high).unwrap(), Some(1));
        assert_eq!(table.priorities().collect::<Vec<_>>(), [0]);
        assert_eq!(table.get_matching_value(&message()).unwrap(), Some(&2));
        assert!(table.remove(&high).unwrap().is_none());
    }

    #[test]
    fn duplicates_are_rejected_across_priorities() {
        let mut table = MessageFilterTable::default();
        let f = Filter::match_none();
        table.add_with_priority(f.clone(), (), 1).unwrap();
        assert!(matches!(table.add_with_priority(f, (), 2), Err(FilterError::DuplicateFilter)));
        assert_eq!(table.priorities().count(), 1);
    }

    #[test]
    fn first_match_skips_the_ambiguity_check() {
        let mut table = MessageFilterTable::default();
        table.add(Filter::match_all(), "a").unwrap();
        table.add(Filter::match_all(), "b").unwrap();
        assert!(table.get_matching_value(&message()).is_err());
        assert_eq!(table.get_first_matching(&message()).unwrap().map(|(_, v)| *v), Some("a"));
    }
}
