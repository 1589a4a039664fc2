use super::{FilterTable, Hit, mismatch};
use crate::error::{FilterError, Result};
use crate::filter::{Filter, FilterKind};
use crate::message::MatchTarget;
use compact_str::CompactString;
use std::collections::HashMap;
use tracing::debug;

const TABLE: &str = "action";

#[derive(Debug)]
struct Entry<T> {
    data: T,
    seq: u64,
}

/// Indexes action filters by action URI. Filters with an empty action set match every
/// message and are kept apart.
#[derive(Debug)]
pub struct ActionFilterTable<T> {
    actions: HashMap<CompactString, Vec<Filter>>,
    always: Vec<Filter>,
    entries: HashMap<Filter, Entry<T>>,
    next_seq: u64,
}

impl<T> Default for ActionFilterTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ActionFilterTable<T> {
    pub fn new() -> Self {
        debug!("action filter table created");
        Self { actions: HashMap::new(), always: Vec::new(), entries: HashMap::new(), next_seq: 0 }
    }
}

impl<T> FilterTable<T> for ActionFilterTable<T> {
    fn add(&mut self, filter: Filter, data: T) -> Result<()> {
        let FilterKind::Action(action) = filter.kind() else {
            return Err(mismatch(TABLE, &filter));
        };
        if self.entries.contains_key(&filter) {
            return Err(FilterError::DuplicateFilter);
        }
        if action.is_empty() {
            self.always.push(filter.clone());
        }
        for uri in action.actions() {
            self.actions.entry(uri.into()).or_default().push(filter.clone());
        }
        debug!(%filter, "action filter added");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(filter, Entry { data, seq });
        Ok(())
    }

    fn remove(&mut self, filter: &Filter) -> Result<Option<T>> {
        let Some(entry) = self.entries.remove(filter) else {
            return Ok(None);
        };
        if let FilterKind::Action(action) = filter.kind() {
            self.always.retain(|f| f != filter);
            for uri in action.actions() {
                if let Some(filters) = self.actions.get_mut(uri) {
                    filters.retain(|f| f != filter);
                    if filters.is_empty() {
                        self.actions.remove(uri);
                    }
                }
            }
        }
        debug!(%filter, "action filter removed");
        Ok(Some(entry.data))
    }

    fn clear(&mut self) {
        self.actions.clear();
        self.always.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, filter: &Filter) -> Option<&T> {
        self.entries.get(filter).map(|e| &e.data)
    }

    fn collect_matching<'a, M: MatchTarget>(&'a self, target: &M, out: &mut Vec<Hit<'a, T>>) -> Result<()> {
        let mut hits: Vec<&Filter> = self.always.iter().collect();
        if !self.actions.is_empty() {
            let addressing = target.addressing()?;
            if let Some(filters) = addressing.action.as_deref().and_then(|action| self.actions.get(action)) {
                hits.extend(filters);
            }
        }
        hits.sort_by_key(|f| self.entries.get(*f).map_or(u64::MAX, |e| e.seq));
        out.extend(hits.into_iter().filter_map(|f| self.entries.get(f).map(|e| (f, &e.data))));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ActionFilter;
    use crate::message::{EnvelopeVersion, Message};

    fn action(uris: &[&str]) -> Filter {
        ActionFilter::new(uris.iter().copied()).into()
    }

    fn message(action: &str) -> Message {
        Message::builder(EnvelopeVersion::Soap11).to("http://svc/").action(action).build().unwrap()
    }

    #[test]
    fn dispatches_on_action() {
        let mut table = ActionFilterTable::new();
        table.add(action(&["urn:get", "urn:put"]), "rw").unwrap();
        table.add(action(&["urn:get"]), "ro").unwrap();
        table.add(action(&[]), "any").unwrap();

        let mut values = Vec::new();
        assert!(table.get_matching_values(&message("urn:get"), &mut values).unwrap());
        assert_eq!(values, [&"rw", &"ro", &"any"]);

        values.clear();
        table.get_matching_values(&message("urn:delete"), &mut values).unwrap();
        assert_eq!(values, [&"any"]);
    }

    #[test]
    fn removal_drops_every_action_key() {
        let mut table = ActionFilterTable::new();
        let rw = action(&["urn:get", "urn:put"]);
        table.add(rw.clone(), 1).unwrap();
        assert_eq!(table.remove(&rw).unwrap(), Some(1));
        assert!(table.actions.is_empty());
        assert_eq!(table.get_matching_value(&message("urn:get")).unwrap(), None);
    }

    #[test]
    fn single_result_is_ambiguous_across_filters() {
        let mut table = ActionFilterTable::new();
        table.add(action(&["urn:get"]), 1).unwrap();
        table.add(action(&["urn:get"]), 2).unwrap();
        assert!(matches!(
            table.get_matching_filter(&message("urn:get")),
            Err(FilterError::AmbiguousMatch { .. })
        ));
    }
}
