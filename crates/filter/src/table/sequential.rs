use super::{FilterTable, Hit};
use crate::error::{FilterError, Result};
use crate::filter::Filter;
use crate::message::MatchTarget;

/// Evaluates every filter on its own, in registration order. Accepts any filter kind.
#[derive(Debug)]
pub struct SequentialFilterTable<T> {
    entries: Vec<(Filter, T)>,
}

impl<T> Default for SequentialFilterTable<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> SequentialFilterTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Filter, &T)> {
        self.entries.iter().map(|(f, d)| (f, d))
    }
}

impl<T> FilterTable<T> for SequentialFilterTable<T> {
    fn add(&mut self, filter: Filter, data: T) -> Result<()> {
        if self.entries.iter().any(|(f, _)| *f == filter) {
            return Err(FilterError::DuplicateFilter);
        }
        self.entries.push((filter, data));
        Ok(())
    }

    fn remove(&mut self, filter: &Filter) -> Result<Option<T>> {
        Ok(self.entries.iter().position(|(f, _)| f == filter).map(|i| self.entries.remove(i).1))
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, filter: &Filter) -> Option<&T> {
        self.entries.iter().find(|(f, _)| f == filter).map(|(_, d)| d)
    }

    fn collect_matching<'a, M: MatchTarget>(&'a self, target: &M, out: &mut Vec<Hit<'a, T>>) -> Result<()> {
        for (filter, data) in &self.entries {
            if filter.matches(target)? {
                out.push((filter, data));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EnvelopeVersion, Message};

    #[test]
    fn evaluates_each_filter() {
        let mut table = SequentialFilterTable::new();
        let none = Filter::match_none();
        table.add(Filter::match_all(), "all").unwrap();
        table.add(none.clone(), "none").unwrap();
        table.add(Filter::xpath("/s11:Envelope").unwrap(), "soap11").unwrap();
        let message = Message::builder(EnvelopeVersion::Soap11).action("urn:a").build().unwrap();

        let mut values = Vec::new();
        table.get_matching_values(&message, &mut values).unwrap();
        assert_eq!(values, [&"all", &"soap11"]);
        assert!(matches!(table.add(none.clone(), "again"), Err(FilterError::DuplicateFilter)));
        assert_eq!(table.remove(&none).unwrap(), Some("none"));
        assert_eq!(table.len(), 2);
    }
}
