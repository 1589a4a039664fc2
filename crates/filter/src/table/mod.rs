//! Filter tables: registries of filters with associated data, answering which filters match
//! a message.
//!
//! Every table implements [`FilterTable`]. Specialized tables accept one filter kind and
//! index it; [`MessageFilterTable`] accepts any kind, keeps one specialized sub-table per
//! kind and priority, and enforces the single-result ambiguity rule across them.

mod action;
mod address;
mod general;
mod prefix;
mod sequential;
mod xpath;

pub use action::ActionFilterTable;
pub use address::EndpointAddressFilterTable;
pub use general::MessageFilterTable;
pub use prefix::PrefixEndpointAddressFilterTable;
pub use sequential::SequentialFilterTable;
pub use xpath::XPathFilterTable;

use crate::engine::ScratchPool;
use crate::error::{FilterError, Result};
use crate::filter::Filter;
use crate::message::MatchTarget;
use crate::model::NodeQuota;

/// A matching filter and its data.
pub type Hit<'a, T> = (&'a Filter, &'a T);

/// Settings shared by the tables that evaluate XPath filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    /// Navigator steps allowed per filter per message.
    pub node_quota: NodeQuota,
    /// Idle processing contexts kept for reuse.
    pub scratch_capacity: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self { node_quota: NodeQuota::UNBOUNDED, scratch_capacity: ScratchPool::DEFAULT_CAPACITY }
    }
}

impl TableOptions {
    #[must_use]
    pub fn with_node_quota(mut self, node_quota: NodeQuota) -> Self {
        self.node_quota = node_quota;
        self
    }

    #[must_use]
    pub fn with_scratch_capacity(mut self, scratch_capacity: usize) -> Self {
        self.scratch_capacity = scratch_capacity;
        self
    }
}

/// A registry of filters with associated data.
///
/// Single-result queries fail with [`FilterError::AmbiguousMatch`] instead of picking one of
/// several equally ranked matches. Multi-result queries return every match in registration
/// order.
pub trait FilterTable<T> {
    /// Register `filter`. Fails with [`FilterError::DuplicateFilter`] if it is already present.
    fn add(&mut self, filter: Filter, data: T) -> Result<()>;

    /// Unregister `filter`, returning its data.
    fn remove(&mut self, filter: &Filter) -> Result<Option<T>>;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, filter: &Filter) -> Option<&T>;

    /// Append every matching filter to `out`.
    fn collect_matching<'a, M: MatchTarget>(&'a self, target: &M, out: &mut Vec<Hit<'a, T>>) -> Result<()>;

    /// The single matching filter, if any.
    fn get_matching_entry<'a, M: MatchTarget>(&'a self, target: &M) -> Result<Option<Hit<'a, T>>> {
        let mut hits = Vec::new();
        self.collect_matching(target, &mut hits)?;
        single(hits)
    }

    fn get_matching_value<M: MatchTarget>(&self, target: &M) -> Result<Option<&T>> {
        Ok(self.get_matching_entry(target)?.map(|(_, data)| data))
    }

    fn get_matching_filter<M: MatchTarget>(&self, target: &M) -> Result<Option<Filter>> {
        Ok(self.get_matching_entry(target)?.map(|(filter, _)| filter.clone()))
    }

    /// Append the data of every matching filter; `true` if anything matched.
    fn get_matching_values<'a, M: MatchTarget>(&'a self, target: &M, results: &mut Vec<&'a T>) -> Result<bool> {
        let mut hits = Vec::new();
        self.collect_matching(target, &mut hits)?;
        results.extend(hits.iter().map(|(_, data)| *data));
        Ok(!hits.is_empty())
    }

    /// Append every matching filter; `true` if anything matched.
    fn get_matching_filters<M: MatchTarget>(&self, target: &M, results: &mut Vec<Filter>) -> Result<bool> {
        let mut hits = Vec::new();
        self.collect_matching(target, &mut hits)?;
        results.extend(hits.iter().map(|(filter, _)| (*filter).clone()));
        Ok(!hits.is_empty())
    }
}

/// Reduce a hit list to at most one hit.
pub(crate) fn single<T>(mut hits: Vec<Hit<'_, T>>) -> Result<Option<Hit<'_, T>>> {
    match hits.len() {
        0 | 1 => Ok(hits.pop()),
        _ => Err(FilterError::AmbiguousMatch { filters: hits.into_iter().map(|(f, _)| f.clone()).collect() }),
    }
}

/// Reject a filter whose kind the table does not index.
pub(crate) fn mismatch(table: &'static str, filter: &Filter) -> FilterError {
    FilterError::FilterTypeMismatch { table, found: filter.kind_name() }
}
