//! Node quota enforcement.
//!
//! [`QuotaNavigator`] wraps any navigator and charges one unit per traversal step against a
//! [`NodeCounter`] shared by all of its clones. Once the counter is exhausted the next step
//! fails with [`NavigatorError::QuotaExceeded`]; results are never silently truncated.

use super::{NodeKind, NodePos, Navigator};
use crate::error::{FilterError, NavResult, NavigatorError};
use compact_str::CompactString;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Upper bound on navigator steps while evaluating one filter against one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeQuota(usize);

impl NodeQuota {
    pub const UNBOUNDED: Self = Self(usize::MAX);

    /// Validate a configured quota. Zero and negative values are rejected.
    pub fn new(value: i64) -> Result<Self, FilterError> {
        match usize::try_from(value) {
            Ok(v) if v > 0 => Ok(Self(v)),
            _ => Err(FilterError::InvalidNodeQuota(value)),
        }
    }

    pub const fn get(self) -> usize {
        self.0
    }

    pub const fn is_unbounded(self) -> bool {
        self.0 == usize::MAX
    }
}

impl Default for NodeQuota {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

impl fmt::Display for NodeQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeQuota {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.parse::<i64>() {
            Ok(v) => Self::new(v),
            // Larger than i64 but still a positive integer: clamp to the addressable maximum.
            Err(_) if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) => Ok(Self::UNBOUNDED),
            Err(e) => Err(FilterError::MalformedFilter { name: "NodeQuota".into(), reason: e.to_string() }),
        }
    }
}

/// Remaining navigator steps for one logical evaluation.
#[derive(Debug)]
pub struct NodeCounter {
    max: usize,
    remaining: Cell<usize>,
}

impl NodeCounter {
    pub fn new(quota: NodeQuota) -> Self {
        Self { max: quota.get(), remaining: Cell::new(quota.get()) }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn remaining(&self) -> usize {
        self.remaining.get()
    }

    /// Charge `units` steps. Fails without charging when fewer than `units` remain.
    pub fn charge(&self, units: usize) -> NavResult<()> {
        if units == 0 {
            return Ok(());
        }
        let remaining = self.remaining.get();
        if remaining < units {
            self.remaining.set(0);
            return Err(NavigatorError::QuotaExceeded { max: self.max });
        }
        self.remaining.set(remaining - units);
        Ok(())
    }

    pub fn marker(&self) -> usize {
        self.remaining.get()
    }

    /// Steps charged since `marker` was taken.
    pub fn elapsed(&self, marker: usize) -> usize {
        marker.saturating_sub(self.remaining.get())
    }

    pub fn reset(&self) {
        self.remaining.set(self.max);
    }
}

/// Quota-enforcing navigator decorator.
#[derive(Debug, Clone)]
pub struct QuotaNavigator<N> {
    inner: N,
    counter: Rc<NodeCounter>,
}

impl<N: Navigator> QuotaNavigator<N> {
    pub fn new(inner: N, quota: NodeQuota) -> Self {
        Self { inner, counter: Rc::new(NodeCounter::new(quota)) }
    }

    pub fn counter(&self) -> &NodeCounter {
        &self.counter
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }

    /// Charge the recorded cost of work that is being reused instead of repeated.
    pub fn increase_by(&self, units: usize) -> NavResult<()> {
        self.counter.charge(units)
    }

    pub fn marker(&self) -> usize {
        self.counter.marker()
    }

    pub fn elapsed(&self, marker: usize) -> usize {
        self.counter.elapsed(marker)
    }

    /// Restore the full quota before evaluating the next filter.
    pub fn reset_quota(&self) {
        self.counter.reset();
    }

    fn step(&self) -> NavResult<()> {
        self.counter.charge(1)
    }
}

impl<N: Navigator> Navigator for QuotaNavigator<N> {
    fn position(&self) -> NodePos {
        self.inner.position()
    }

    fn set_position(&mut self, pos: NodePos) -> NavResult<()> {
        self.inner.set_position(pos)
    }

    fn root_position(&self) -> NodePos {
        self.inner.root_position()
    }

    fn kind(&self) -> NodeKind {
        self.inner.kind()
    }

    fn local_name(&self) -> &str {
        self.inner.local_name()
    }

    fn namespace_uri(&self) -> &str {
        self.inner.namespace_uri()
    }

    fn prefix(&self) -> &str {
        self.inner.prefix()
    }

    fn string_value(&self) -> NavResult<CompactString> {
        self.inner.string_value()
    }

    fn move_to_root(&mut self) -> NavResult<()> {
        self.step()?;
        self.inner.move_to_root()
    }

    fn move_to_parent(&mut self) -> NavResult<bool> {
        self.step()?;
        self.inner.move_to_parent()
    }

    fn move_to_first_child(&mut self) -> NavResult<bool> {
        self.step()?;
        self.inner.move_to_first_child()
    }

    fn move_to_next(&mut self) -> NavResult<bool> {
        self.step()?;
        self.inner.move_to_next()
    }

    fn move_to_first_attribute(&mut self) -> NavResult<bool> {
        self.step()?;
        self.inner.move_to_first_attribute()
    }

    fn move_to_next_attribute(&mut self) -> NavResult<bool> {
        self.step()?;
        self.inner.move_to_next_attribute()
    }

    fn move_to_attribute(&mut self, local: &str, ns: &str) -> NavResult<bool> {
        self.step()?;
        self.inner.move_to_attribute(local, ns)
    }

    fn lookup_namespace(&self, prefix: &str) -> Option<CompactString> {
        self.inner.lookup_namespace(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BodyAccess, Document};
    use std::sync::Arc;

    fn navigator(quota: i64) -> QuotaNavigator<crate::model::DocumentNavigator> {
        let doc = Arc::new(Document::parse("<r><a/><b/><c/></r>").unwrap());
        QuotaNavigator::new(doc.navigator(BodyAccess::Allowed), NodeQuota::new(quota).unwrap())
    }

    #[test]
    fn rejects_non_positive_quota() {
        assert!(matches!(NodeQuota::new(0), Err(FilterError::InvalidNodeQuota(0))));
        assert!(matches!(NodeQuota::new(-3), Err(FilterError::InvalidNodeQuota(-3))));
        assert_eq!("12".parse::<NodeQuota>().unwrap().get(), 12);
        assert!("twelve".parse::<NodeQuota>().is_err());
    }

    #[test]
    fn next_step_after_exhaustion_fails() {
        let mut nav = navigator(2);
        assert!(nav.move_to_first_child().unwrap());
        assert!(nav.move_to_first_child().unwrap());
        assert_eq!(nav.move_to_next(), Err(NavigatorError::QuotaExceeded { max: 2 }));
    }

    #[test]
    fn clones_share_the_counter() {
        let mut nav = navigator(3);
        let mut other = nav.clone();
        nav.move_to_first_child().unwrap();
        other.move_to_first_child().unwrap();
        assert_eq!(nav.counter().remaining(), 1);
        let seek = nav.position();
        other.set_position(seek).unwrap();
        assert_eq!(other.counter().remaining(), 1);
    }

    #[test]
    fn amortized_charges_use_markers() {
        let mut nav = navigator(10);
        let marker = nav.marker();
        nav.move_to_first_child().unwrap();
        nav.move_to_first_child().unwrap();
        nav.move_to_next().unwrap();
        assert_eq!(nav.elapsed(marker), 3);
        nav.increase_by(3).unwrap();
        assert_eq!(nav.counter().remaining(), 4);
        assert_eq!(nav.increase_by(5), Err(NavigatorError::QuotaExceeded { max: 10 }));
        nav.reset_quota();
        assert_eq!(nav.counter().remaining(), 10);
    }
}
