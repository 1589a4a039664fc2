//! Filter handles and the concrete filter kinds.

mod address;
mod context;
mod xpath;

pub use address::{
    ActionFilter, AddressHeader, EndpointAddressFilter, PrefixEndpointAddressFilter, headers_satisfied,
    normalize_address, parse_address,
};
pub(crate) use address::{is_path_prefix, path_len};
pub use context::{XPathMessageContext, XPathVariable};
pub use xpath::XPathFilter;

use crate::error::Result;
use crate::message::MatchTarget;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug)]
pub enum FilterKind {
    XPath(XPathFilter),
    EndpointAddress(EndpointAddressFilter),
    PrefixEndpointAddress(PrefixEndpointAddressFilter),
    Action(ActionFilter),
    MatchAll,
    MatchNone,
}

impl FilterKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::XPath(_) => "xpath",
            Self::EndpointAddress(_) => "endpoint-address",
            Self::PrefixEndpointAddress(_) => "prefix-endpoint-address",
            Self::Action(_) => "action",
            Self::MatchAll => "match-all",
            Self::MatchNone => "match-none",
        }
    }
}

/// Shared handle to a filter. Clones are cheap and compare equal; two filters built
/// separately never do, whatever their content.
#[derive(Clone)]
pub struct Filter(Arc<FilterKind>);

impl Filter {
    pub fn new(kind: FilterKind) -> Self {
        Self(Arc::new(kind))
    }

    /// Compile an XPath filter against the default message context.
    pub fn xpath(expression: &str) -> Result<Self> {
        XPathFilter::new(expression).map(Self::from)
    }

    pub fn match_all() -> Self {
        Self::new(FilterKind::MatchAll)
    }

    pub fn match_none() -> Self {
        Self::new(FilterKind::MatchNone)
    }

    pub fn kind(&self) -> &FilterKind {
        &self.0
    }

    pub fn kind_name(&self) -> &'static str {
        self.0.name()
    }

    /// Evaluate this filter on its own, outside any table.
    pub fn matches<M: MatchTarget>(&self, target: &M) -> Result<bool> {
        match &*self.0 {
            FilterKind::XPath(f) => f.matches(target),
            FilterKind::EndpointAddress(f) => f.matches(target),
            FilterKind::PrefixEndpointAddress(f) => f.matches(target),
            FilterKind::Action(f) => f.matches(target),
            FilterKind::MatchAll => Ok(true),
            FilterKind::MatchNone => Ok(false),
        }
    }

    fn addr(&self) -> *const FilterKind {
        Arc::as_ptr(&self.0)
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Filter {}

impl Hash for Filter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({self})")
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            FilterKind::XPath(x) => write!(f, "xpath {x}"),
            FilterKind::EndpointAddress(a) => write!(f, "{a}"),
            FilterKind::PrefixEndpointAddress(p) => write!(f, "{p}"),
            FilterKind::Action(a) => write!(f, "{a}"),
            other => f.write_str(other.name()),
        }
    }
}

macro_rules! filter_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Filter {
            fn from(filter: $ty) -> Self {
                Self::new(FilterKind::$variant(filter))
            }
        })*
    };
}

filter_from! {
    XPathFilter => XPath,
    EndpointAddressFilter => EndpointAddress,
    PrefixEndpointAddressFilter => PrefixEndpointAddress,
    ActionFilter => Action,
}
