//! Error types for filter compilation, evaluation and table maintenance.
//!
//! Three families are kept apart:
//!
//! - compile-time failures ([`FilterError::Syntax`], [`FilterError::UnsupportedAxis`], ...)
//!   reject a filter before it is registered anywhere;
//! - evaluation-time failures ([`FilterError::QuotaExceeded`], [`FilterError::AmbiguousMatch`],
//!   [`FilterError::Navigator`]) are reported by match calls and leave tables untouched;
//! - defect-class failures ([`FilterError::DuplicateFilter`], [`FilterError::FilterTypeMismatch`],
//!   [`FilterError::Internal`]) indicate a programming error and are never retried.

use crate::filter::Filter;
use thiserror::Error;

/// Failure raised by a [`Navigator`](crate::model::Navigator) operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NavigatorError {
    /// The node quota configured for the current evaluation is used up.
    #[error("node quota of {max} exceeded")]
    QuotaExceeded {
        /// Configured maximum number of navigator moves.
        max: usize,
    },

    /// A header-only navigator was asked to enter the message body.
    #[error("the message body is not accessible through a header-only navigator")]
    BodyAccessDenied,

    /// A seek targeted a position outside the document.
    #[error("navigator position {0} is outside the document")]
    InvalidPosition(usize),
}

/// Failure raised while loading a document or an envelope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// The XML reader rejected the input.
    #[error("malformed XML at byte {position}: {message}")]
    Xml {
        /// Byte offset reported by the reader.
        position: u64,
        /// Reader message.
        message: String,
    },

    /// An element used a prefix with no namespace binding in scope.
    #[error("undeclared namespace prefix '{0}'")]
    UndeclaredPrefix(String),

    /// The document is well-formed XML but not a usable envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),
}

impl From<quick_xml::Error> for DocumentError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml { position: 0, message: err.to_string() }
    }
}

/// The error type for every fallible filter and table operation.
#[derive(Debug, Error, Clone)]
pub enum FilterError {
    /// The XPath expression is not syntactically valid.
    #[error("XPath syntax error: {0}")]
    Syntax(String),

    /// The expression uses an axis the engine does not evaluate.
    #[error("axis '{0}' is not supported")]
    UnsupportedAxis(&'static str),

    /// The expression uses a node test, literal or construct the engine does not evaluate.
    #[error("unsupported construct: {0}")]
    UnsupportedType(String),

    /// A function name/arity pair is not part of the function library.
    #[error("unknown function {name}#{arity}")]
    UnknownFunction {
        /// Function name as written (prefix included).
        name: String,
        /// Number of arguments at the call site.
        arity: usize,
    },

    /// A prefix in the expression has no binding in the namespace context.
    #[error("namespace prefix '{0}' is not bound")]
    UnknownPrefix(String),

    /// A `$variable` reference has no binding in the message context.
    #[error("variable '${0}' is not bound")]
    UnknownVariable(String),

    /// A serialized filter element is malformed.
    #[error("malformed filter document at '{name}': {reason}")]
    MalformedFilter {
        /// Offending element or attribute name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A node quota that is not strictly positive was supplied.
    #[error("node quota must be strictly positive, got {0}")]
    InvalidNodeQuota(i64),

    /// A filter address is not an absolute URI.
    #[error("invalid endpoint address '{address}': {reason}")]
    InvalidAddress {
        /// Address text as supplied.
        address: String,
        /// Parser message.
        reason: String,
    },

    /// Evaluation touched more nodes than the configured quota allows.
    #[error("node quota of {max} exceeded while evaluating filters")]
    QuotaExceeded {
        /// Configured maximum.
        max: usize,
    },

    /// More than one filter of the same priority matched a single-result query.
    #[error("{} filters of equal priority matched the message", filters.len())]
    AmbiguousMatch {
        /// Every filter that matched within the deciding priority bucket.
        filters: Vec<Filter>,
    },

    /// A navigator failure, annotated with the filter and opcode that triggered it.
    #[error("filter '{filter}' failed in {opcode}: {source}")]
    Navigator {
        /// Description of the filter under evaluation.
        filter: String,
        /// Opcode that issued the navigator call.
        opcode: &'static str,
        #[source]
        source: NavigatorError,
    },

    /// The message could not be loaded.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// The filter is already registered in this table.
    #[error("filter is already registered in this table")]
    DuplicateFilter,

    /// The filter kind does not belong in this table.
    #[error("filter kind '{found}' cannot be stored in a {table} table")]
    FilterTypeMismatch {
        /// Table flavour.
        table: &'static str,
        /// Kind of the rejected filter.
        found: &'static str,
    },

    /// An engine invariant was violated. Always a defect.
    #[error("internal evaluator error: {0}")]
    Internal(&'static str),
}

impl FilterError {
    /// Rewrap a navigator failure with positional context.
    ///
    /// Quota exhaustion keeps its own variant so callers can tell "not evaluable" apart
    /// from a filter that touched something it must not.
    pub fn from_navigator(err: NavigatorError, filter: impl Into<String>, opcode: &'static str) -> Self {
        match err {
            NavigatorError::QuotaExceeded { max } => Self::QuotaExceeded { max },
            source => Self::Navigator { filter: filter.into(), opcode, source },
        }
    }

    /// `true` for failures a caller may treat as "filter not evaluable".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. } | Self::Navigator { .. } | Self::Document(_))
    }
}

pub type Result<T, E = FilterError> = std::result::Result<T, E>;

/// Shorthand for navigator results.
pub type NavResult<T> = std::result::Result<T, NavigatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_failures_are_not_wrapped() {
        let err = FilterError::from_navigator(NavigatorError::QuotaExceeded { max: 7 }, "f", "select");
        assert!(matches!(err, FilterError::QuotaExceeded { max: 7 }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn body_access_keeps_context() {
        let err = FilterError::from_navigator(NavigatorError::BodyAccessDenied, "/s:Envelope", "select");
        let text = err.to_string();
        assert!(text.contains("/s:Envelope"));
        assert!(text.contains("select"));
    }

    #[test]
    fn defects_are_not_recoverable() {
        assert!(!FilterError::Internal("stack underflow").is_recoverable());
        assert!(!FilterError::DuplicateFilter.is_recoverable());
    }
}
