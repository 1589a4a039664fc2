//! Compiled message filters.
//!
//! Filters written in a subset of XPath 1.0 are compiled into opcode chains and run by a
//! small stack machine over a SOAP envelope. Tables of filters share the leading location
//! paths of their expressions, answer literal comparisons from hash maps and prefix tries,
//! bound every filter by a node quota and report ambiguous single-result matches instead of
//! picking one.
//!
//! ```
//! use msgfilter::{EnvelopeVersion, Filter, FilterTable, Message, MessageFilterTable};
//!
//! let mut table = MessageFilterTable::default();
//! table.add(Filter::xpath("/s12:Envelope/s12:Header/wsa10:Action = 'urn:get'")?, "get")?;
//! let message = Message::builder(EnvelopeVersion::Soap12).action("urn:get").build()?;
//! assert_eq!(table.get_matching_value(&message)?, Some(&"get"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod compiler;
pub mod consts;
pub mod engine;
pub mod error;
pub mod filter;
pub mod message;
pub mod model;
pub mod parser;
pub mod subexpr;
pub mod table;
pub mod trie;

pub use compiler::{CompiledXPath, compile_xpath};
pub use engine::XPathResult;
pub use error::{DocumentError, FilterError, NavigatorError, Result};
pub use filter::{
    ActionFilter, EndpointAddressFilter, Filter, FilterKind, PrefixEndpointAddressFilter, XPathFilter,
    XPathMessageContext, XPathVariable,
};
pub use message::{EnvelopeVersion, MatchTarget, Message, MessageBuffer, MessageBuilder};
pub use model::NodeQuota;
pub use parser::parse_xpath;
pub use table::{
    ActionFilterTable, EndpointAddressFilterTable, FilterTable, MessageFilterTable, PrefixEndpointAddressFilterTable,
    SequentialFilterTable, TableOptions, XPathFilterTable,
};
pub use trie::Trie;
