//! JSON description of a filter set.
//!
//! ```json
//! {
//!   "namespaces": { "s": "urn:sales" },
//!   "node_quota": 1000,
//!   "default_priority": 0,
//!   "filters": [
//!     { "name": "orders", "type": "xpath", "xpath": "/s12:Envelope/s12:Body/s:Order", "priority": 5 },
//!     { "name": "svc", "type": "endpoint", "address": "http://svc/", "headers": [] },
//!     { "name": "svc-tree", "type": "prefix", "address": "http://svc/" },
//!     { "name": "ping", "type": "action", "actions": ["urn:ping"] },
//!     { "name": "stored", "type": "xpath_xml", "xml": "<XPathMessageFilter>...</XPathMessageFilter>" },
//!     { "name": "rest", "type": "match_all", "priority": -10 }
//!   ]
//! }
//! ```

use crate::util::CliResult;
use anyhow::Context;
use msgfilter::{
    ActionFilter, EndpointAddressFilter, Filter, FilterTable, MessageFilterTable, NodeQuota,
    PrefixEndpointAddressFilter, TableOptions, XPathFilter, XPathMessageContext,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FilterSet {
    /// Prefix bindings added to the default message context of every XPath filter.
    #[serde(default)]
    pub namespaces: BTreeMap<String, String>,
    /// Quota applied to XPath filters that do not carry their own.
    #[serde(default)]
    pub node_quota: Option<i64>,
    #[serde(default)]
    pub default_priority: i32,
    pub filters: Vec<FilterEntry>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FilterEntry {
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(flatten)]
    pub spec: FilterSpec,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSpec {
    Xpath {
        xpath: String,
        #[serde(default)]
        node_quota: Option<i64>,
    },
    /// A serialized `XPathMessageFilter` element.
    XpathXml { xml: String },
    Endpoint {
        address: String,
        #[serde(default)]
        include_host_name: bool,
        #[serde(default)]
        headers: Vec<HeaderSpec>,
    },
    Prefix {
        address: String,
        #[serde(default)]
        include_host_name: bool,
    },
    Action {
        #[serde(default)]
        actions: Vec<String>,
    },
    MatchAll,
    MatchNone,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct HeaderSpec {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    pub value: String,
}

impl FilterSet {
    pub fn load(path: &Path) -> CliResult<Self> {
        let json = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid filter set {}", path.display()))
    }

    pub fn from_json(json: &str) -> CliResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn context(&self) -> XPathMessageContext {
        let mut ctx = XPathMessageContext::new();
        for (prefix, uri) in &self.namespaces {
            ctx.add_namespace(prefix, uri);
        }
        ctx
    }

    /// Compile every entry into one table keyed by entry name. Entries without a priority
    /// land in the default bucket.
    pub fn build(&self) -> CliResult<MessageFilterTable<String>> {
        let default_quota = self.node_quota.map(NodeQuota::new).transpose()?;
        let options = TableOptions::default().with_node_quota(default_quota.unwrap_or(NodeQuota::UNBOUNDED));
        let mut table = MessageFilterTable::new(options).with_default_priority(self.default_priority);
        let ctx = self.context();
        for entry in &self.filters {
            let filter = entry
                .spec
                .build(&ctx, default_quota)
                .with_context(|| format!("filter '{}' does not compile", entry.name))?;
            let priority = entry.priority.unwrap_or(self.default_priority);
            debug!(name = %entry.name, kind = filter.kind_name(), priority, "registering filter");
            table
                .add_with_priority(filter, entry.name.clone(), priority)
                .with_context(|| format!("filter '{}' cannot be registered", entry.name))?;
        }
        debug!(filters = table.len(), buckets = table.priorities().count(), "filter set ready");
        Ok(table)
    }
}

impl FilterSpec {
    pub fn build(&self, ctx: &XPathMessageContext, default_quota: Option<NodeQuota>) -> CliResult<Filter> {
        let filter = match self {
            Self::Xpath { xpath, node_quota } => {
                let mut filter = XPathFilter::with_context(xpath, ctx.clone())?;
                if let Some(quota) = node_quota.map(NodeQuota::new).transpose()?.or(default_quota) {
                    filter = filter.with_node_quota(quota);
                }
                filter.into()
            }
            Self::XpathXml { xml } => XPathFilter::read_xml(xml)?.into(),
            Self::Endpoint { address, include_host_name, headers } => headers
                .iter()
                .fold(EndpointAddressFilter::new(address, *include_host_name)?, |filter, h| {
                    filter.with_header(&h.namespace, &h.name, &h.value)
                })
                .into(),
            Self::Prefix { address, include_host_name } => {
                PrefixEndpointAddressFilter::new(address, *include_host_name)?.into()
            }
            Self::Action { actions } => ActionFilter::new(actions).into(),
            Self::MatchAll => Filter::match_all(),
            Self::MatchNone => Filter::match_none(),
        };
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msgfilter::FilterKind;
    use rstest::rstest;

    const SET: &str = r#"{
        "namespaces": { "s": "urn:sales" },
        "node_quota": 500,
        "filters": [
            { "name": "orders", "type": "xpath", "xpath": "/s12:Envelope/s12:Body/s:Order", "priority": 5 },
            { "name": "bounded", "type": "xpath", "xpath": "sm:action() = 'urn:a'", "node_quota": 20 },
            { "name": "svc", "type": "endpoint", "address": "http://svc/", "headers": [
                { "namespace": "urn:sales", "name": "Account", "value": "1" }
            ] },
            { "name": "tree", "type": "prefix", "address": "http://svc/", "include_host_name": true },
            { "name": "ping", "type": "action", "actions": ["urn:ping"] },
            { "name": "rest", "type": "match_all", "priority": -1 }
        ]
    }"#;

    #[rstest]
    fn sets_deserialize() {
        let set = FilterSet::from_json(SET).expect("json");
        assert_eq!(set.filters.len(), 6);
        assert_eq!(set.filters[0].priority, Some(5));
        assert_eq!(set.filters[4].spec, FilterSpec::Action { actions: vec!["urn:ping".into()] });
        assert_eq!(set.context().lookup_namespace("s"), Some("urn:sales"));
    }

    #[rstest]
    fn sets_build_into_priority_buckets() {
        let table = FilterSet::from_json(SET).expect("json").build().expect("table");
        assert_eq!(table.len(), 6);
        assert_eq!(table.priorities().collect::<Vec<_>>(), [5, 0, -1]);
    }

    #[rstest]
    fn per_filter_quota_overrides_the_set_default() {
        let set = FilterSet::from_json(SET).expect("json");
        let ctx = set.context();
        let quota = |spec: &FilterSpec| match spec.build(&ctx, Some(NodeQuota::new(500).expect("quota"))).expect("filter").kind() {
            FilterKind::XPath(f) => f.node_quota().get(),
            other => panic!("unexpected {}", other.name()),
        };
        assert_eq!(quota(&set.filters[0].spec), 500);
        assert_eq!(quota(&set.filters[1].spec), 20);
    }

    #[rstest]
    #[case(r#"{ "filters": [ { "name": "x", "type": "xpath", "xpath": "/a[" } ] }"#, "does not compile")]
    #[case(r#"{ "filters": [ { "name": "x", "type": "endpoint", "address": "relative/path" } ] }"#, "does not compile")]
    #[case(r#"{ "filters": [ { "name": "x", "type": "xpath", "xpath": "1", "node_quota": 0 } ] }"#, "does not compile")]
    fn bad_entries_name_the_filter(#[case] json: &str, #[case] expected: &str) {
        let err = FilterSet::from_json(json).expect("json").build().unwrap_err();
        assert!(format!("{err:#}").contains(expected), "{err:#}");
    }

    #[rstest]
    fn unknown_types_are_rejected() {
        assert!(FilterSet::from_json(r#"{ "filters": [ { "name": "x", "type": "regex" } ] }"#).is_err());
    }
}
