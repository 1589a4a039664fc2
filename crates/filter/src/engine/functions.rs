//! Function library: the XPath 1.0 core set plus the message functions bound to the
//! `sm` namespace.

use super::Fault;
use super::context::ContextItem;
use super::value::{SequencePool, Value, is_xml_whitespace, node_string};
use crate::consts::{BODY, HEADER, MESSAGE_FUNCTIONS_NS, XML_URI};
use crate::message::{self, AddressingHeader};
use crate::model::{NodeKind, Navigator};
use compact_str::CompactString;
use itertools::Itertools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Last,
    Position,
    Count,
    LocalName,
    NamespaceUri,
    Name,
    String,
    Concat,
    StartsWith,
    Contains,
    SubstringBefore,
    SubstringAfter,
    Substring,
    StringLength,
    NormalizeSpace,
    Translate,
    Boolean,
    Not,
    True,
    False,
    Lang,
    Number,
    Sum,
    Floor,
    Ceiling,
    Round,
    Envelope,
    Header,
    Body,
    SoapUri,
    To,
    Action,
    MessageId,
    RelatesTo,
    ReplyTo,
    From,
    FaultTo,
}

/// How a call site binds to a [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub func: Function,
    /// The call omitted its node argument; the compiler supplies the context node.
    pub takes_context_node: bool,
}

impl Function {
    /// Look up `ns:local` with `argc` arguments. Core functions live in the empty namespace.
    pub fn resolve(ns: &str, local: &str, argc: usize) -> Option<Resolved> {
        let func = if ns.is_empty() {
            Self::core(local)?
        } else if ns == MESSAGE_FUNCTIONS_NS {
            Self::message(local)?
        } else {
            return None;
        };
        let (min, max) = func.arity();
        if argc < min || argc > max {
            return None;
        }
        let takes_context_node = argc == 0 && func.defaults_to_context_node();
        Some(Resolved { func, takes_context_node })
    }

    fn core(local: &str) -> Option<Self> {
        Some(match local {
            "last" => Self::Last,
            "position" => Self::Position,
            "count" => Self::Count,
            "local-name" => Self::LocalName,
            "namespace-uri" => Self::NamespaceUri,
            "name" => Self::Name,
            "string" => Self::String,
            "concat" => Self::Concat,
            "starts-with" => Self::StartsWith,
            "contains" => Self::Contains,
            "substring-before" => Self::SubstringBefore,
            "substring-after" => Self::SubstringAfter,
            "substring" => Self::Substring,
            "string-length" => Self::StringLength,
            "normalize-space" => Self::NormalizeSpace,
            "translate" => Self::Translate,
            "boolean" => Self::Boolean,
            "not" => Self::Not,
            "true" => Self::True,
            "false" => Self::False,
            "lang" => Self::Lang,
            "number" => Self::Number,
            "sum" => Self::Sum,
            "floor" => Self::Floor,
            "ceiling" => Self::Ceiling,
            "round" => Self::Round,
            _ => return None,
        })
    }

    fn message(local: &str) -> Option<Self> {
        Some(match local {
            "envelope" => Self::Envelope,
            "header" => Self::Header,
            "body" => Self::Body,
            "soap-uri" => Self::SoapUri,
            "to" => Self::To,
            "action" => Self::Action,
            "message-id" => Self::MessageId,
            "relates-to" => Self::RelatesTo,
            "reply-to" => Self::ReplyTo,
            "from" => Self::From,
            "fault-to" => Self::FaultTo,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Last => "last",
            Self::Position => "position",
            Self::Count => "count",
            Self::LocalName => "local-name",
            Self::NamespaceUri => "namespace-uri",
            Self::Name => "name",
            Self::String => "string",
            Self::Concat => "concat",
            Self::StartsWith => "starts-with",
            Self::Contains => "contains",
            Self::SubstringBefore => "substring-before",
            Self::SubstringAfter => "substring-after",
            Self::Substring => "substring",
            Self::StringLength => "string-length",
            Self::NormalizeSpace => "normalize-space",
            Self::Translate => "translate",
            Self::Boolean => "boolean",
            Self::Not => "not",
            Self::True => "true",
            Self::False => "false",
            Self::Lang => "lang",
            Self::Number => "number",
            Self::Sum => "sum",
            Self::Floor => "floor",
            Self::Ceiling => "ceiling",
            Self::Round => "round",
            Self::Envelope => "sm:envelope",
            Self::Header => "sm:header",
            Self::Body => "sm:body",
            Self::SoapUri => "sm:soap-uri",
            Self::To => "sm:to",
            Self::Action => "sm:action",
            Self::MessageId => "sm:message-id",
            Self::RelatesTo => "sm:relates-to",
            Self::ReplyTo => "sm:reply-to",
            Self::From => "sm:from",
            Self::FaultTo => "sm:fault-to",
        }
    }

    /// Accepted argument counts, inclusive.
    pub const fn arity(self) -> (usize, usize) {
        match self {
            Self::Last | Self::Position | Self::True | Self::False => (0, 0),
            Self::LocalName
            | Self::NamespaceUri
            | Self::Name
            | Self::String
            | Self::StringLength
            | Self::NormalizeSpace
            | Self::Number => (0, 1),
            Self::Count
            | Self::Boolean
            | Self::Not
            | Self::Lang
            | Self::Sum
            | Self::Floor
            | Self::Ceiling
            | Self::Round => (1, 1),
            Self::StartsWith | Self::Contains | Self::SubstringBefore | Self::SubstringAfter => (2, 2),
            Self::Substring => (2, 3),
            Self::Translate => (3, 3),
            Self::Concat => (2, usize::MAX),
            Self::Envelope
            | Self::Header
            | Self::Body
            | Self::SoapUri
            | Self::To
            | Self::Action
            | Self::MessageId
            | Self::RelatesTo
            | Self::ReplyTo
            | Self::From
            | Self::FaultTo => (0, 0),
        }
    }

    const fn defaults_to_context_node(self) -> bool {
        matches!(
            self,
            Self::LocalName
                | Self::NamespaceUri
                | Self::Name
                | Self::String
                | Self::StringLength
                | Self::NormalizeSpace
                | Self::Number
        )
    }

    /// Zero-argument functions whose node-set result does not depend on the context node.
    pub const fn is_node_set_starter(self) -> bool {
        matches!(self, Self::Envelope | Self::Header | Self::Body)
    }

    const fn addressing_header(self) -> Option<AddressingHeader> {
        Some(match self {
            Self::To => AddressingHeader::To,
            Self::Action => AddressingHeader::Action,
            Self::MessageId => AddressingHeader::MessageId,
            Self::RelatesTo => AddressingHeader::RelatesTo,
            Self::ReplyTo => AddressingHeader::ReplyTo,
            Self::From => AddressingHeader::From,
            Self::FaultTo => AddressingHeader::FaultTo,
            _ => return None,
        })
    }
}

/// Evaluate one call for one iteration.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn call<N: Navigator>(
    func: Function,
    args: &[Value],
    item: &ContextItem,
    pool: &mut SequencePool,
    nav: &mut N,
) -> Result<Value, Fault> {
    let string_arg = |index: usize, pool: &SequencePool, nav: &mut N| -> Result<CompactString, Fault> {
        arg(args, index)?.to_xpath_string(pool, nav)
    };
    let number_arg = |index: usize, pool: &SequencePool, nav: &mut N| -> Result<f64, Fault> {
        arg(args, index)?.to_number(pool, nav)
    };

    Ok(match func {
        Function::Last => Value::Number(item.size as f64),
        Function::Position => Value::Number(item.position as f64),
        Function::Count => Value::Number(pool.get(arg(args, 0)?.sequence()?)?.len() as f64),
        Function::LocalName | Function::NamespaceUri | Function::Name => {
            let seq = arg(args, 0)?.sequence()?;
            let Some(&first) = pool.get(seq)?.first() else {
                return Ok(Value::String(CompactString::default()));
            };
            nav.set_position(first)?;
            Value::String(match func {
                Function::LocalName => CompactString::from(nav.local_name()),
                Function::NamespaceUri => CompactString::from(nav.namespace_uri()),
                _ if nav.prefix().is_empty() => CompactString::from(nav.local_name()),
                _ => compact_str::format_compact!("{}:{}", nav.prefix(), nav.local_name()),
            })
        }
        Function::String => Value::String(string_arg(0, pool, nav)?),
        Function::Concat => {
            let mut out = CompactString::default();
            for index in 0..args.len() {
                out.push_str(&string_arg(index, pool, nav)?);
            }
            Value::String(out)
        }
        Function::StartsWith => {
            let (s, prefix) = (string_arg(0, pool, nav)?, string_arg(1, pool, nav)?);
            Value::Boolean(s.starts_with(prefix.as_str()))
        }
        Function::Contains => {
            let (s, needle) = (string_arg(0, pool, nav)?, string_arg(1, pool, nav)?);
            Value::Boolean(s.contains(needle.as_str()))
        }
        Function::SubstringBefore => {
            let (s, needle) = (string_arg(0, pool, nav)?, string_arg(1, pool, nav)?);
            Value::String(s.split_once(needle.as_str()).map(|(before, _)| before.into()).unwrap_or_default())
        }
        Function::SubstringAfter => {
            let (s, needle) = (string_arg(0, pool, nav)?, string_arg(1, pool, nav)?);
            Value::String(s.split_once(needle.as_str()).map(|(_, after)| after.into()).unwrap_or_default())
        }
        Function::Substring => {
            let s = string_arg(0, pool, nav)?;
            let start = xpath_round(number_arg(1, pool, nav)?);
            let end = if args.len() > 2 { start + xpath_round(number_arg(2, pool, nav)?) } else { f64::INFINITY };
            Value::String(
                s.chars()
                    .enumerate()
                    .filter(|(index, _)| {
                        let position = (*index + 1) as f64;
                        position >= start && position < end
                    })
                    .map(|(_, c)| c)
                    .collect(),
            )
        }
        Function::StringLength => Value::Number(string_arg(0, pool, nav)?.chars().count() as f64),
        Function::NormalizeSpace => {
            let s = string_arg(0, pool, nav)?;
            Value::String(s.split(is_xml_whitespace).filter(|part| !part.is_empty()).join(" ").into())
        }
        Function::Translate => {
            let s = string_arg(0, pool, nav)?;
            let from: Vec<char> = string_arg(1, pool, nav)?.chars().collect();
            let to: Vec<char> = string_arg(2, pool, nav)?.chars().collect();
            Value::String(
                s.chars()
                    .filter_map(|c| match from.iter().position(|&f| f == c) {
                        Some(index) => to.get(index).copied(),
                        None => Some(c),
                    })
                    .collect(),
            )
        }
        Function::Boolean => Value::Boolean(arg(args, 0)?.to_boolean(pool)?),
        Function::Not => Value::Boolean(!arg(args, 0)?.to_boolean(pool)?),
        Function::True => Value::Boolean(true),
        Function::False => Value::Boolean(false),
        Function::Lang => {
            let wanted = string_arg(0, pool, nav)?;
            Value::Boolean(lang_matches(nav, item, &wanted)?)
        }
        Function::Number => Value::Number(number_arg(0, pool, nav)?),
        Function::Sum => {
            let nodes = pool.get(arg(args, 0)?.sequence()?)?.to_vec();
            let mut total = 0.0;
            for pos in nodes {
                total += super::value::string_to_number(&node_string(nav, pos)?);
            }
            Value::Number(total)
        }
        Function::Floor => Value::Number(number_arg(0, pool, nav)?.floor()),
        Function::Ceiling => Value::Number(number_arg(0, pool, nav)?.ceil()),
        Function::Round => Value::Number(xpath_round(number_arg(0, pool, nav)?)),
        Function::Envelope => envelope_child(nav, pool, None)?,
        Function::Header => envelope_child(nav, pool, Some(HEADER))?,
        Function::Body => envelope_child(nav, pool, Some(BODY))?,
        Function::SoapUri => {
            nav.move_to_root()?;
            let uri = if message::move_to_envelope(nav)? { nav.namespace_uri() } else { "" };
            Value::String(CompactString::from(uri))
        }
        Function::To
        | Function::Action
        | Function::MessageId
        | Function::RelatesTo
        | Function::ReplyTo
        | Function::From
        | Function::FaultTo => {
            let header = func.addressing_header().ok_or(Fault::Error(crate::error::FilterError::Internal(
                "addressing function without header",
            )))?;
            Value::String(message::read_addressing_header(nav, header)?.unwrap_or_default())
        }
    })
}

fn arg(args: &[Value], index: usize) -> Result<&Value, Fault> {
    args.get(index).ok_or(Fault::Error(crate::error::FilterError::Internal("missing function argument")))
}

fn envelope_child<N: Navigator>(nav: &mut N, pool: &mut SequencePool, child: Option<&str>) -> Result<Value, Fault> {
    nav.move_to_root()?;
    let found = match child {
        None => message::move_to_envelope(nav)?,
        Some(local) => message::move_to_envelope_child(nav, local)?,
    };
    let seq = pool.acquire()?;
    if found {
        pool.items_mut(seq)?.push(nav.position());
    }
    Ok(Value::Sequence(seq))
}

/// XPath `round`: halves go up, negative values that round to zero keep their sign.
pub fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() {
        return n;
    }
    if (-0.5..0.0).contains(&n) {
        return -0.0;
    }
    (n + 0.5).floor()
}

fn lang_matches<N: Navigator>(nav: &mut N, item: &ContextItem, wanted: &str) -> Result<bool, Fault> {
    nav.set_position(item.node)?;
    if nav.kind() == NodeKind::Attribute {
        nav.move_to_parent()?;
    }
    loop {
        if nav.kind() == NodeKind::Element {
            let here = nav.position();
            if nav.move_to_attribute("lang", XML_URI)? {
                let lang = nav.string_value()?;
                let lang = lang.to_ascii_lowercase();
                let wanted = wanted.to_ascii_lowercase();
                return Ok(lang == wanted || lang.strip_prefix(wanted.as_str()).is_some_and(|rest| rest.starts_with('-')));
            }
            nav.set_position(here)?;
        }
        if !nav.move_to_parent()? {
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "string", 1, Some(Function::String), false)]
    #[case("", "string", 0, Some(Function::String), true)]
    #[case("", "concat", 1, None, false)]
    #[case("", "concat", 5, Some(Function::Concat), false)]
    #[case("", "true", 0, Some(Function::True), false)]
    #[case(MESSAGE_FUNCTIONS_NS, "header", 0, Some(Function::Header), false)]
    #[case(MESSAGE_FUNCTIONS_NS, "header", 1, None, false)]
    #[case("urn:other", "header", 0, None, false)]
    fn resolution(
        #[case] ns: &str,
        #[case] local: &str,
        #[case] argc: usize,
        #[case] expected: Option<Function>,
        #[case] context: bool,
    ) {
        let resolved = Function::resolve(ns, local, argc);
        assert_eq!(resolved.map(|r| r.func), expected);
        if let Some(r) = resolved {
            assert_eq!(r.takes_context_node, context);
        }
    }

    #[rstest]
    #[case(2.5, 3.0)]
    #[case(-2.5, -2.0)]
    #[case(1.4, 1.0)]
    fn rounding(#[case] input: f64, #[case] expected: f64) {
        assert_eq!(xpath_round(input), expected);
    }

    #[test]
    fn rounding_keeps_negative_zero() {
        assert!(xpath_round(-0.2).is_sign_negative());
        assert!(xpath_round(f64::NAN).is_nan());
    }

    #[test]
    fn starters() {
        assert!(Function::Header.is_node_set_starter());
        assert!(!Function::To.is_node_set_starter());
    }
}
