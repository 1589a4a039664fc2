use crate::OutputFormat;
use crate::util::{CliResult, message_context, read_message};
use clap::Args;
use msgfilter::engine::value::number_to_string;
use msgfilter::model::{Navigator, NodeKind};
use msgfilter::{MatchTarget, NodeQuota, XPathFilter, XPathResult};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct EvalArgs {
    #[arg(value_name = "XPATH")]
    pub expression: String,
    #[arg(value_name = "MESSAGE")]
    pub message: PathBuf,
    #[arg(long = "namespace", value_name = "PREFIX=URI")]
    pub namespaces: Vec<String>,
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub variables: Vec<String>,
    #[arg(long = "node-quota", value_name = "N")]
    pub node_quota: Option<i64>,
    /// Hide the body; stepping into it is then an error.
    #[arg(long = "headers-only")]
    pub headers_only: bool,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct NodeSummary {
    kind: &'static str,
    name: String,
    value: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub(crate) enum ResultSummary {
    Boolean { value: bool },
    Number { value: f64, text: String },
    String { value: String },
    NodeSet { nodes: Vec<NodeSummary> },
}

pub fn run(args: &EvalArgs) -> CliResult<String> {
    let ctx = message_context(&args.namespaces, &args.variables)?;
    let mut filter = XPathFilter::with_context(&args.expression, ctx)?;
    if let Some(quota) = args.node_quota {
        filter = filter.with_node_quota(NodeQuota::new(quota)?);
    }
    let buffer = read_message(&args.message)?;
    let summary = if args.headers_only {
        summarize(&filter, &buffer.create_message())?
    } else {
        summarize(&filter, &buffer)?
    };
    match args.format {
        OutputFormat::Text => Ok(render_text(&summary)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&summary)?),
    }
}

pub(crate) fn summarize<M: MatchTarget>(filter: &XPathFilter, target: &M) -> CliResult<ResultSummary> {
    let summary = match filter.evaluate(target)? {
        XPathResult::Boolean(value) => ResultSummary::Boolean { value },
        XPathResult::Number(value) => ResultSummary::Number { value, text: number_to_string(value).into() },
        XPathResult::String(value) => ResultSummary::String { value: value.into() },
        XPathResult::NodeSet(positions) => {
            let mut nav = target.navigator();
            let mut nodes = Vec::with_capacity(positions.len());
            for pos in positions {
                nav.set_position(pos)?;
                nodes.push(describe(&nav)?);
            }
            ResultSummary::NodeSet { nodes }
        }
    };
    Ok(summary)
}

fn describe<N: Navigator>(nav: &N) -> CliResult<NodeSummary> {
    let name = match (nav.prefix(), nav.local_name()) {
        (_, "") => String::new(),
        ("", local) => local.to_owned(),
        (prefix, local) => format!("{prefix}:{local}"),
    };
    Ok(NodeSummary { kind: kind_label(nav.kind()), name, value: nav.string_value()?.into() })
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Root => "root",
        NodeKind::Element => "element",
        NodeKind::Attribute => "attribute",
        NodeKind::Text => "text",
        NodeKind::Comment => "comment",
        NodeKind::ProcessingInstruction => "processing-instruction",
    }
}

fn colorize_name(name: &str) -> String {
    name.if_supports_color(Stream::Stdout, |text| text.bold().fg_rgb::<79, 166, 255>().to_string()).to_string()
}

fn colorize_value(value: &str) -> String {
    value.if_supports_color(Stream::Stdout, |text| text.fg_rgb::<136, 192, 74>().to_string()).to_string()
}

pub(crate) fn render_text(summary: &ResultSummary) -> String {
    let mut output = String::new();
    match summary {
        ResultSummary::Boolean { value } => output.push_str(if *value { "true" } else { "false" }),
        ResultSummary::Number { text, .. } => output.push_str(text),
        ResultSummary::String { value } => output.push_str(value),
        ResultSummary::NodeSet { nodes } if nodes.is_empty() => output.push_str("(empty node-set)"),
        ResultSummary::NodeSet { nodes } => {
            for node in nodes {
                let value = serde_json::to_string(&node.value).unwrap_or_else(|_| format!("\"{}\"", node.value));
                let label = if node.name.is_empty() {
                    node.kind.to_owned()
                } else {
                    format!("{} {}", node.kind, colorize_name(&node.name))
                };
                let _ = writeln!(&mut output, "{label} = {}", colorize_value(&value));
            }
        }
    }
    output.trim_end().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{order_message, strip_ansi, write_file};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        message: PathBuf,
    }

    #[fixture]
    fn order() -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let xml = order_message("urn:sales:Place", "42", &["a", "b"]).to_xml();
        let message = write_file(&dir, "order.xml", &xml);
        Fixture { _dir: dir, message }
    }

    fn args(expression: &str, fixture: &Fixture) -> EvalArgs {
        EvalArgs {
            expression: expression.into(),
            message: fixture.message.clone(),
            namespaces: vec!["s=urn:sales".into()],
            variables: vec![],
            node_quota: None,
            headers_only: false,
            format: OutputFormat::Text,
        }
    }

    #[rstest]
    #[case("count(/s12:Envelope/s12:Body/s:Order/s:Line)", "2")]
    #[case("sm:action()", "urn:sales:Place")]
    #[case("/s12:Envelope/s12:Header/s:Account = 42", "true")]
    #[case("/s12:Envelope/s12:Body/s:Order/s:Line[2]/text()", "text = \"b\"")]
    fn expressions_evaluate_against_files(order: Fixture, #[case] expression: &str, #[case] expected: &str) {
        assert_eq!(strip_ansi(&run(&args(expression, &order)).expect("eval")), expected);
    }

    #[rstest]
    fn nodes_are_described_in_json(order: Fixture) {
        let mut args = args("/s12:Envelope/s12:Body/s:Order/s:Line", &order);
        args.format = OutputFormat::Json;
        let json: serde_json::Value = serde_json::from_str(&run(&args).expect("eval")).expect("json");
        assert_eq!(json["type"], "NodeSet");
        assert_eq!(json["nodes"][1]["kind"], "element");
        assert_eq!(json["nodes"][1]["name"], "s:Line");
        assert_eq!(json["nodes"][1]["value"], "b");
    }

    #[rstest]
    fn header_only_evaluation_refuses_the_body(order: Fixture) {
        let mut args = args("/s12:Envelope/s12:Body/s:Order", &order);
        args.headers_only = true;
        assert!(run(&args).is_err());
        args.expression = "sm:header()/s:Account".into();
        assert_eq!(strip_ansi(&run(&args).expect("eval")), "element h:Account = \"42\"");
    }

    #[rstest]
    fn small_quotas_stop_evaluation(order: Fixture) {
        let mut args = args("count(//*)", &order);
        args.node_quota = Some(3);
        let err = run(&args).unwrap_err();
        assert!(format!("{err:#}").contains("node quota of 3"), "{err:#}");
    }
}
