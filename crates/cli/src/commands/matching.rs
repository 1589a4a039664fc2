use crate::OutputFormat;
use crate::filters::FilterSet;
use crate::util::{CliResult, plural, read_message};
use clap::Args;
use msgfilter::table::Hit;
use msgfilter::{FilterError, FilterTable, MatchTarget, MessageFilterTable};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Args, Debug, Clone)]
pub struct MatchArgs {
    /// JSON filter set.
    #[arg(long = "filters", value_name = "FILE")]
    pub filters: PathBuf,
    #[arg(value_name = "MESSAGE", required = true)]
    pub messages: Vec<PathBuf>,
    /// Hide message bodies; body filters then fail instead of matching.
    #[arg(long = "headers-only")]
    pub headers_only: bool,
    /// Report only the first hit of the highest matching priority.
    #[arg(long, conflicts_with = "single")]
    pub first: bool,
    /// Require one winner per message; ties within the deciding priority are reported.
    #[arg(long)]
    pub single: bool,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    All,
    First,
    Single,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct MatchSummary {
    name: String,
    kind: &'static str,
    priority: i32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct MessageReport {
    message: String,
    action: Option<String>,
    to: Option<String>,
    matches: Vec<MatchSummary>,
    error: Option<String>,
}

pub fn run(args: &MatchArgs) -> CliResult<String> {
    let table = FilterSet::load(&args.filters)?.build()?;
    let mode = match (args.first, args.single) {
        (true, _) => Mode::First,
        (_, true) => Mode::Single,
        _ => Mode::All,
    };
    let reports =
        args.messages.iter().map(|path| report(&table, path, mode, args.headers_only)).collect::<CliResult<Vec<_>>>()?;
    match args.format {
        OutputFormat::Text => Ok(render_text(&reports)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&reports)?),
    }
}

fn report(table: &MessageFilterTable<String>, path: &Path, mode: Mode, headers_only: bool) -> CliResult<MessageReport> {
    let buffer = read_message(path)?;
    let message = buffer.message();
    let outcome = if headers_only {
        matches(table, &buffer.create_message(), mode)
    } else {
        matches(table, &buffer, mode)
    };
    let mut report = MessageReport {
        message: path.display().to_string(),
        action: message.action().map(str::to_owned),
        to: message.to().map(str::to_owned),
        matches: Vec::new(),
        error: None,
    };
    match outcome {
        Ok(hits) => {
            info!(message = %report.message, hits = hits.len(), "matched");
            report.matches = hits.into_iter().map(|hit| summarize(table, hit)).collect();
        }
        Err(FilterError::AmbiguousMatch { filters }) => {
            let names: Vec<&str> = filters.iter().filter_map(|f| table.get(f)).map(String::as_str).collect();
            warn!(message = %report.message, ?names, "ambiguous match");
            report.error = Some(format!("ambiguous match between {}", names.join(", ")));
        }
        Err(err) if err.is_recoverable() => {
            warn!(message = %report.message, error = %err, "message could not be matched");
            report.error = Some(err.to_string());
        }
        Err(err) => return Err(err.into()),
    }
    Ok(report)
}

fn matches<'a, M: MatchTarget>(
    table: &'a MessageFilterTable<String>,
    target: &M,
    mode: Mode,
) -> msgfilter::Result<Vec<Hit<'a, String>>> {
    match mode {
        Mode::All => {
            let mut hits = Vec::new();
            table.collect_matching(target, &mut hits)?;
            Ok(hits)
        }
        Mode::First => Ok(table.get_first_matching(target)?.into_iter().collect()),
        Mode::Single => Ok(table.get_matching_entry(target)?.into_iter().collect()),
    }
}

fn summarize(table: &MessageFilterTable<String>, (filter, name): Hit<'_, String>) -> MatchSummary {
    MatchSummary { name: name.clone(), kind: filter.kind_name(), priority: table.priority(filter).unwrap_or_default() }
}

fn colorize_name(name: &str) -> String {
    name.if_supports_color(Stream::Stdout, |text| text.bold().fg_rgb::<79, 166, 255>().to_string()).to_string()
}

fn colorize_error(error: &str) -> String {
    error.if_supports_color(Stream::Stdout, |text| text.fg_rgb::<255, 110, 110>().to_string()).to_string()
}

pub(crate) fn render_text(reports: &[MessageReport]) -> String {
    let mut output = String::new();
    for report in reports {
        let _ = writeln!(&mut output, "{}: {}", report.message, plural(report.matches.len(), "match"));
        for hit in &report.matches {
            let _ = writeln!(&mut output, "  [{}] {} ({})", hit.priority, colorize_name(&hit.name), hit.kind);
        }
        if let Some(error) = &report.error {
            let _ = writeln!(&mut output, "  {}", colorize_error(error));
        }
    }
    output.trim_end().to_owned()
}
