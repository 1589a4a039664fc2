use anyhow::{Context, bail};
use msgfilter::{MessageBuffer, XPathMessageContext};
use std::fs;
use std::path::Path;

pub type CliResult<T> = anyhow::Result<T>;

/// Read and parse a message file. The buffer allows body access; take
/// [`MessageBuffer::create_message`] for a header-only view.
pub fn read_message(path: &Path) -> CliResult<MessageBuffer> {
    let xml = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    MessageBuffer::parse(&xml).with_context(|| format!("{} is not a message envelope", path.display()))
}

/// Split a `NAME=VALUE` argument.
pub fn parse_binding(value: &str) -> CliResult<(&str, &str)> {
    match value.split_once('=') {
        Some((name, rest)) if !name.is_empty() => Ok((name, rest)),
        _ => bail!("expected NAME=VALUE, got '{value}'"),
    }
}

/// The default message context extended with `PREFIX=URI` bindings and string variables.
pub fn message_context(namespaces: &[String], variables: &[String]) -> CliResult<XPathMessageContext> {
    let mut ctx = XPathMessageContext::new();
    for binding in namespaces {
        let (prefix, uri) = parse_binding(binding)?;
        ctx.add_namespace(prefix, uri);
    }
    for binding in variables {
        let (name, value) = parse_binding(binding)?;
        ctx.set_variable(name, value);
    }
    Ok(ctx)
}

pub fn plural(count: usize, word: &str) -> String {
    if count == 1 { format!("1 {word}") } else { format!("{count} {word}es") }
}
