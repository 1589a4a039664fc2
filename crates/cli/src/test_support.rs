use msgfilter::{EnvelopeVersion, MessageBuilder};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const SALES_NS: &str = "urn:sales";

pub fn order_message(action: &str, account: &str, lines: &[&str]) -> MessageBuilder {
    let lines: String = lines.iter().map(|l| format!("<s:Line>{l}</s:Line>")).collect();
    MessageBuilder::new(EnvelopeVersion::Soap12)
        .to("http://svc/orders")
        .action(action)
        .header(SALES_NS, "Account", account)
        .body(format!("<s:Order xmlns:s=\"{SALES_NS}\">{lines}</s:Order>"))
}

pub fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

/// Remove SGR color sequences from rendered output.
pub fn strip_ansi(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            result.push(ch);
        }
    }
    result
}
