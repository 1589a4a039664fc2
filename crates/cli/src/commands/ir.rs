use crate::util::{CliResult, message_context};
use clap::Args;
use msgfilter::CompiledXPath;

#[derive(Args, Debug, Clone)]
pub struct IrArgs {
    #[arg(value_name = "XPATH")]
    pub expression: String,
    #[arg(long = "namespace", value_name = "PREFIX=URI")]
    pub namespaces: Vec<String>,
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub variables: Vec<String>,
    /// Leave out the final boolean conversion a filter applies.
    #[arg(long = "raw")]
    pub raw: bool,
}

pub fn run(args: &IrArgs) -> CliResult<String> {
    let ctx = message_context(&args.namespaces, &args.variables)?;
    let compiled = if args.raw {
        CompiledXPath::expression(&args.expression, &ctx)?
    } else {
        CompiledXPath::filter(&args.expression, &ctx)?
    };
    Ok(compiled.to_string().trim_end().to_owned())
}
