//! `ssemcp call` - invoke one tool.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde_json::Value;

use ssemcp_client::{CallToolResult, SseMcpClient};

use super::Context;

/// Arguments for `ssemcp call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Name of the tool to call
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long)]
    pub args: Option<String>,

    /// Send the server's configured headers with the call
    #[arg(long)]
    pub forward_headers: bool,
}

/// Run the call command.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(args.args.as_deref())?;
    let headers = args.forward_headers.then(|| ctx.server.headers.clone());

    let mut client = SseMcpClient::new(ctx.server.clone())?;
    tracing::debug!(server = %client.name(), tool = %args.tool, "calling tool");

    let outcome = client.call_tool(&args.tool, arguments, headers).await;
    client.cleanup().await;
    let result = outcome?;

    print_result(&result, ctx.json_output)?;
    if result.is_error() {
        bail!("tool '{}' reported an error", args.tool);
    }
    Ok(())
}

fn parse_arguments(raw: Option<&str>) -> Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(Some(value))
}

fn print_result(result: &CallToolResult, json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    match result.text() {
        Some(text) => println!("{}", text),
        None => println!("{}", serde_json::to_string_pretty(&result.content)?),
    }
    Ok(())
}
