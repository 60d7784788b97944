//! `ssemcp tools` - connect and list the server's tools.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use ssemcp_client::{SseMcpClient, ToolInfo};

use super::Context;

/// Arguments for `ssemcp tools`.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Show full tool schemas
    #[arg(long)]
    pub full: bool,
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let mut client = SseMcpClient::new(ctx.server.clone())?;

    if ctx.verbose && !ctx.json_output {
        println!("Connecting to {} ({})", client.name(), ctx.server.url);
        println!("  Mode: {}", client.mode());
        println!();
    }

    let outcome = client.init(true).await;
    let tools = client.tools();
    client.cleanup().await;
    outcome?;

    if ctx.json_output {
        let tools_json: Vec<_> = tools.iter().map(|t| tool_json(t, args.full)).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "server": client.name(),
                "tools": tools_json,
            }))?
        );
        return Ok(());
    }

    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("Available tools ({}):", tools.len());
    for tool in tools.iter() {
        println!("  • {}", tool.name);
        if let Some(desc) = &tool.description {
            for line in wrap(desc, 70).lines() {
                println!("      {}", line);
            }
        }
        if args.full {
            println!(
                "      Schema: {}",
                serde_json::to_string(&tool.input_schema)?
            );
        }
    }
    Ok(())
}

fn tool_json(tool: &ToolInfo, full: bool) -> serde_json::Value {
    if full {
        json!({
            "name": tool.name,
            "description": tool.description,
            "schema": tool.input_schema,
        })
    } else {
        json!({
            "name": tool.name,
            "description": tool.description,
        })
    }
}

/// Greedy word wrap.
fn wrap(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.len() + 1 + word.len() <= width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.join("\n")
}
