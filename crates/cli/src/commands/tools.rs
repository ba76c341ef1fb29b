//! `meshloop tools`: List the tools the provider exposes.

use meshloop_core::tool::ToolTransport;
use meshloop_mcp::McpSession;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;

    let mut session = McpSession::spawn(&config.mcp)?;
    let listed = match session.initialize().await {
        Ok(()) => session.list_tools().await,
        Err(e) => Err(e),
    };
    session.close().await?;
    let tools = listed?;

    println!(
        "  {} tools from `{} {}`",
        tools.len(),
        config.mcp.command,
        config.mcp.args.join(" ")
    );
    println!();
    for tool in &tools {
        let summary = tool.description.lines().next().unwrap_or("").trim();
        if summary.is_empty() {
            println!("  {}", tool.name);
        } else {
            println!("  {:<28} {}", tool.name, summary);
        }
    }

    Ok(())
}
