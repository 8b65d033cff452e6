//! Command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use relay_core::{AnthropicGateway, Config, ContentBlock, Message, MessageContent, Role};

use crate::agent::{AgentConfig, AgentLoop};
use crate::mcp::with_session;
use crate::server::{self, AppState};
use crate::transcript::{self, TranscriptLogger};

/// Peer script from flags/env or relay.toml
fn peer_script(config: &Config) -> Result<PathBuf> {
    config.peer.script.clone().context(
        "No peer script configured: pass --peer, set MCP_RELAY_PEER, or set [peer].script in relay.toml",
    )
}

/// Model gateway plus loop settings; fails before any peer is spawned
fn build_agent(config: &Config) -> Result<AgentLoop> {
    let gateway = AnthropicGateway::from_config(&config.model)
        .context("Failed to configure the model gateway")?;
    tracing::debug!(?gateway, "Model gateway ready");

    Ok(AgentLoop::new(
        Arc::new(gateway),
        AgentConfig::from_settings(&config.agent, &config.model),
    )
    .with_transcripts(TranscriptLogger::new(&config.transcripts.dir)))
}

/// Run the HTTP front door until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    let script = peer_script(&config)?;
    let agent = build_agent(&config)?;
    let addr = config.bind_addr();

    with_session(config.peer.clone(), &script, |session| async move {
        let state = Arc::new(AppState {
            peer: session.handle(),
            agent,
        });
        server::serve(&addr, server::build_router(state)).await
    })
    .await
}

/// One-shot query; prints the transcript as JSON
pub async fn ask(config: Config, query: &str) -> Result<()> {
    let script = peer_script(&config)?;
    let agent = build_agent(&config)?;

    let messages = with_session(config.peer.clone(), &script, |session| async move {
        let peer = session.lock().await;
        let messages = agent.run(&*peer, query).await?;
        Ok(messages)
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&messages)?);
    Ok(())
}

/// Connect to the peer and list what it offers
pub async fn tools(config: Config) -> Result<()> {
    let script = peer_script(&config)?;

    let tools = with_session(config.peer.clone(), &script, |session| async move {
        let tools = session.tools().await;
        Ok(tools)
    })
    .await?;

    if tools.is_empty() {
        println!("Peer advertises no tools.");
        return Ok(());
    }

    println!("{} tool(s) from {}:", tools.len(), script.display());
    for tool in &tools {
        if tool.description.is_empty() {
            println!("  {}", tool.name);
        } else {
            println!("  {:<24} {}", tool.name, tool.description);
        }
    }
    Ok(())
}

/// Print a saved transcript, one line per message
pub async fn show(path: &Path) -> Result<()> {
    let messages = transcript::load(path)
        .await
        .with_context(|| format!("Failed to load transcript {}", path.display()))?;

    for message in &messages {
        println!("{}", render_line(message));
    }
    Ok(())
}

fn render_line(message: &Message) -> String {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let body = match &message.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(render_block)
            .collect::<Vec<_>>()
            .join(" "),
    };
    format!("{role:>9}: {body}")
}

fn render_block(block: &ContentBlock) -> String {
    match block {
        ContentBlock::Text { text } => text.clone(),
        ContentBlock::ToolCallRequest { id, name, args } => {
            format!("[call {id}: {name}({})]", serde_json::Value::Object(args.clone()))
        }
        ContentBlock::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => {
            let tag = if *is_error { "error" } else { "result" };
            format!("[{tag} {tool_call_id}: {content}]")
        }
    }
}
