// Agent Link: command-line client
//
// Connects to the agents named on the command line within one session and
// relays stdin lines of the form `agent: text` to them. Configuration comes
// from the AGENT_LINK_* environment variables.

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use kodegen_agent_link::listeners::event_stream;
use kodegen_agent_link::{ConnectionManager, InboundFrame, LinkEvent, LinkOptions, SignalingManager};
use tokio::io::{AsyncBufReadExt, BufReader};

const USAGE: &str = "usage: agent-link <session-id> <agent-id>...";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(session_id) = args.next() else {
        bail!(USAGE);
    };
    let agents: Vec<String> = args.collect();
    if agents.is_empty() {
        bail!(USAGE);
    }

    let options = LinkOptions::from_env().context("Failed to read AGENT_LINK_* configuration")?;
    let manager = ConnectionManager::websocket(options.clone())?;
    let signaling = SignalingManager::websocket(options, manager.listeners().clone())?;

    let (subscription, events) = manager.subscribe_channel();
    let reporter = tokio::spawn(async move {
        let mut events = std::pin::pin!(event_stream(events));
        while let Some(event) = events.next().await {
            report(&event);
        }
    });

    for agent_id in &agents {
        manager.connect(session_id.as_str(), agent_id.as_str()).await?;
        signaling.connect_agent_channel(agent_id.as_str()).await?;
    }
    log::info!("Connecting to {} agent(s) in session {session_id}", agents.len());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => forward(&manager, &line).await,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    signaling.shutdown().await?;
    manager.shutdown().await?;
    subscription.unsubscribe();
    reporter.abort();
    Ok(())
}

async fn forward(manager: &ConnectionManager, line: &str) {
    let Some((agent_id, text)) = line.split_once(':') else {
        log::warn!("Expected `agent: text`, got {line:?}");
        return;
    };
    let agent_id = agent_id.trim();
    let payload = serde_json::json!({ "message": text.trim() });
    if let Err(e) = manager.send_json(agent_id, &payload).await {
        log::error!("Send to {agent_id} failed: {e}");
    }
}

fn report(event: &LinkEvent) {
    match event {
        LinkEvent::StatusChange { agent_id, status } => log::info!(
            "{agent_id}: {:?}/{:?}",
            status.connection_state,
            status.activity_state
        ),
        LinkEvent::Packet(packet) => match &packet.frame {
            InboundFrame::Content {
                text: Some(text), ..
            } => println!("{}: {text}", packet.agent_id),
            InboundFrame::ErrorFrame { message, .. } => {
                log::warn!("{} reported an error: {message}", packet.agent_id);
            }
            frame => log::debug!("{}: {frame:?}", packet.agent_id),
        },
        LinkEvent::Error(error) => {
            log::warn!("{}: [{}] {}", error.agent_id, error.code, error.message);
        }
        LinkEvent::A2AMessage(message) => log::info!(
            "{} -> {}: {}",
            message.from_agent,
            message.to_agent,
            message.content
        ),
        LinkEvent::TaskEvent(event) => {
            log::info!("task {} {}: {}", event.task_id, event.event_type, event.data);
        }
        other => log::debug!("{other:?}"),
    }
}
