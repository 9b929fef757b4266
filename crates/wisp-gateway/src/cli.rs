//! Local CLI channel — stdin lines in, stdout replies out. Started with
//! `wisp-gateway --cli` for working with the agent from a terminal.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use wisp_channels::error::ChannelError;
use wisp_channels::types::{InboundMessage, OutboundReply};
use wisp_channels::Channel;
use wisp_core::types::Source;

/// All CLI input belongs to one local correspondent.
const CLI_SENDER: &str = "cli";

pub struct CliChannel;

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn run(
        &self,
        inbound: mpsc::Sender<InboundMessage>,
        shutdown: CancellationToken,
    ) -> Result<(), ChannelError> {
        info!("cli channel reading stdin");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(l)) => l,
                    Ok(None) | Err(_) => break,
                },
            };
            if line.trim().is_empty() {
                continue;
            }
            let message = InboundMessage::new(CLI_SENDER, Source::Cli, line);
            if inbound.send(message).await.is_err() {
                break;
            }
        }
        info!("cli channel closed");
        Ok(())
    }

    async fn send(&self, reply: &OutboundReply) -> Result<(), ChannelError> {
        println!("{}", reply.text);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
