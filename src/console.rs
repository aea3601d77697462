//! JSON-lines bus consumer for stdin/stdout.
//!
//! Each input line is one `Command`; each notification is written as one
//! line. Used for driving the gateway by hand or from a supervising process.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::bus::{Consumer, MessageBus};
use crate::messages::{Command, Notification};

/// Attach to `bus` and pump stdin/stdout until stdin closes.
pub async fn run(bus: MessageBus) -> std::io::Result<()> {
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    pump(bus.attach(), input, tokio::io::stdout()).await
}

async fn pump<R, W>(mut consumer: Consumer, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    log::debug!("Console attached as consumer {}", consumer.id());
    if !consumer.send(Command::Connected) {
        return Ok(());
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Command>(line) {
                    Ok(command) => {
                        if !consumer.send(command) {
                            log::warn!("Lifecycle manager is gone; console exiting");
                            break;
                        }
                    }
                    Err(e) => log::warn!("Ignoring console input: {}", e),
                }
            }
            notification = consumer.recv() => {
                let Some(notification) = notification else { break };
                write_line(&mut output, &notification).await?;
            }
        }
    }
    output.flush().await
}

async fn write_line<W: AsyncWrite + Unpin>(
    output: &mut W,
    notification: &Notification,
) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(notification)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await
}
