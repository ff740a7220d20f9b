//! Terminal chat loop.

use anyhow::Result;
use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::relay::{Relay, StreamItem};
use crate::session::Session;

const PROMPT: &str = "You: ";
const REPLY_PREFIX: &str = "Bot: ";

/// Run the chat loop until `exit` or end of input.
///
/// Every line is one turn against a single [`Session`]. Provider errors are
/// printed and the loop continues with the same session.
pub async fn run<R, W>(relay: &Relay, input: R, mut output: W, streaming: bool) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = Session::new();
    let mut lines = input.lines();

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            output.write_all(b"\n").await?;
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") {
            output.write_all(b"Bot: Goodbye!\n").await?;
            break;
        }

        if streaming {
            stream_reply(relay, &mut session, line, &mut output).await?;
        } else {
            match relay.send(&mut session, line).await {
                Ok(reply) => {
                    output
                        .write_all(format!("{REPLY_PREFIX}{reply}\n").as_bytes())
                        .await?;
                }
                Err(e) => {
                    output
                        .write_all(format!("An error occurred: {e}\n").as_bytes())
                        .await?;
                }
            }
        }
    }

    output.flush().await?;
    Ok(())
}

/// Print fragments as they arrive.
async fn stream_reply<W>(relay: &Relay, session: &mut Session, line: &str, output: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(REPLY_PREFIX.as_bytes()).await?;
    output.flush().await?;

    let mut stream = relay.send_streaming(session, line);
    while let Some(item) = stream.next().await {
        match item {
            StreamItem::Fragment(text) => {
                output.write_all(text.as_bytes()).await?;
                output.flush().await?;
            }
            StreamItem::Failed(e) => {
                output
                    .write_all(format!("\nAn error occurred: {e}").as_bytes())
                    .await?;
            }
        }
    }

    output.write_all(b"\n").await?;
    Ok(())
}
