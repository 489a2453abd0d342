//! The worker-process side of the protocol.
//!
//! A worker owns exactly one renderer session and speaks the pool protocol
//! over its stdin/stdout. A failed task produces an error RESULT and the
//! loop keeps going; only a SHUTDOWN message or a closed pipe ends it.

use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::{self, Message, TaskOutcome};
use crate::renderer::{PageRenderer, RenderRequest};

/// Serves the protocol on the process's own stdin/stdout.
pub async fn run<R: PageRenderer>(renderer: R) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();
    serve(renderer, input, output).await
}

/// Serves the protocol on an arbitrary duplex transport.
pub async fn serve<R, I, O>(mut renderer: R, mut input: I, mut output: O) -> Result<()>
where
    R: PageRenderer,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    while let Some(message) = protocol::read_message(&mut input).await? {
        match message {
            Message::Init { worker_id } => {
                debug!("worker {} initialized", worker_id);
                protocol::write_message(&mut output, &Message::Ready { worker_id }).await?;
            }
            Message::SetCookies { cookies } => {
                debug!("installing {} session cookies", cookies.len());
                renderer.set_cookies(&cookies);
            }
            Message::Download {
                task_id,
                url,
                page_id,
                save_path,
                cookies,
            } => {
                if !cookies.is_empty() {
                    renderer.set_cookies(&cookies);
                }
                let request = RenderRequest {
                    url,
                    page_id,
                    save_path,
                };
                let outcome = match renderer.render(&request).await {
                    Ok(data) => TaskOutcome::success(task_id, data),
                    Err(e) => {
                        warn!("task {} failed: {}", task_id, e);
                        TaskOutcome::failure(task_id, e.to_string())
                    }
                };
                protocol::write_message(&mut output, &Message::Result(outcome)).await?;
            }
            Message::Shutdown => {
                debug!("shutdown received");
                break;
            }
            other => {
                warn!("ignoring pool-bound message {:?}", other);
            }
        }
    }
    Ok(())
}
