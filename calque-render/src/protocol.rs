//! The closed message set spoken between the pool and its worker processes.
//!
//! Messages travel as newline-delimited JSON over the child's stdin/stdout
//! pipes. Every message is an `{type, payload}` envelope; anything that does
//! not deserialize into [`Message`] is a transport error and crashes the
//! worker it came from, never the pool.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// A session cookie captured once per run and broadcast read-only to workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

impl Cookie {
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
        }
    }

    /// Renders the cookie in `Set-Cookie` header form.
    pub fn header_value(&self) -> String {
        format!(
            "{}={}; Domain={}; Path={}",
            self.name, self.value, self.domain, self.path
        )
    }
}

/// One page download, produced from the confirmed discovery tree.
///
/// `save_path` is absolute and was fixed during discovery, so no two tasks
/// ever point at the same file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub url: String,
    pub page_id: String,
    pub save_path: PathBuf,
}

/// What a worker reports back for one finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_type: TaskKind,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DownloadData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success(task_id: String, data: DownloadData) -> Self {
        Self {
            task_type: TaskKind::Download,
            task_id,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(task_id: String, error: String) -> Self {
        Self {
            task_type: TaskKind::Download,
            task_id,
            data: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Download,
}

/// Payload of a successful download result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadData {
    pub bytes_written: u64,
    pub block_ids: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// The protocol itself. Serialized as `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Init {
        worker_id: usize,
    },
    SetCookies {
        cookies: Vec<Cookie>,
    },
    Download {
        task_id: String,
        url: String,
        page_id: String,
        save_path: PathBuf,
        cookies: Vec<Cookie>,
    },
    Shutdown,
    Ready {
        worker_id: usize,
    },
    Result(TaskOutcome),
}

/// Writes one message followed by a newline and flushes.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one message. `Ok(None)` means the peer closed the channel.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    let message = serde_json::from_str(line.trim_end())?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: &Message) -> Message {
        let encoded = serde_json::to_string(message).unwrap();
        serde_json::from_str(&encoded).unwrap()
    }

    #[test]
    fn envelope_shape_is_type_plus_payload() {
        let message = Message::Ready { worker_id: 3 };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&message).unwrap()).unwrap();
        assert_eq!(value["type"], "READY");
        assert_eq!(value["payload"]["worker_id"], 3);
    }

    #[test]
    fn every_message_kind_round_trips() {
        let messages = vec![
            Message::Init { worker_id: 0 },
            Message::SetCookies {
                cookies: vec![Cookie::new("token_v2", "abc", "site.example")],
            },
            Message::Download {
                task_id: "w1-1700000000000".to_string(),
                url: "https://site.example/Page-29d979ee64ae4a5aa7d9f09a102a5a23".to_string(),
                page_id: "29d979ee64ae4a5aa7d9f09a102a5a23".to_string(),
                save_path: PathBuf::from("/tmp/mirror/Page/index.html"),
                cookies: vec![],
            },
            Message::Shutdown,
            Message::Ready { worker_id: 7 },
            Message::Result(TaskOutcome::success(
                "w1-1700000000000".to_string(),
                DownloadData {
                    bytes_written: 4096,
                    block_ids: 12,
                    content_type: Some("text/html".to_string()),
                },
            )),
            Message::Result(TaskOutcome::failure(
                "w2-1700000000001".to_string(),
                "render timed out".to_string(),
            )),
        ];

        for message in messages {
            assert_eq!(round_trip(&message), message);
        }
    }

    #[tokio::test]
    async fn codec_round_trips_over_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let (read_half, _w) = tokio::io::split(server);
        let (client_read, mut write_half) = tokio::io::split(client);

        let sent = Message::Init { worker_id: 4 };
        write_message(&mut write_half, &sent).await.unwrap();
        // Drop both halves so the duplex stream fully closes and the peer
        // observes EOF (a lone WriteHalf drop leaves the stream alive).
        drop(write_half);
        drop(client_read);

        let mut reader = tokio::io::BufReader::new(read_half);
        let received = read_message(&mut reader).await.unwrap();
        assert_eq!(received, Some(sent));
        // Channel closed once the writer is gone.
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_on_the_wire_is_a_protocol_error() {
        let (client, server) = tokio::io::duplex(256);
        let (read_half, _w) = tokio::io::split(server);
        let (_r, mut write_half) = tokio::io::split(client);

        write_half.write_all(b"not json\n").await.unwrap();
        write_half.flush().await.unwrap();

        let mut reader = tokio::io::BufReader::new(read_half);
        assert!(read_message(&mut reader).await.is_err());
    }
}
