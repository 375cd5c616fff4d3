//! Outbound sink: one JSON document per line.

use presence_core::OutboundMessage;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Write every message from `rx` to `out` until all senders are gone.
///
/// A message that fails to serialize is logged and skipped. Returns the
/// number of lines written.
pub async fn write_ndjson<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    mut out: W,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(topic = %message.topic, "outbound serialization failed: {e}");
                continue;
            }
        };
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
        written += 1;
    }
    tracing::debug!(written, "outbound channel closed");
    Ok(written)
}
