//! Line-delimited JSON-RPC: one request per line in, one response per line out.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::RpcService;
use crate::rpc::{RpcRequest, RpcResponse, PARSE_ERROR};

/// Serve requests from `reader` until EOF, writing responses to `writer`.
pub async fn serve_lines<R, W>(service: &RpcService, reader: R, mut writer: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(trimmed) {
            Ok(request) => service.handle(request).await,
            Err(e) => {
                warn!("Unparseable request line: {}", e);
                RpcResponse::failure(PARSE_ERROR, format!("Parse error: {}", e))
            }
        };

        let encoded = serde_json::to_string(&response).map_err(io::Error::other)?;
        writer.write_all(encoded.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    debug!("Input closed");
    Ok(())
}

/// Serve over the process's stdin and stdout.
pub async fn serve_stdio(service: &RpcService) -> io::Result<()> {
    info!("Serving JSON-RPC on stdio");
    serve_lines(service, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}
