//! STDIO delivery: the gateway process itself is launched by a single
//! client over a pipe, reading JSON-RPC requests line-by-line from its
//! own stdin and writing responses/notifications line-by-line to its own
//! stdout — the same convention MCP clients use to spawn local servers.
//! This is the client-facing mirror of [`crate::upstream::stdio`], which
//! does the spawning when the *gateway* is the one launching an upstream.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::token::{StreamToken, TokenKind};

/// Runs until stdin closes (EOF) or the upstream channel closes.
/// Intended to be the entire request loop when the gateway is started
/// with `--transport stdio`; one process serves exactly one session.
pub async fn run(
	to_upstream: mpsc::Sender<serde_json::Value>,
	mut from_upstream: mpsc::Receiver<StreamToken>,
) {
	let stdin = BufReader::new(tokio::io::stdin());
	let mut lines = stdin.lines();
	let mut stdout = tokio::io::stdout();

	loop {
		tokio::select! {
			line = lines.next_line() => {
				match line {
					Ok(Some(line)) => {
						let trimmed = line.trim();
						if trimmed.is_empty() {
							continue;
						}
						match serde_json::from_str::<serde_json::Value>(trimmed) {
							Ok(value) => {
								if to_upstream.send(value).await.is_err() {
									break;
								}
							},
							Err(e) => debug!(error = %e, "dropping malformed stdio line"),
						}
					},
					Ok(None) => break,
					Err(e) => {
						debug!(error = %e, "stdin read error");
						break;
					},
				}
			}
			token = from_upstream.recv() => {
				let Some(token) = token else { break };
				let done = matches!(token.kind, TokenKind::End | TokenKind::Error);
				if write_token(&mut stdout, &token).await.is_err() {
					break;
				}
				if done {
					break;
				}
			}
		}
	}
	let _ = stdout.shutdown().await;
}

async fn write_token(
	stdout: &mut tokio::io::Stdout,
	token: &StreamToken,
) -> std::io::Result<()> {
	let mut line = serde_json::to_vec(token).unwrap_or_default();
	line.push(b'\n');
	stdout.write_all(&line).await?;
	stdout.flush().await
}
