//! STDIO upstream connector: spawns the configured command as a child
//! process and speaks line-delimited JSON-RPC over its stdin/stdout,
//! built directly on `tokio::process` with `kill_on_drop` so an
//! abandoned upstream never outlives its handle.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::UpstreamError;
use crate::session::SessionId;
use crate::token::StreamToken;
use crate::transport::TransportKind;
use crate::upstream::{UpstreamHandle, UpstreamTarget};

pub async fn connect(
	target: &UpstreamTarget,
	session_id: SessionId,
) -> Result<UpstreamHandle, UpstreamError> {
	let mut parts = target.address.split_whitespace();
	let program = parts.next().ok_or_else(|| {
		UpstreamError::Connect("stdio upstream address must name a program".to_string())
	})?;

	let mut child = Command::new(program)
		.args(parts)
		.stdin(std::process::Stdio::piped())
		.stdout(std::process::Stdio::piped())
		.stderr(std::process::Stdio::null())
		.kill_on_drop(true)
		.spawn()
		.map_err(|e| UpstreamError::Connect(e.to_string()))?;

	let mut stdin = child
		.stdin
		.take()
		.ok_or_else(|| UpstreamError::Connect("child process had no stdin".to_string()))?;
	let stdout = child
		.stdout
		.take()
		.ok_or_else(|| UpstreamError::Connect("child process had no stdout".to_string()))?;

	let (to_upstream_tx, mut to_upstream_rx) = mpsc::channel::<serde_json::Value>(64);
	let (token_tx, token_rx) = mpsc::channel::<StreamToken>(256);

	let write_session = session_id.clone();
	tokio::spawn(async move {
		while let Some(message) = to_upstream_rx.recv().await {
			let mut line = message.to_string();
			line.push('\n');
			if let Err(e) = stdin.write_all(line.as_bytes()).await {
				warn!(session_id = %write_session, error = %e, "stdio upstream write failed");
				break;
			}
		}
	});

	tokio::spawn(async move {
		// Hold the child handle for the lifetime of the read loop so it's
		// killed (via kill_on_drop) as soon as the upstream is torn down.
		let _child = child;
		let mut lines = BufReader::new(stdout).lines();
		let mut seq = 0u64;
		if token_tx
			.send(StreamToken::start(session_id.clone()))
			.await
			.is_err()
		{
			return;
		}
		loop {
			match lines.next_line().await {
				Ok(Some(line)) => {
					let trimmed = line.trim();
					if trimmed.is_empty() {
						continue;
					}
					match serde_json::from_str::<serde_json::Value>(trimmed) {
						Ok(value) => {
							seq += 1;
							if token_tx
								.send(StreamToken::data(session_id.clone(), seq, value))
								.await
								.is_err()
							{
								return;
							}
						},
						Err(e) => debug!(error = %e, "malformed stdio upstream line"),
					}
				},
				Ok(None) => break,
				Err(e) => {
					debug!(error = %e, "stdio upstream read error");
					break;
				},
			}
		}
		seq += 1;
		let _ = token_tx.send(StreamToken::end(session_id, seq)).await;
	});

	Ok(UpstreamHandle::new(TransportKind::Stdio, to_upstream_tx, token_rx))
}

#[cfg(test)]
mod tests {
	use std::io::Write;
	use std::os::unix::fs::PermissionsExt;

	use assert_matches::assert_matches;

	use super::*;
	use crate::token::TokenKind;
	use crate::upstream::UpstreamId;

	#[tokio::test]
	async fn child_stdout_line_becomes_a_data_token() {
		let mut script = tempfile::NamedTempFile::new().unwrap();
		writeln!(script, "#!/bin/sh\necho '{{\"hello\":1}}'").unwrap();
		let mut perms = script.as_file().metadata().unwrap().permissions();
		perms.set_mode(0o755);
		script.as_file().set_permissions(perms).unwrap();

		let target = UpstreamTarget {
			id: UpstreamId("echo".to_string()),
			kind: TransportKind::Stdio,
			address: format!("/bin/sh {}", script.path().display()),
		};
		let handle = connect(&target, SessionId::new()).await.unwrap();
		let mut receiver = handle.take_receiver().await.unwrap();

		let start = receiver.recv().await.unwrap();
		assert_matches!(start.kind, TokenKind::Start);

		let token = receiver.recv().await.unwrap();
		assert_matches!(token.kind, TokenKind::Data);
		assert_eq!(token.payload, Some(serde_json::json!({"hello": 1})));

		let end = receiver.recv().await.unwrap();
		assert_matches!(end.kind, TokenKind::End);
	}
}
