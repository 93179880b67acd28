//! JSON-RPC 2.0 envelope validation, legacy-envelope normalization, and
//! the rolling message log used for replay/debugging. Transport-agnostic:
//! every adapter in [`crate::transport`] hands raw `serde_json::Value`s
//! through here before they reach a session.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The canonical JSON-RPC 2.0 envelope. Unknown fields are silently
/// ignored for forward compatibility — no `deny_unknown_fields` here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcEnvelope {
	pub jsonrpc: String,
	pub method: Option<String>,
	#[serde(default)]
	pub id: Option<Value>,
	#[serde(default)]
	pub params: Option<Value>,
}

/// Older clients send `{"type":…,"tool":…,"arguments":…,"data":…}`
/// instead of a JSON-RPC envelope. Accepted and normalized alongside it
/// so dispatch never has to care which shape a client used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyEnvelope {
	#[serde(rename = "type", default)]
	pub kind: Option<String>,
	#[serde(default)]
	pub tool: Option<String>,
	#[serde(default)]
	pub arguments: Option<Value>,
	#[serde(default)]
	pub data: Option<Value>,
}

/// One parsed client message, in whichever shape it arrived. Use
/// [`Message::effective_method`] / [`Message::effective_arguments`]
/// rather than matching on the variant directly — that's what makes
/// legacy and JSON-RPC payloads dispatch identically.
#[derive(Debug, Clone)]
pub enum Message {
	JsonRpc(JsonRpcEnvelope),
	Legacy(LegacyEnvelope),
}

impl Message {
	pub fn effective_method(&self) -> Option<&str> {
		match self {
			Message::JsonRpc(e) => e.method.as_deref(),
			Message::Legacy(e) => e.tool.as_deref().or(e.kind.as_deref()),
		}
	}

	pub fn effective_arguments(&self) -> Option<&Value> {
		match self {
			Message::JsonRpc(e) => e.params.as_ref(),
			Message::Legacy(e) => e.arguments.as_ref().or(e.data.as_ref()),
		}
	}

	/// A message with an id (JSON-RPC) or any legacy message (which has
	/// no notification form) expects a response; a JSON-RPC notification
	/// does not.
	pub fn is_request(&self) -> bool {
		match self {
			Message::JsonRpc(e) => e.id.is_some(),
			Message::Legacy(_) => true,
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
	#[error("not valid json: {0}")]
	Malformed(String),
	#[error("missing or invalid \"jsonrpc\" field, expected \"2.0\"")]
	BadVersion,
	#[error("requests must have a \"method\" field")]
	MissingMethod,
}

/// Parses and validates one client message, accepting both the
/// canonical JSON-RPC 2.0 envelope and the legacy `{type,tool,
/// arguments,data}` shape. Distinguished by the presence of a
/// `"jsonrpc"` field.
pub fn parse_value(value: Value) -> Result<Message, EnvelopeError> {
	if value.get("jsonrpc").is_some() {
		let envelope: JsonRpcEnvelope =
			serde_json::from_value(value).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
		if envelope.jsonrpc != "2.0" {
			return Err(EnvelopeError::BadVersion);
		}
		if envelope.method.is_none() {
			return Err(EnvelopeError::MissingMethod);
		}
		Ok(Message::JsonRpc(envelope))
	} else {
		let envelope: LegacyEnvelope =
			serde_json::from_value(value).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
		if envelope.tool.is_none() && envelope.kind.is_none() {
			return Err(EnvelopeError::MissingMethod);
		}
		Ok(Message::Legacy(envelope))
	}
}

/// Parses one message from raw JSON text.
pub fn parse(raw: &str) -> Result<Message, EnvelopeError> {
	let value: Value = serde_json::from_str(raw).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
	parse_value(value)
}

/// Parses a single message or a batch array of messages, per the
/// JSON-RPC 2.0 batch convention.
pub fn parse_batch(raw: &str) -> Result<Vec<Message>, EnvelopeError> {
	let value: Value = serde_json::from_str(raw).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
	match value {
		Value::Array(items) => items.into_iter().map(parse_value).collect(),
		single => parse_value(single).map(|m| vec![m]),
	}
}

/// Bounded ring of the last N raw messages seen on a session, kept for
/// admin-surface debugging and for resuming a streaming connection that
/// reconnects without a `Last-Event-ID`.
pub struct MessageLog {
	capacity: usize,
	entries: VecDeque<Value>,
}

impl MessageLog {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			entries: VecDeque::with_capacity(capacity.min(256)),
		}
	}

	pub fn record(&mut self, message: Value) {
		if self.entries.len() >= self.capacity {
			self.entries.pop_front();
		}
		self.entries.push_back(message);
	}

	pub fn snapshot(&self) -> Vec<Value> {
		self.entries.iter().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_wrong_jsonrpc_version() {
		let err = parse(r#"{"jsonrpc":"1.0","method":"ping"}"#).unwrap_err();
		assert!(matches!(err, EnvelopeError::BadVersion));
	}

	#[test]
	fn rejects_missing_method() {
		let err = parse(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
		assert!(matches!(err, EnvelopeError::MissingMethod));
	}

	#[test]
	fn accepts_well_formed_request() {
		let msg = parse(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).unwrap();
		assert!(msg.is_request());
		assert_eq!(msg.effective_method(), Some("ping"));
	}

	#[test]
	fn accepts_well_formed_notification() {
		let msg = parse(r#"{"jsonrpc":"2.0","method":"log"}"#).unwrap();
		assert!(!msg.is_request());
	}

	#[test]
	fn unknown_fields_are_silently_ignored() {
		let msg = parse(r#"{"jsonrpc":"2.0","method":"ping","id":1,"extra":"whatever"}"#).unwrap();
		assert_eq!(msg.effective_method(), Some("ping"));
	}

	#[test]
	fn legacy_envelope_normalizes_to_effective_method_and_arguments() {
		let msg = parse(r#"{"type":"call","tool":"search","arguments":{"q":"rust"}}"#).unwrap();
		assert!(matches!(msg, Message::Legacy(_)));
		assert_eq!(msg.effective_method(), Some("search"));
		assert_eq!(msg.effective_arguments(), Some(&serde_json::json!({"q": "rust"})));
	}

	#[test]
	fn legacy_envelope_falls_back_to_data_and_type() {
		let msg = parse(r#"{"type":"ping","data":{"n":1}}"#).unwrap();
		assert_eq!(msg.effective_method(), Some("ping"));
		assert_eq!(msg.effective_arguments(), Some(&serde_json::json!({"n": 1})));
	}

	#[test]
	fn legacy_envelope_without_tool_or_type_is_rejected() {
		let err = parse(r#"{"arguments":{}}"#).unwrap_err();
		assert!(matches!(err, EnvelopeError::MissingMethod));
	}

	#[test]
	fn legacy_and_jsonrpc_envelopes_normalize_identically() {
		let rpc = parse(r#"{"jsonrpc":"2.0","method":"search","params":{"q":"rust"},"id":1}"#).unwrap();
		let legacy = parse(r#"{"type":"call","tool":"search","arguments":{"q":"rust"}}"#).unwrap();
		assert_eq!(rpc.effective_method(), legacy.effective_method());
		assert_eq!(rpc.effective_arguments(), legacy.effective_arguments());
	}

	#[test]
	fn batch_array_is_accepted() {
		let batch = parse_batch(
			r#"[{"jsonrpc":"2.0","method":"a","id":1},{"jsonrpc":"2.0","method":"b"}]"#,
		)
		.unwrap();
		assert_eq!(batch.len(), 2);
		assert_eq!(batch[0].effective_method(), Some("a"));
		assert!(!batch[1].is_request());
	}

	#[test]
	fn single_message_still_parses_through_batch_entrypoint() {
		let batch = parse_batch(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
		assert_eq!(batch.len(), 1);
	}

	#[test]
	fn message_log_evicts_oldest_when_full() {
		let mut log = MessageLog::new(2);
		log.record(serde_json::json!(1));
		log.record(serde_json::json!(2));
		log.record(serde_json::json!(3));
		assert_eq!(log.snapshot(), vec![serde_json::json!(2), serde_json::json!(3)]);
	}
}
