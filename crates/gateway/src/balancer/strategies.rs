//! The six selection strategies a [`super::Pool`] can run: round robin,
//! random, least-connections, least-response-time, smooth weighted
//! round robin, and IP hash.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::RngExt;

use crate::balancer::ServerInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
	RoundRobin,
	Random,
	LeastConnections,
	LeastLatency,
	Weighted,
	IpHash,
}

/// Request-scoped identifiers consulted by [`Strategy::IpHash`] so the
/// same caller lands on the same instance across requests. Every field
/// is optional since not every transport exposes all three.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceContext<'a> {
	pub session_id: Option<&'a str>,
	pub client_ip: Option<&'a str>,
	pub user_id: Option<&'a str>,
}

impl Strategy {
	/// `candidates` is guaranteed non-empty by [`super::Pool::pick`].
	pub fn select<'a>(
		&self,
		candidates: &[&'a Arc<ServerInstance>],
		round_robin_cursor: &AtomicUsize,
		ctx: Option<&BalanceContext>,
	) -> &'a Arc<ServerInstance> {
		match self {
			Strategy::RoundRobin => {
				let idx = round_robin_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
				candidates[idx]
			},
			Strategy::Random => {
				let idx = rand::rng().random_range(0..candidates.len());
				candidates[idx]
			},
			Strategy::LeastConnections => candidates
				.iter()
				.min_by_key(|i| i.active_connections())
				.expect("non-empty candidates"),
			Strategy::LeastLatency => candidates
				.iter()
				.min_by_key(|i| i.latency_micros())
				.expect("non-empty candidates"),
			Strategy::Weighted => select_smooth_weighted(candidates),
			Strategy::IpHash => select_ip_hash(candidates, ctx),
		}
	}
}

/// Nginx-style smooth weighted round robin: every instance accumulates
/// its effective weight into a running `current_weight`; the candidate
/// with the highest accumulator is chosen and then debited by the
/// total weight. Unlike a fresh weighted-random draw per call, this
/// spreads picks evenly across a request burst instead of clustering
/// them by chance.
fn select_smooth_weighted<'a>(candidates: &[&'a Arc<ServerInstance>]) -> &'a Arc<ServerInstance> {
	let total_weight: i64 = candidates.iter().map(|i| i.effective_weight() as i64).sum();
	let mut best_idx = 0;
	let mut best_weight = i64::MIN;
	for (idx, instance) in candidates.iter().enumerate() {
		let ew = instance.effective_weight() as i64;
		let updated = instance.current_weight.fetch_add(ew, Ordering::Relaxed) + ew;
		if updated > best_weight {
			best_weight = updated;
			best_idx = idx;
		}
	}
	candidates[best_idx]
		.current_weight
		.fetch_sub(total_weight.max(1), Ordering::Relaxed);
	candidates[best_idx]
}

fn select_ip_hash<'a>(
	candidates: &[&'a Arc<ServerInstance>],
	ctx: Option<&BalanceContext>,
) -> &'a Arc<ServerInstance> {
	let key = ip_hash_key(ctx);
	let idx = (fnv1a(key.as_bytes()) as usize) % candidates.len();
	candidates[idx]
}

fn ip_hash_key(ctx: Option<&BalanceContext>) -> String {
	let Some(ctx) = ctx else {
		return "default".to_string();
	};
	let mut key = String::new();
	if let Some(session_id) = ctx.session_id {
		key.push_str(session_id);
	}
	if let Some(client_ip) = ctx.client_ip {
		key.push_str(client_ip);
	}
	if let Some(user_id) = ctx.user_id {
		key.push_str(user_id);
	}
	if key.is_empty() { "default".to_string() } else { key }
}

/// FNV-1a, 64-bit. Not cryptographic, just a fast, well-distributed
/// hash with no external dependency for the one place a stable
/// client-to-instance mapping is needed.
fn fnv1a(bytes: &[u8]) -> u64 {
	const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
	const PRIME: u64 = 0x100000001b3;
	let mut hash = OFFSET_BASIS;
	for &byte in bytes {
		hash ^= byte as u64;
		hash = hash.wrapping_mul(PRIME);
	}
	hash
}
