// Copyright 2019-2021 Parity Technologies (UK) Ltd.
// This file is part of overlay-coordinator.

// overlay-coordinator is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// overlay-coordinator is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with overlay-coordinator.  If not, see <http://www.gnu.org/licenses/>.

//! Side KV cache with per-entry TTL. Ephemeral by design; nothing here
//! survives a restart, and nothing here is authoritative.

use std::time::{Duration, Instant};

use moka::{future::Cache, Expiry};
use serde_json::Value;

#[derive(Clone)]
pub(crate) struct Entry {
	value: Value,
	ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
	fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
		Some(entry.ttl)
	}
}

#[derive(Clone)]
pub(crate) struct TtlCache {
	inner: Cache<String, Entry>,
}

impl TtlCache {
	pub(crate) fn new(max_capacity: u64) -> Self {
		let inner = Cache::builder().max_capacity(max_capacity).expire_after(PerEntryTtl).build();
		Self { inner }
	}

	pub(crate) async fn set(&self, key: String, value: Value, ttl: Duration) {
		self.inner.insert(key, Entry { value, ttl }).await;
	}

	pub(crate) async fn get(&self, key: &str) -> Option<Value> {
		self.inner.get(key).await.map(|e| e.value)
	}

	pub(crate) async fn delete(&self, key: &str) {
		self.inner.invalidate(key).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[tokio::test]
	async fn entries_expire_on_their_own_ttl() {
		let cache = TtlCache::new(16);
		cache.set("short".into(), json!(1), Duration::from_millis(20)).await;
		cache.set("long".into(), json!(2), Duration::from_secs(60)).await;
		assert_eq!(cache.get("short").await, Some(json!(1)));

		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(cache.get("short").await, None);
		assert_eq!(cache.get("long").await, Some(json!(2)));
	}

	#[tokio::test]
	async fn delete_removes_immediately() {
		let cache = TtlCache::new(16);
		cache.set("k".into(), json!("v"), Duration::from_secs(60)).await;
		cache.delete("k").await;
		assert_eq!(cache.get("k").await, None);
	}
}
