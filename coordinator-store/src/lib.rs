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

//! IO for the PostgreSQL store backing the coordination plane.
//!
//! Components see named collections of JSON documents with whole-document
//! upserts, typed filters, and a handful of grouped reductions. Underneath,
//! every collection is a slice of one `documents` table and every secondary
//! index is a Postgres expression index. There are no cross-collection
//! transactions; each write is independently idempotent.

#![forbid(unsafe_code)]

mod cache;
pub mod collections;
mod error;
mod filter;
mod pipeline;

use std::{collections::VecDeque, time::Duration};

use futures::stream::{self, BoxStream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sqlx::{
	postgres::{PgPool, PgPoolOptions},
	Row,
};

use self::cache::TtlCache;
pub use self::{
	error::{Result, StoreError},
	filter::{Cmp, Filter, Order, Sort},
	pipeline::{Accumulate, GroupRow, Pipeline},
};

/// Run all migrations against the database at `url`.
pub async fn migrate(url: &str) -> Result<()> {
	let pool = PgPoolOptions::new().max_connections(1).connect(url).await?;
	sqlx::migrate!("./migrations").run(&pool).await?;
	Ok(())
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
	pub min_connections: u32,
	pub max_connections: u32,
	/// Maximum entries held by the side KV cache.
	pub cache_capacity: u64,
	/// Park writes that hit an unavailable backend and flush them in the
	/// background, instead of failing fast.
	pub queue_writes: bool,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self { min_connections: 4, max_connections: 28, cache_capacity: 16_384, queue_writes: false }
	}
}

#[derive(Clone, Debug)]
struct QueuedWrite {
	collection: &'static str,
	key: String,
	doc: Value,
}

/// Handle to the document store. Cheap to clone; every component keeps one.
#[derive(Clone)]
pub struct Store {
	pool: PgPool,
	cache: TtlCache,
	writes: Option<flume::Sender<QueuedWrite>>,
}

impl Store {
	/// Connect to the store. Callers run [`migrate`] first; connecting does
	/// not touch the schema. Must be called from within a tokio runtime when
	/// `queue_writes` is enabled.
	pub async fn connect(url: &str, config: StoreConfig) -> Result<Self> {
		let pool = PgPoolOptions::new()
			.min_connections(config.min_connections)
			.max_connections(config.max_connections)
			.connect(url)
			.await?;
		let writes = if config.queue_writes {
			let (tx, rx) = flume::bounded(4_096);
			tokio::spawn(flush_writes(pool.clone(), rx));
			Some(tx)
		} else {
			None
		};
		Ok(Self { pool, cache: TtlCache::new(config.cache_capacity), writes })
	}

	/// Wrap a pre-built pool; used by tests and tools.
	pub fn with_pool(pool: PgPool) -> Self {
		Self { pool, cache: TtlCache::new(1_024), writes: None }
	}

	pub fn collection(&self, name: &'static str) -> Collection<'_> {
		Collection { store: self, name }
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	pub async fn cache_set(&self, key: &str, value: Value, ttl: Duration) {
		self.cache.set(key.to_string(), value, ttl).await;
	}

	pub async fn cache_get(&self, key: &str) -> Option<Value> {
		self.cache.get(key).await
	}

	pub async fn cache_delete(&self, key: &str) {
		self.cache.delete(key).await;
	}
}

/// One named collection of documents.
#[derive(Clone, Copy)]
pub struct Collection<'a> {
	store: &'a Store,
	name: &'static str,
}

impl<'a> Collection<'a> {
	/// Insert or overwrite the document at `key`.
	pub async fn upsert<T: Serialize>(&self, key: &str, doc: &T) -> Result<()> {
		let value = serde_json::to_value(doc)?;
		match upsert_raw(&self.store.pool, self.name, key, &value).await {
			Ok(()) => Ok(()),
			Err(e) if e.is_unavailable() => match &self.store.writes {
				Some(tx) => {
					tx.send(QueuedWrite { collection: self.name, key: key.to_string(), doc: value })
						.map_err(|_| StoreError::QueueClosed)?;
					log::warn!("store unavailable; queued write to {}/{}", self.name, key);
					Ok(())
				}
				None => Err(e),
			},
			Err(e) => Err(e),
		}
	}

	/// Insert only if `key` is absent. Returns false when the document (or a
	/// document colliding on a unique index) already exists, leaving the
	/// original untouched.
	pub async fn insert<T: Serialize>(&self, key: &str, doc: &T) -> Result<bool> {
		let value = serde_json::to_value(doc)?;
		let res = sqlx::query(
			"INSERT INTO documents (collection, key, doc) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
		)
		.bind(self.name)
		.bind(key)
		.bind(&value)
		.execute(&self.store.pool)
		.await;
		match res {
			Ok(done) => Ok(done.rows_affected() > 0),
			Err(e) => match StoreError::from(e) {
				StoreError::Duplicate(_) => Ok(false),
				other => Err(other),
			},
		}
	}

	/// Fetch the document stored at `key`.
	pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
		let row = sqlx::query("SELECT doc FROM documents WHERE collection = $1 AND key = $2")
			.bind(self.name)
			.bind(key)
			.fetch_optional(&self.store.pool)
			.await?;
		row.map(|r| decode_doc(&r)).transpose()
	}

	pub async fn find_one<T: DeserializeOwned>(&self, filter: &Filter) -> Result<Option<T>> {
		let mut found = self.find(filter, &[], Some(1)).await?;
		Ok(found.pop())
	}

	pub async fn find<T: DeserializeOwned>(
		&self,
		filter: &Filter,
		sort: &[Sort],
		limit: Option<i64>,
	) -> Result<Vec<T>> {
		let (cond, binds) = filter.render(2);
		let mut sql =
			format!("SELECT doc FROM documents WHERE collection = $1 AND {}", cond);
		sql.push_str(&filter::render_sorts(sort));
		if let Some(n) = limit {
			sql.push_str(&format!(" LIMIT {}", n));
		}
		let mut query = sqlx::query(&sql).bind(self.name);
		for bind in binds {
			query = query.bind(bind);
		}
		let rows = query.fetch_all(&self.store.pool).await?;
		rows.iter().map(decode_doc).collect()
	}

	/// Lazily walk every document matching `filter`, in key order, fetching
	/// `batch` rows at a time. The stream owns its connection state and may
	/// outlive this handle.
	pub fn stream<T: DeserializeOwned + Send + 'static>(
		&self,
		filter: Filter,
		batch: usize,
	) -> BoxStream<'static, Result<T>> {
		struct State {
			pool: PgPool,
			name: &'static str,
			filter: Filter,
			last_key: String,
			buffer: VecDeque<(String, Value)>,
			done: bool,
			batch: usize,
		}

		let state = State {
			pool: self.store.pool.clone(),
			name: self.name,
			filter,
			last_key: String::new(),
			buffer: VecDeque::new(),
			done: false,
			batch: batch.max(1),
		};

		stream::try_unfold(state, |mut st| async move {
			loop {
				if let Some((key, doc)) = st.buffer.pop_front() {
					st.last_key = key;
					let item: T = serde_json::from_value(doc)?;
					return Ok(Some((item, st)));
				}
				if st.done {
					return Ok(None);
				}
				let (cond, binds) = st.filter.render(3);
				let sql = format!(
					"SELECT key, doc FROM documents WHERE collection = $1 AND key > $2 AND {} \
					 ORDER BY key LIMIT {}",
					cond, st.batch
				);
				let mut query = sqlx::query(&sql).bind(st.name).bind(st.last_key.clone());
				for bind in binds {
					query = query.bind(bind);
				}
				let rows = query.fetch_all(&st.pool).await?;
				if rows.len() < st.batch {
					st.done = true;
				}
				for row in rows {
					let key: String = row.try_get("key")?;
					let doc: Value = row.try_get("doc")?;
					st.buffer.push_back((key, doc));
				}
				if st.buffer.is_empty() {
					return Ok(None);
				}
			}
		})
		.boxed()
	}

	pub async fn delete(&self, key: &str) -> Result<bool> {
		let done = sqlx::query("DELETE FROM documents WHERE collection = $1 AND key = $2")
			.bind(self.name)
			.bind(key)
			.execute(&self.store.pool)
			.await?;
		Ok(done.rows_affected() > 0)
	}

	pub async fn delete_many(&self, filter: &Filter) -> Result<u64> {
		let (cond, binds) = filter.render(2);
		let sql = format!("DELETE FROM documents WHERE collection = $1 AND {}", cond);
		let mut query = sqlx::query(&sql).bind(self.name);
		for bind in binds {
			query = query.bind(bind);
		}
		Ok(query.execute(&self.store.pool).await?.rows_affected())
	}

	pub async fn count(&self, filter: &Filter) -> Result<i64> {
		let (cond, binds) = filter.render(2);
		let sql = format!("SELECT COUNT(*) FROM documents WHERE collection = $1 AND {}", cond);
		let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(self.name);
		for bind in binds {
			query = query.bind(bind);
		}
		Ok(query.fetch_one(&self.store.pool).await?)
	}

	pub async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<GroupRow>> {
		let (sql, binds) = pipeline.render();
		let mut query = sqlx::query(&sql).bind(self.name);
		for bind in binds {
			query = query.bind(bind);
		}
		let rows = query.fetch_all(&self.store.pool).await?;
		let offset = if pipeline.has_group_key() { 1 } else { 0 };
		let mut out = Vec::with_capacity(rows.len());
		for row in rows {
			let key =
				if pipeline.has_group_key() { row.try_get::<Option<Value>, _>(0)? } else { None };
			let mut values = serde_json::Map::new();
			for (idx, (alias, _)) in pipeline.accumulators().iter().enumerate() {
				let value = if pipeline.is_count_at(idx) {
					Value::from(row.try_get::<i64, _>(offset + idx)?)
				} else {
					row.try_get::<Option<f64>, _>(offset + idx)?.map(Value::from).unwrap_or(Value::Null)
				};
				values.insert(alias.clone(), value);
			}
			out.push(GroupRow { key, values });
		}
		Ok(out)
	}

	/// Create a secondary (optionally unique) expression index over `fields`
	/// for this collection. Idempotent.
	pub async fn create_index(&self, fields: &[&str], unique: bool) -> Result<()> {
		let idx_name = format!("idx_{}_{}", self.name, fields.join("_").replace('.', "_"));
		let exprs: Vec<String> =
			fields.iter().map(|f| format!("({})", filter::jsonb_text_path(f))).collect();
		let sql = format!(
			"CREATE {}INDEX IF NOT EXISTS \"{}\" ON documents ({}) WHERE collection = '{}'",
			if unique { "UNIQUE " } else { "" },
			idx_name,
			exprs.join(", "),
			self.name,
		);
		sqlx::query(&sql).execute(&self.store.pool).await?;
		Ok(())
	}
}

fn decode_doc<T: DeserializeOwned>(row: &sqlx::postgres::PgRow) -> Result<T> {
	let doc: Value = row.try_get("doc")?;
	Ok(serde_json::from_value(doc)?)
}

async fn upsert_raw(pool: &PgPool, collection: &str, key: &str, doc: &Value) -> Result<()> {
	sqlx::query(
		"INSERT INTO documents (collection, key, doc) VALUES ($1, $2, $3) \
		 ON CONFLICT (collection, key) DO UPDATE SET doc = EXCLUDED.doc, updated_at = now()",
	)
	.bind(collection)
	.bind(key)
	.bind(doc)
	.execute(pool)
	.await?;
	Ok(())
}

/// Drain parked writes, retrying while the backend stays unreachable. One
/// bad document is logged and dropped rather than wedging the queue.
async fn flush_writes(pool: PgPool, rx: flume::Receiver<QueuedWrite>) {
	while let Ok(write) = rx.recv_async().await {
		loop {
			match upsert_raw(&pool, write.collection, &write.key, &write.doc).await {
				Ok(()) => break,
				Err(e) if e.is_unavailable() => {
					log::debug!("store still unavailable; holding {} queued writes", rx.len() + 1);
					tokio::time::sleep(Duration::from_secs(5)).await;
				}
				Err(e) => {
					log::error!("dropping queued write to {}/{}: {}", write.collection, write.key, e);
					break;
				}
			}
		}
	}
}
