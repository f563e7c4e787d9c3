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

//! Grouped reductions over a collection. Small on purpose: match + group
//! with the handful of accumulators the tally, summary, and overview paths
//! actually use.

use serde_json::Value;

use crate::filter::{jsonb_path, jsonb_text_path, Filter};

/// Accumulator over the documents of one group. Numeric accumulators cast
/// the field text to double precision; non-numeric fields reduce to NULL.
#[derive(Clone, Debug)]
pub enum Accumulate {
	Count,
	Sum(String),
	Avg(String),
	Min(String),
	Max(String),
}

impl Accumulate {
	fn sql(&self) -> String {
		match self {
			Accumulate::Count => "COUNT(*)".to_string(),
			Accumulate::Sum(f) => format!("SUM(({})::double precision)", jsonb_text_path(f)),
			Accumulate::Avg(f) => format!("AVG(({})::double precision)", jsonb_text_path(f)),
			Accumulate::Min(f) => format!("MIN(({})::double precision)", jsonb_text_path(f)),
			Accumulate::Max(f) => format!("MAX(({})::double precision)", jsonb_text_path(f)),
		}
	}

	fn is_count(&self) -> bool {
		matches!(self, Accumulate::Count)
	}
}

/// A match-then-group pipeline.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
	pub filter: Filter,
	group_by: Option<String>,
	accumulators: Vec<(String, Accumulate)>,
}

impl Pipeline {
	pub fn matching(filter: Filter) -> Self {
		Self { filter, ..Self::default() }
	}

	/// Group by a document field. Without this the whole match is one group.
	pub fn group_by(mut self, field: &str) -> Self {
		self.group_by = Some(field.to_string());
		self
	}

	pub fn accumulate(mut self, alias: &str, acc: Accumulate) -> Self {
		self.accumulators.push((alias.to_string(), acc));
		self
	}

	pub(crate) fn accumulators(&self) -> &[(String, Accumulate)] {
		&self.accumulators
	}

	pub(crate) fn has_group_key(&self) -> bool {
		self.group_by.is_some()
	}

	pub(crate) fn is_count_at(&self, idx: usize) -> bool {
		self.accumulators[idx].1.is_count()
	}

	/// Render the full statement. `$1` is reserved for the collection name.
	pub(crate) fn render(&self) -> (String, Vec<Value>) {
		let (cond, binds) = self.filter.render(2);
		let mut selects = Vec::new();
		if let Some(field) = &self.group_by {
			selects.push(format!("{} AS group_key", jsonb_path(field)));
		}
		for (alias, acc) in &self.accumulators {
			selects.push(format!("{} AS \"{}\"", acc.sql(), alias));
		}
		let mut sql = format!(
			"SELECT {} FROM documents WHERE collection = $1 AND {}",
			selects.join(", "),
			cond
		);
		if let Some(field) = &self.group_by {
			sql.push_str(&format!(" GROUP BY {}", jsonb_path(field)));
		}
		(sql, binds)
	}
}

/// One group of an aggregation result.
#[derive(Clone, Debug)]
pub struct GroupRow {
	/// The grouping key, when the pipeline grouped by a field.
	pub key: Option<Value>,
	/// Accumulator results by alias. Counts are integers, the rest doubles
	/// (or null when no row had a numeric value).
	pub values: serde_json::Map<String, Value>,
}

impl GroupRow {
	pub fn f64(&self, alias: &str) -> f64 {
		self.values.get(alias).and_then(Value::as_f64).unwrap_or(0.0)
	}

	pub fn i64(&self, alias: &str) -> i64 {
		self.values.get(alias).and_then(Value::as_i64).unwrap_or(0)
	}

	pub fn key_str(&self) -> Option<&str> {
		self.key.as_ref().and_then(Value::as_str)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn grouped_pipeline_renders_group_key_first() {
		let p = Pipeline::matching(Filter::new().eq("epoch", 3))
			.group_by("entity_id")
			.accumulate("total", Accumulate::Sum("value".to_string()))
			.accumulate("n", Accumulate::Count);
		let (sql, binds) = p.render();
		assert_eq!(
			sql,
			"SELECT doc#>'{entity_id}' AS group_key, \
			 SUM((doc#>>'{value}')::double precision) AS \"total\", COUNT(*) AS \"n\" \
			 FROM documents WHERE collection = $1 AND doc#>'{epoch}' = $2 \
			 GROUP BY doc#>'{entity_id}'"
		);
		assert_eq!(binds.len(), 1);
	}

	#[test]
	fn ungrouped_pipeline_reduces_the_whole_match() {
		let p = Pipeline::matching(Filter::new()).accumulate("n", Accumulate::Count);
		let (sql, _) = p.render();
		assert_eq!(sql, "SELECT COUNT(*) AS \"n\" FROM documents WHERE collection = $1 AND TRUE");
	}
}
