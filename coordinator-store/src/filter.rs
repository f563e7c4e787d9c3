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

//! Typed filters over JSONB documents, rendered to parameterized SQL.
//!
//! Every comparison is a jsonb comparison: numbers order numerically,
//! strings lexically, and `null` compares equal only to `null`. Field paths
//! use `.` to descend into embedded documents.

use serde_json::Value;

/// Comparison operator for a single field clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cmp {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
}

impl Cmp {
	fn sql(self) -> &'static str {
		match self {
			Cmp::Eq => "=",
			Cmp::Ne => "<>",
			Cmp::Lt => "<",
			Cmp::Le => "<=",
			Cmp::Gt => ">",
			Cmp::Ge => ">=",
		}
	}
}

#[derive(Clone, Debug)]
enum Clause {
	Cmp { path: String, cmp: Cmp, value: Value },
	In { path: String, values: Vec<Value> },
	IsNull { path: String },
	NotNull { path: String },
	Any(Vec<Filter>),
}

/// A conjunction of clauses over one collection's documents.
#[derive(Clone, Debug, Default)]
pub struct Filter {
	clauses: Vec<Clause>,
}

impl Filter {
	pub fn new() -> Self {
		Self::default()
	}

	/// True if no clause has been added; renders as `TRUE`.
	pub fn is_empty(&self) -> bool {
		self.clauses.is_empty()
	}

	pub fn cmp(mut self, field: &str, cmp: Cmp, value: impl Into<Value>) -> Self {
		self.clauses.push(Clause::Cmp { path: field.to_string(), cmp, value: value.into() });
		self
	}

	pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
		self.cmp(field, Cmp::Eq, value)
	}

	pub fn ne(self, field: &str, value: impl Into<Value>) -> Self {
		self.cmp(field, Cmp::Ne, value)
	}

	pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
		self.cmp(field, Cmp::Lt, value)
	}

	pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
		self.cmp(field, Cmp::Le, value)
	}

	pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
		self.cmp(field, Cmp::Gt, value)
	}

	pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
		self.cmp(field, Cmp::Ge, value)
	}

	pub fn is_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
		self.clauses.push(Clause::In {
			path: field.to_string(),
			values: values.into_iter().map(Into::into).collect(),
		});
		self
	}

	/// Field is absent or JSON `null`.
	pub fn is_null(mut self, field: &str) -> Self {
		self.clauses.push(Clause::IsNull { path: field.to_string() });
		self
	}

	/// Field is present and not JSON `null`.
	pub fn not_null(mut self, field: &str) -> Self {
		self.clauses.push(Clause::NotNull { path: field.to_string() });
		self
	}

	/// Disjunction of sub-filters, ANDed with the rest of this filter.
	pub fn any(mut self, branches: impl IntoIterator<Item = Filter>) -> Self {
		self.clauses.push(Clause::Any(branches.into_iter().collect()));
		self
	}

	/// Render to a SQL condition. Placeholders start at `$first`; the binds
	/// returned line up with them in order.
	pub(crate) fn render(&self, first: usize) -> (String, Vec<Value>) {
		let mut binds = Vec::new();
		let sql = self.render_into(first, &mut binds);
		(sql, binds)
	}

	fn render_into(&self, first: usize, binds: &mut Vec<Value>) -> String {
		if self.clauses.is_empty() {
			return "TRUE".to_string();
		}
		let mut parts = Vec::with_capacity(self.clauses.len());
		for clause in &self.clauses {
			match clause {
				Clause::Cmp { path, cmp, value } => {
					binds.push(value.clone());
					parts.push(format!("{} {} ${}", jsonb_path(path), cmp.sql(), first + binds.len() - 1));
				}
				Clause::In { path, values } => {
					if values.is_empty() {
						parts.push("FALSE".to_string());
						continue;
					}
					let mut holes = Vec::with_capacity(values.len());
					for value in values {
						binds.push(value.clone());
						holes.push(format!("${}", first + binds.len() - 1));
					}
					parts.push(format!("{} IN ({})", jsonb_path(path), holes.join(", ")));
				}
				Clause::IsNull { path } => {
					let p = jsonb_path(path);
					parts.push(format!("({p} IS NULL OR {p} = 'null'::jsonb)", p = p));
				}
				Clause::NotNull { path } => {
					let p = jsonb_path(path);
					parts.push(format!("({p} IS NOT NULL AND {p} <> 'null'::jsonb)", p = p));
				}
				Clause::Any(branches) => {
					let rendered: Vec<String> =
						branches.iter().map(|b| b.render_into(first, binds)).collect();
					parts.push(format!("({})", rendered.join(" OR ")));
				}
			}
		}
		parts.join(" AND ")
	}
}

/// Sort direction for one field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
	Asc,
	Desc,
}

/// One sort term; jsonb ordering makes numbers sort numerically.
#[derive(Clone, Debug)]
pub struct Sort {
	pub field: String,
	pub order: Order,
}

impl Sort {
	pub fn asc(field: &str) -> Self {
		Self { field: field.to_string(), order: Order::Asc }
	}

	pub fn desc(field: &str) -> Self {
		Self { field: field.to_string(), order: Order::Desc }
	}
}

pub(crate) fn render_sorts(sorts: &[Sort]) -> String {
	if sorts.is_empty() {
		return String::new();
	}
	let terms: Vec<String> = sorts
		.iter()
		.map(|s| {
			let dir = match s.order {
				Order::Asc => "ASC",
				Order::Desc => "DESC",
			};
			format!("{} {}", jsonb_path(&s.field), dir)
		})
		.collect();
	format!(" ORDER BY {}", terms.join(", "))
}

/// `a.b.c` → `doc#>'{a,b,c}'`. Paths come from code, never from callers over
/// the wire; anything outside `[A-Za-z0-9_.]` is stripped.
pub(crate) fn jsonb_path(field: &str) -> String {
	format!("doc#>'{{{}}}'", sanitize(field).replace('.', ","))
}

/// Text-extraction variant, for expression indices.
pub(crate) fn jsonb_text_path(field: &str) -> String {
	format!("doc#>>'{{{}}}'", sanitize(field).replace('.', ","))
}

fn sanitize(field: &str) -> String {
	field.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.').collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn empty_filter_renders_true() {
		let (sql, binds) = Filter::new().render(2);
		assert_eq!(sql, "TRUE");
		assert!(binds.is_empty());
	}

	#[test]
	fn conjunction_numbers_placeholders_in_order() {
		let (sql, binds) = Filter::new().eq("node_id", "n1").gte("slot", 100).render(2);
		assert_eq!(sql, "doc#>'{node_id}' = $2 AND doc#>'{slot}' >= $3");
		assert_eq!(binds, vec![json!("n1"), json!(100)]);
	}

	#[test]
	fn disjunction_shares_the_bind_sequence() {
		let filter = Filter::new()
			.eq("task_type", "uptime_beacon")
			.any(vec![Filter::new().eq("node_id", "e"), Filter::new().eq("pool_id", "e")]);
		let (sql, binds) = filter.render(2);
		assert_eq!(
			sql,
			"doc#>'{task_type}' = $2 AND (doc#>'{node_id}' = $3 OR doc#>'{pool_id}' = $4)"
		);
		assert_eq!(binds.len(), 3);
	}

	#[test]
	fn nested_paths_descend_with_hash_arrow() {
		let (sql, _) = Filter::new().eq("configuration.reward_method", "equal").render(1);
		assert_eq!(sql, "doc#>'{configuration,reward_method}' = $1");
	}

	#[test]
	fn in_clause_binds_every_member() {
		let (sql, binds) = Filter::new().is_in("status", vec!["active", "degraded"]).render(1);
		assert_eq!(sql, "doc#>'{status}' IN ($1, $2)");
		assert_eq!(binds.len(), 2);
	}

	#[test]
	fn empty_in_clause_matches_nothing() {
		let (sql, binds) = Filter::new().is_in("status", Vec::<String>::new()).render(1);
		assert_eq!(sql, "FALSE");
		assert!(binds.is_empty());
	}

	#[test]
	fn null_checks_cover_absent_and_json_null() {
		let (sql, _) = Filter::new().not_null("pool_id").render(1);
		assert_eq!(sql, "(doc#>'{pool_id}' IS NOT NULL AND doc#>'{pool_id}' <> 'null'::jsonb)");
	}

	#[test]
	fn sorts_render_after_the_condition() {
		let sql = render_sorts(&[Sort::desc("credits"), Sort::asc("entity_id")]);
		assert_eq!(sql, " ORDER BY doc#>'{credits}' DESC, doc#>'{entity_id}' ASC");
	}

	#[test]
	fn hostile_field_names_are_stripped() {
		assert_eq!(jsonb_path("a'; DROP TABLE--"), "doc#>'{aDROPTABLE}'");
	}
}
