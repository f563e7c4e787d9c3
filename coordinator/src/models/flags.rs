// Copyright 2017-2021 Parity Technologies (UK) Ltd.
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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use coordinator_common::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
	Operational,
	Performance,
	Security,
	Governance,
	Compliance,
	Maintenance,
	Network,
	Resource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
	Info,
	Low,
	Medium,
	High,
	Critical,
}

impl FlagSeverity {
	/// Weight used for per-node scores and network-wide health.
	pub fn weight(self) -> f64 {
		match self {
			FlagSeverity::Critical => 10.0,
			FlagSeverity::High => 5.0,
			FlagSeverity::Medium => 2.0,
			FlagSeverity::Low => 1.0,
			FlagSeverity::Info => 0.1,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
	Active,
	Acknowledged,
	Resolved,
	Expired,
	Escalated,
}

impl FlagStatus {
	pub fn is_terminal(self) -> bool {
		matches!(self, FlagStatus::Resolved | FlagStatus::Expired)
	}

	/// Still counted against the per-node cap and the health score.
	pub fn is_open(self) -> bool {
		matches!(self, FlagStatus::Active | FlagStatus::Acknowledged | FlagStatus::Escalated)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
	System,
	Peer,
	Operator,
	Monitor,
	Governance,
}

/// Operational state attached to a peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeFlag {
	pub flag_id: String,
	pub node_id: NodeId,
	pub flag_type: FlagKind,
	pub severity: FlagSeverity,
	pub status: FlagStatus,
	pub source: FlagSource,
	pub title: String,
	pub description: String,
	#[serde(default)]
	pub metadata: Value,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub expires_at: Option<DateTime<Utc>>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub acknowledged_at: Option<DateTime<Utc>>,
	pub acknowledged_by: Option<String>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub resolved_at: Option<DateTime<Utc>>,
	pub resolved_by: Option<String>,
	#[serde(default)]
	pub escalation_count: u32,
	#[serde(default)]
	pub related_flags: Vec<String>,
}

/// Comparison operator of a rule predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
}

/// Metric a rule predicate reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
	Uptime,
	WorkCredits,
	ResponseTime,
}

/// Node metrics visible to rule evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeMetrics {
	pub uptime_percentage: f64,
	pub work_credits: f64,
	pub response_time_ms: f64,
}

/// The structured predicate of a flag rule. A tagged variant instead of
/// anything reflective; unknown metrics cannot be expressed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RuleCondition {
	#[serde(rename = "type")]
	pub metric: MetricKind,
	pub operator: ConditionOp,
	pub value: f64,
}

impl RuleCondition {
	pub fn evaluate(&self, metrics: &NodeMetrics) -> bool {
		let observed = match self.metric {
			MetricKind::Uptime => metrics.uptime_percentage,
			MetricKind::WorkCredits => metrics.work_credits,
			MetricKind::ResponseTime => metrics.response_time_ms,
		};
		match self.operator {
			ConditionOp::Eq => (observed - self.value).abs() < f64::EPSILON,
			ConditionOp::Ne => (observed - self.value).abs() >= f64::EPSILON,
			ConditionOp::Lt => observed < self.value,
			ConditionOp::Le => observed <= self.value,
			ConditionOp::Gt => observed > self.value,
			ConditionOp::Ge => observed >= self.value,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlagRule {
	pub rule_id: String,
	pub name: String,
	pub description: String,
	pub flag_type: FlagKind,
	pub severity: FlagSeverity,
	pub condition: RuleCondition,
	pub auto_resolve: bool,
	pub auto_escalate: bool,
	/// Hours until flags raised by this rule expire on their own.
	pub expiry_hours: Option<i64>,
	pub enabled: bool,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
}

/// Audit record for every flag transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlagEvent {
	pub event_id: String,
	pub flag_id: String,
	pub node_id: NodeId,
	pub event_type: String,
	pub actor: String,
	#[serde(default)]
	pub details: Value,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
}

/// Cached per-node rollup of open flags.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeFlagSummary {
	pub node_id: NodeId,
	pub total_active: u32,
	pub critical_count: u32,
	pub high_count: u32,
	pub medium_count: u32,
	pub low_count: u32,
	pub info_count: u32,
	pub flag_score: f64,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub last_updated: Option<DateTime<Utc>>,
}

impl NodeFlagSummary {
	pub fn from_open_flags<'a>(node_id: &str, flags: impl Iterator<Item = &'a NodeFlag>) -> Self {
		let mut summary = NodeFlagSummary { node_id: node_id.to_string(), ..Default::default() };
		for flag in flags {
			summary.total_active += 1;
			match flag.severity {
				FlagSeverity::Critical => summary.critical_count += 1,
				FlagSeverity::High => summary.high_count += 1,
				FlagSeverity::Medium => summary.medium_count += 1,
				FlagSeverity::Low => summary.low_count += 1,
				FlagSeverity::Info => summary.info_count += 1,
			}
			summary.flag_score += flag.severity.weight();
		}
		summary.last_updated = Some(Utc::now());
		summary
	}
}

/// Network-wide health: 100 minus the severity-weighted open flag counts,
/// floored at zero.
pub fn network_health(summaries: &[NodeFlagSummary]) -> f64 {
	let burden: f64 = summaries.iter().map(|s| s.flag_score).sum();
	(100.0 - burden).max(0.0)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn flag(severity: FlagSeverity) -> NodeFlag {
		NodeFlag {
			flag_id: "f".into(),
			node_id: "n".into(),
			flag_type: FlagKind::Performance,
			severity,
			status: FlagStatus::Active,
			source: FlagSource::Monitor,
			title: String::new(),
			description: String::new(),
			metadata: Value::Null,
			created_at: Utc::now(),
			expires_at: None,
			acknowledged_at: None,
			acknowledged_by: None,
			resolved_at: None,
			resolved_by: None,
			escalation_count: 0,
			related_flags: Vec::new(),
		}
	}

	#[test]
	fn rule_conditions_compare_the_selected_metric() {
		let rule = RuleCondition { metric: MetricKind::Uptime, operator: ConditionOp::Lt, value: 95.0 };
		let degraded = NodeMetrics { uptime_percentage: 80.0, ..Default::default() };
		let healthy = NodeMetrics { uptime_percentage: 99.0, ..Default::default() };
		assert!(rule.evaluate(&degraded));
		assert!(!rule.evaluate(&healthy));

		let slow = RuleCondition { metric: MetricKind::ResponseTime, operator: ConditionOp::Gt, value: 5000.0 };
		assert!(slow.evaluate(&NodeMetrics { response_time_ms: 6000.0, ..Default::default() }));
	}

	#[test]
	fn condition_round_trips_with_wire_shape() {
		let json = r#"{"type":"work_credits","operator":"lt","value":10.0}"#;
		let cond: RuleCondition = serde_json::from_str(json).unwrap();
		assert_eq!(cond.metric, MetricKind::WorkCredits);
		assert_eq!(cond.operator, ConditionOp::Lt);
	}

	#[test]
	fn summary_weights_severities() {
		let flags =
			vec![flag(FlagSeverity::Critical), flag(FlagSeverity::Medium), flag(FlagSeverity::Info)];
		let summary = NodeFlagSummary::from_open_flags("n", flags.iter());
		assert_eq!(summary.total_active, 3);
		assert_eq!(summary.critical_count, 1);
		assert!((summary.flag_score - 12.1).abs() < 1e-9);
	}

	#[test]
	fn network_health_floors_at_zero() {
		let heavy = NodeFlagSummary { flag_score: 250.0, ..Default::default() };
		assert_eq!(network_health(&[heavy]), 0.0);
		assert_eq!(network_health(&[]), 100.0);
	}

	#[test]
	fn terminal_states_are_closed() {
		assert!(FlagStatus::Resolved.is_terminal());
		assert!(FlagStatus::Expired.is_terminal());
		assert!(FlagStatus::Escalated.is_open());
		assert!(!FlagStatus::Active.is_terminal());
	}
}
