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

//! Flag & health engine: rule-driven operational flags with escalation,
//! auto-resolution, per-node summaries and the network health score.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use xtra::prelude::*;

use coordinator_common::{util, NodeId};
use coordinator_store::{collections, Filter, Sort, Store};

use crate::{
	actors::{spawn_ticker, Die},
	error::{Error, Result},
	models::{
		flags::{
			network_health, ConditionOp, FlagEvent, FlagKind, FlagRule, FlagSeverity, FlagSource,
			FlagStatus, MetricKind, NodeFlag, NodeFlagSummary, NodeMetrics, RuleCondition,
		},
		peer::Peer,
	},
};

#[derive(Clone, Debug, Deserialize)]
pub struct FlagConfig {
	/// Seconds between rule-evaluation sweeps.
	#[serde(default = "default_sync_interval")]
	pub sync_interval_secs: u64,
	/// Days resolved/expired flags are kept before cleanup.
	#[serde(default = "default_retention_days")]
	pub retention_days: u32,
	/// Open flags allowed per node before the oldest minor ones are shed.
	#[serde(default = "default_max_flags")]
	pub max_flags_per_node: i64,
	/// Escalations before a flag stops escalating further.
	#[serde(default = "default_escalation_threshold")]
	pub escalation_threshold: u32,
}

impl Default for FlagConfig {
	fn default() -> Self {
		Self {
			sync_interval_secs: default_sync_interval(),
			retention_days: default_retention_days(),
			max_flags_per_node: default_max_flags(),
			escalation_threshold: default_escalation_threshold(),
		}
	}
}

const fn default_sync_interval() -> u64 {
	60
}

const fn default_retention_days() -> u32 {
	30
}

const fn default_max_flags() -> i64 {
	100
}

const fn default_escalation_threshold() -> u32 {
	5
}

/// Unacknowledged time after which a flag escalates, by severity.
fn escalation_deadline(severity: FlagSeverity) -> Option<ChronoDuration> {
	match severity {
		FlagSeverity::Critical => Some(ChronoDuration::minutes(30)),
		FlagSeverity::High => Some(ChronoDuration::hours(2)),
		_ => None,
	}
}

fn should_escalate(flag: &NodeFlag, now: DateTime<Utc>, threshold: u32) -> bool {
	if flag.status != FlagStatus::Active || flag.escalation_count >= threshold {
		return false;
	}
	match escalation_deadline(flag.severity) {
		Some(deadline) => now.signed_duration_since(flag.created_at) > deadline,
		None => false,
	}
}

pub struct FlagEngine {
	store: Store,
	config: FlagConfig,
}

impl FlagEngine {
	pub fn new(store: Store, config: FlagConfig) -> Self {
		Self { store, config }
	}

	async fn ensure_indexes(&self) -> Result<()> {
		let flags = self.store.collection(collections::NODE_FLAGS);
		flags.create_index(&["node_id", "status"], false).await?;
		flags.create_index(&["status", "severity"], false).await?;
		self.store.collection(collections::FLAG_EVENTS).create_index(&["flag_id"], false).await?;
		self.store.collection(collections::FLAG_RULES).create_index(&["enabled"], false).await?;
		Ok(())
	}

	async fn seed_default_rules(&self) -> Result<()> {
		let rules = self.store.collection(collections::FLAG_RULES);
		if rules.count(&Filter::new()).await? > 0 {
			return Ok(());
		}
		let defaults = [
			FlagRule {
				rule_id: "default-low-uptime".into(),
				name: "Low uptime".into(),
				description: "Node uptime below the pool floor".into(),
				flag_type: FlagKind::Performance,
				severity: FlagSeverity::Medium,
				condition: RuleCondition { metric: MetricKind::Uptime, operator: ConditionOp::Lt, value: 95.0 },
				auto_resolve: true,
				auto_escalate: false,
				expiry_hours: Some(24),
				enabled: true,
				created_at: Utc::now(),
			},
			FlagRule {
				rule_id: "default-low-work".into(),
				name: "Low work credits".into(),
				description: "Node produced almost no credited work this window".into(),
				flag_type: FlagKind::Performance,
				severity: FlagSeverity::Low,
				condition: RuleCondition { metric: MetricKind::WorkCredits, operator: ConditionOp::Lt, value: 10.0 },
				auto_resolve: true,
				auto_escalate: false,
				expiry_hours: Some(48),
				enabled: true,
				created_at: Utc::now(),
			},
			FlagRule {
				rule_id: "default-slow-response".into(),
				name: "Slow responses".into(),
				description: "Node responses exceed the overlay latency bound".into(),
				flag_type: FlagKind::Network,
				severity: FlagSeverity::Medium,
				condition: RuleCondition { metric: MetricKind::ResponseTime, operator: ConditionOp::Gt, value: 5_000.0 },
				auto_resolve: true,
				auto_escalate: true,
				expiry_hours: Some(12),
				enabled: true,
				created_at: Utc::now(),
			},
		];
		for rule in &defaults {
			rules.upsert(&rule.rule_id, rule).await?;
		}
		log::info!("seeded {} default flag rules", defaults.len());
		Ok(())
	}

	async fn record_event(&self, flag: &NodeFlag, event_type: &str, actor: &str, details: Value) -> Result<()> {
		let event = FlagEvent {
			event_id: util::fresh_id(),
			flag_id: flag.flag_id.clone(),
			node_id: flag.node_id.clone(),
			event_type: event_type.to_string(),
			actor: actor.to_string(),
			details,
			created_at: Utc::now(),
		};
		self.store.collection(collections::FLAG_EVENTS).upsert(&event.event_id, &event).await?;
		Ok(())
	}

	async fn open_flags(&self, node_id: &str) -> Result<Vec<NodeFlag>> {
		let flags = self
			.store
			.collection(collections::NODE_FLAGS)
			.find(
				&Filter::new()
					.eq("node_id", node_id)
					.is_in("status", vec!["active", "acknowledged", "escalated"]),
				&[Sort::asc("created_at")],
				None,
			)
			.await?;
		Ok(flags)
	}

	async fn refresh_summary(&self, node_id: &str) -> Result<NodeFlagSummary> {
		let open = self.open_flags(node_id).await?;
		let summary = NodeFlagSummary::from_open_flags(node_id, open.iter());
		self.store.collection(collections::NODE_FLAG_SUMMARIES).upsert(node_id, &summary).await?;
		Ok(summary)
	}

	/// Shed the oldest info/low flags once a node exceeds the open-flag cap.
	async fn enforce_cap(&self, node_id: &str) -> Result<()> {
		let open = self.open_flags(node_id).await?;
		let over = open.len() as i64 - self.config.max_flags_per_node;
		if over <= 0 {
			return Ok(());
		}
		let minor: Vec<&NodeFlag> = open
			.iter()
			.filter(|f| matches!(f.severity, FlagSeverity::Info | FlagSeverity::Low))
			.take(over as usize)
			.collect();
		for flag in minor {
			let mut resolved = flag.clone();
			resolved.status = FlagStatus::Resolved;
			resolved.resolved_at = Some(Utc::now());
			resolved.resolved_by = Some("system".into());
			self.store.collection(collections::NODE_FLAGS).upsert(&resolved.flag_id, &resolved).await?;
			self.record_event(&resolved, "auto_resolved", "system", json!({ "reason": "flag cap" })).await?;
		}
		Ok(())
	}

	#[allow(clippy::too_many_arguments)]
	async fn create_flag(
		&self,
		node_id: NodeId,
		flag_type: FlagKind,
		severity: FlagSeverity,
		source: FlagSource,
		title: String,
		description: String,
		metadata: Value,
		expiry_hours: Option<i64>,
	) -> Result<NodeFlag> {
		if title.is_empty() {
			return Err(Error::validation("flag title must not be empty"));
		}
		let now = Utc::now();
		let flag = NodeFlag {
			flag_id: util::fresh_id(),
			node_id: node_id.clone(),
			flag_type,
			severity,
			status: FlagStatus::Active,
			source,
			title,
			description,
			metadata,
			created_at: now,
			expires_at: expiry_hours.map(|h| now + ChronoDuration::hours(h)),
			acknowledged_at: None,
			acknowledged_by: None,
			resolved_at: None,
			resolved_by: None,
			escalation_count: 0,
			related_flags: Vec::new(),
		};
		self.store.collection(collections::NODE_FLAGS).upsert(&flag.flag_id, &flag).await?;
		self.record_event(&flag, "created", "system", Value::Null).await?;
		self.enforce_cap(&node_id).await?;
		self.refresh_summary(&node_id).await?;
		log::info!("flagged {} ({:?}/{:?}): {}", flag.node_id, flag.flag_type, flag.severity, flag.title);
		Ok(flag)
	}

	/// One monitoring sweep: evaluate every enabled rule against every
	/// known peer's metrics; matching rules raise a flag unless one of the
	/// same kind is already open for that node.
	async fn evaluate_rules(&self) -> Result<()> {
		let rules: Vec<FlagRule> = self
			.store
			.collection(collections::FLAG_RULES)
			.find(&Filter::new().eq("enabled", true), &[], None)
			.await?;
		if rules.is_empty() {
			return Ok(());
		}
		let peers: Vec<Peer> =
			self.store.collection(collections::PEERS).find(&Filter::new(), &[], None).await?;
		for peer in peers {
			let metrics = self.node_metrics(&peer).await?;
			let open = self.open_flags(&peer.node_id).await?;
			for rule in &rules {
				let raised_by_rule = open.iter().find(|f| {
					f.metadata.get("rule_id").and_then(Value::as_str) == Some(rule.rule_id.as_str())
				});
				if rule.condition.evaluate(&metrics) {
					if open.iter().any(|f| f.flag_type == rule.flag_type) {
						continue;
					}
					self.create_flag(
						peer.node_id.clone(),
						rule.flag_type,
						rule.severity,
						FlagSource::Monitor,
						rule.name.clone(),
						rule.description.clone(),
						json!({ "rule_id": rule.rule_id }),
						rule.expiry_hours,
					)
					.await?;
				} else if rule.auto_resolve {
					// condition cleared; close what this rule raised
					if let Some(flag) = raised_by_rule {
						let mut resolved = flag.clone();
						resolved.status = FlagStatus::Resolved;
						resolved.resolved_at = Some(Utc::now());
						resolved.resolved_by = Some("system".into());
						self.store
							.collection(collections::NODE_FLAGS)
							.upsert(&resolved.flag_id, &resolved)
							.await?;
						self.record_event(&resolved, "auto_resolved", "system", json!({ "rule_id": rule.rule_id }))
							.await?;
						self.refresh_summary(&peer.node_id).await?;
					}
				}
			}
		}
		Ok(())
	}

	async fn node_metrics(&self, peer: &Peer) -> Result<NodeMetrics> {
		// freshest performance sample, if the shard manager keeps any
		let sample: Option<crate::models::shards::PerformanceSample> = self
			.store
			.collection(collections::PERFORMANCE_METRICS)
			.find(
				&Filter::new().eq("node_id", peer.node_id.as_str()),
				&[Sort::desc("recorded_at")],
				Some(1),
			)
			.await
			.unwrap_or_default()
			.pop();
		Ok(NodeMetrics {
			uptime_percentage: peer.uptime_percentage,
			work_credits: peer.work_credits,
			response_time_ms: sample.map(|s| s.metrics.response_time_ms).unwrap_or(0.0),
		})
	}

	async fn escalate_and_expire(&self) -> Result<()> {
		let now = Utc::now();
		let open: Vec<NodeFlag> = self
			.store
			.collection(collections::NODE_FLAGS)
			.find(&Filter::new().is_in("status", vec!["active", "acknowledged"]), &[], None)
			.await?;
		for mut flag in open {
			if let Some(expires_at) = flag.expires_at {
				if now >= expires_at {
					flag.status = FlagStatus::Expired;
					self.store.collection(collections::NODE_FLAGS).upsert(&flag.flag_id, &flag).await?;
					self.record_event(&flag, "expired", "system", Value::Null).await?;
					self.refresh_summary(&flag.node_id.clone()).await?;
					continue;
				}
			}
			if should_escalate(&flag, now, self.config.escalation_threshold) {
				flag.status = FlagStatus::Escalated;
				flag.escalation_count += 1;
				self.store.collection(collections::NODE_FLAGS).upsert(&flag.flag_id, &flag).await?;
				self.record_event(&flag, "escalated", "system", json!({ "count": flag.escalation_count }))
					.await?;
				self.refresh_summary(&flag.node_id.clone()).await?;
				log::warn!("escalated {:?} flag {} on {}", flag.severity, flag.flag_id, flag.node_id);
			}
		}
		Ok(())
	}

	async fn cleanup(&self) -> Result<()> {
		let cutoff = (Utc::now() - ChronoDuration::days(self.config.retention_days as i64)).timestamp_micros();
		let removed = self
			.store
			.collection(collections::NODE_FLAGS)
			.delete_many(
				&Filter::new().is_in("status", vec!["resolved", "expired"]).lt("created_at", cutoff),
			)
			.await?;
		let events = self
			.store
			.collection(collections::FLAG_EVENTS)
			.delete_many(&Filter::new().lt("created_at", cutoff))
			.await?;
		if removed + events > 0 {
			log::debug!("flag cleanup removed {} flags, {} events", removed, events);
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl Actor for FlagEngine {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create flag indexes: {}", e);
		}
		if let Err(e) = self.seed_default_rules().await {
			log::warn!("failed to seed flag rules: {}", e);
		}
		let addr = ctx.address().expect("Actor just started");
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.sync_interval_secs), || Monitor);
		spawn_ticker(addr.clone(), Duration::from_secs(60), || Escalate);
		spawn_ticker(addr, Duration::from_secs(3600), || Cleanup);
	}
}

struct Monitor;

impl Message for Monitor {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Monitor> for FlagEngine {
	async fn handle(&mut self, _: Monitor, _: &mut Context<Self>) {
		if let Err(e) = self.evaluate_rules().await {
			log::error!("flag monitoring sweep failed: {}", e);
		}
	}
}

struct Escalate;

impl Message for Escalate {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Escalate> for FlagEngine {
	async fn handle(&mut self, _: Escalate, _: &mut Context<Self>) {
		if let Err(e) = self.escalate_and_expire().await {
			log::error!("flag escalation sweep failed: {}", e);
		}
	}
}

struct Cleanup;

impl Message for Cleanup {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Cleanup> for FlagEngine {
	async fn handle(&mut self, _: Cleanup, _: &mut Context<Self>) {
		if let Err(e) = self.cleanup().await {
			log::error!("flag cleanup failed: {}", e);
		}
	}
}

pub struct CreateFlag {
	pub node_id: NodeId,
	pub flag_type: FlagKind,
	pub severity: FlagSeverity,
	pub source: FlagSource,
	pub title: String,
	pub description: String,
	pub metadata: Value,
	pub expiry_hours: Option<i64>,
}

impl Message for CreateFlag {
	type Result = Result<NodeFlag>;
}

#[async_trait::async_trait]
impl Handler<CreateFlag> for FlagEngine {
	async fn handle(&mut self, msg: CreateFlag, _: &mut Context<Self>) -> Result<NodeFlag> {
		self.create_flag(
			msg.node_id,
			msg.flag_type,
			msg.severity,
			msg.source,
			msg.title,
			msg.description,
			msg.metadata,
			msg.expiry_hours,
		)
		.await
	}
}

pub struct AcknowledgeFlag {
	pub flag_id: String,
	pub actor: NodeId,
}

impl Message for AcknowledgeFlag {
	type Result = Result<bool>;
}

#[async_trait::async_trait]
impl Handler<AcknowledgeFlag> for FlagEngine {
	async fn handle(&mut self, msg: AcknowledgeFlag, _: &mut Context<Self>) -> Result<bool> {
		let flags = self.store.collection(collections::NODE_FLAGS);
		let mut flag: NodeFlag = match flags.get(&msg.flag_id).await? {
			Some(flag) => flag,
			None => return Ok(false),
		};
		if flag.status != FlagStatus::Active && flag.status != FlagStatus::Escalated {
			return Err(Error::precondition(format!("flag {} is not open", msg.flag_id)));
		}
		flag.status = FlagStatus::Acknowledged;
		flag.acknowledged_at = Some(Utc::now());
		flag.acknowledged_by = Some(msg.actor.clone());
		flags.upsert(&flag.flag_id, &flag).await?;
		self.record_event(&flag, "acknowledged", &msg.actor, Value::Null).await?;
		self.refresh_summary(&flag.node_id.clone()).await?;
		Ok(true)
	}
}

pub struct ResolveFlag {
	pub flag_id: String,
	pub actor: NodeId,
	pub notes: String,
}

impl Message for ResolveFlag {
	type Result = Result<bool>;
}

#[async_trait::async_trait]
impl Handler<ResolveFlag> for FlagEngine {
	async fn handle(&mut self, msg: ResolveFlag, _: &mut Context<Self>) -> Result<bool> {
		let flags = self.store.collection(collections::NODE_FLAGS);
		let mut flag: NodeFlag = match flags.get(&msg.flag_id).await? {
			Some(flag) => flag,
			None => return Ok(false),
		};
		if flag.status.is_terminal() {
			return Err(Error::precondition(format!("flag {} already closed", msg.flag_id)));
		}
		flag.status = FlagStatus::Resolved;
		flag.resolved_at = Some(Utc::now());
		flag.resolved_by = Some(msg.actor.clone());
		flags.upsert(&flag.flag_id, &flag).await?;
		self.record_event(&flag, "resolved", &msg.actor, json!({ "notes": msg.notes })).await?;
		self.refresh_summary(&flag.node_id.clone()).await?;
		Ok(true)
	}
}

pub struct GetNodeFlags {
	pub node_id: NodeId,
	pub include_resolved: bool,
}

impl Message for GetNodeFlags {
	type Result = Result<Vec<NodeFlag>>;
}

#[async_trait::async_trait]
impl Handler<GetNodeFlags> for FlagEngine {
	async fn handle(&mut self, msg: GetNodeFlags, _: &mut Context<Self>) -> Result<Vec<NodeFlag>> {
		if msg.include_resolved {
			let all = self
				.store
				.collection(collections::NODE_FLAGS)
				.find(&Filter::new().eq("node_id", msg.node_id), &[Sort::desc("created_at")], None)
				.await?;
			Ok(all)
		} else {
			self.open_flags(&msg.node_id).await
		}
	}
}

pub struct GetFlagSummary(pub NodeId);

impl Message for GetFlagSummary {
	type Result = Result<NodeFlagSummary>;
}

#[async_trait::async_trait]
impl Handler<GetFlagSummary> for FlagEngine {
	async fn handle(&mut self, msg: GetFlagSummary, _: &mut Context<Self>) -> Result<NodeFlagSummary> {
		self.refresh_summary(&msg.0).await
	}
}

pub struct NetworkOverview;

impl Message for NetworkOverview {
	type Result = Result<Value>;
}

#[async_trait::async_trait]
impl Handler<NetworkOverview> for FlagEngine {
	async fn handle(&mut self, _: NetworkOverview, _: &mut Context<Self>) -> Result<Value> {
		let summaries: Vec<NodeFlagSummary> = self
			.store
			.collection(collections::NODE_FLAG_SUMMARIES)
			.find(&Filter::new(), &[], None)
			.await?;
		let total_open: u32 = summaries.iter().map(|s| s.total_active).sum();
		let critical: u32 = summaries.iter().map(|s| s.critical_count).sum();
		Ok(json!({
			"network_health": network_health(&summaries),
			"nodes_tracked": summaries.len(),
			"open_flags": total_open,
			"critical_flags": critical,
		}))
	}
}

pub struct CreateFlagRule(pub FlagRule);

impl Message for CreateFlagRule {
	type Result = Result<FlagRule>;
}

#[async_trait::async_trait]
impl Handler<CreateFlagRule> for FlagEngine {
	async fn handle(&mut self, msg: CreateFlagRule, _: &mut Context<Self>) -> Result<FlagRule> {
		let rule = msg.0;
		if rule.rule_id.is_empty() {
			return Err(Error::validation("flag rule requires an id"));
		}
		self.store.collection(collections::FLAG_RULES).upsert(&rule.rule_id, &rule).await?;
		Ok(rule)
	}
}

#[async_trait::async_trait]
impl Handler<Die> for FlagEngine {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn flag(severity: FlagSeverity, age_minutes: i64, status: FlagStatus) -> NodeFlag {
		NodeFlag {
			flag_id: "f".into(),
			node_id: "n".into(),
			flag_type: FlagKind::Operational,
			severity,
			status,
			source: FlagSource::System,
			title: "t".into(),
			description: String::new(),
			metadata: Value::Null,
			created_at: Utc::now() - ChronoDuration::minutes(age_minutes),
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
	fn critical_escalates_after_thirty_minutes() {
		let now = Utc::now();
		assert!(should_escalate(&flag(FlagSeverity::Critical, 31, FlagStatus::Active), now, 5));
		assert!(!should_escalate(&flag(FlagSeverity::Critical, 29, FlagStatus::Active), now, 5));
	}

	#[test]
	fn high_escalates_after_two_hours() {
		let now = Utc::now();
		assert!(should_escalate(&flag(FlagSeverity::High, 121, FlagStatus::Active), now, 5));
		assert!(!should_escalate(&flag(FlagSeverity::High, 119, FlagStatus::Active), now, 5));
	}

	#[test]
	fn acknowledged_and_minor_flags_never_escalate() {
		let now = Utc::now();
		assert!(!should_escalate(&flag(FlagSeverity::Critical, 90, FlagStatus::Acknowledged), now, 5));
		assert!(!should_escalate(&flag(FlagSeverity::Medium, 600, FlagStatus::Active), now, 5));
	}

	#[test]
	fn escalation_count_is_capped() {
		let now = Utc::now();
		let mut f = flag(FlagSeverity::Critical, 90, FlagStatus::Active);
		f.escalation_count = 5;
		assert!(!should_escalate(&f, now, 5));
	}
}
