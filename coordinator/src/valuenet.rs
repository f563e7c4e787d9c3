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

//! Adapter to the external value-transfer network. The four calls below are
//! everything the core is allowed to know about the chain.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct AccountBalance {
	pub trx: f64,
	pub usdt: f64,
	pub active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
	Pending,
	Confirmed,
	Failed,
	Expired,
}

#[async_trait::async_trait]
pub trait ValueNetwork: Send + Sync + 'static {
	/// Submit a USDT transfer; resolves to the external transaction hash.
	async fn send_usdt(&self, to: &str, amount: f64) -> Result<String>;

	async fn account_balance(&self, address: &str) -> Result<AccountBalance>;

	async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus>;

	async fn estimate_fee(&self, to: &str, amount: f64) -> Result<f64>;
}

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct SendResponse {
	#[serde(rename = "txid")]
	tx_hash: String,
}

#[derive(Deserialize)]
struct BalanceResponse {
	#[serde(default)]
	trx: f64,
	#[serde(default)]
	usdt: f64,
	#[serde(default)]
	active: bool,
}

#[derive(Deserialize)]
struct StatusResponse {
	status: TxStatus,
}

#[derive(Deserialize)]
struct FeeResponse {
	fee: f64,
}

/// HTTP gateway to a TronGrid-style wallet service.
pub struct TronGateway {
	client: reqwest::Client,
	base_url: String,
	api_key: Option<String>,
}

impl TronGateway {
	pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
		let client = reqwest::Client::builder().timeout(GATEWAY_TIMEOUT).build()?;
		Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_key })
	}

	fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
		let mut builder = self.client.request(method, format!("{}{}", self.base_url, path));
		if let Some(key) = &self.api_key {
			builder = builder.header("TRON-PRO-API-KEY", key);
		}
		builder
	}
}

#[async_trait::async_trait]
impl ValueNetwork for TronGateway {
	async fn send_usdt(&self, to: &str, amount: f64) -> Result<String> {
		let resp: SendResponse = self
			.request(reqwest::Method::POST, "/wallet/transfer-usdt")
			.json(&serde_json::json!({ "to": to, "amount": amount }))
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		if resp.tx_hash.is_empty() {
			return Err(Error::ValueNetwork("gateway returned an empty transaction hash".into()));
		}
		Ok(resp.tx_hash)
	}

	async fn account_balance(&self, address: &str) -> Result<AccountBalance> {
		let resp: BalanceResponse = self
			.request(reqwest::Method::GET, &format!("/wallet/account/{}", address))
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		Ok(AccountBalance { trx: resp.trx, usdt: resp.usdt, active: resp.active })
	}

	async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus> {
		let resp: StatusResponse = self
			.request(reqwest::Method::GET, &format!("/wallet/transaction/{}", tx_hash))
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		Ok(resp.status)
	}

	async fn estimate_fee(&self, to: &str, amount: f64) -> Result<f64> {
		let resp: FeeResponse = self
			.request(reqwest::Method::POST, "/wallet/estimate-fee")
			.json(&serde_json::json!({ "to": to, "amount": amount }))
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		Ok(resp.fee)
	}
}
