//! Ledger collaborators backed by a live `subxt` connection.
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};
use subxt::backend::legacy::rpc_methods::SystemProperties;
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::rpc::reconnecting_rpc_client::{PingConfig, RpcClient as ReconnectingRpcClient};
use subxt::backend::rpc::RpcClient;
use subxt::config::polkadot::PolkadotExtrinsicParamsBuilder as Params;
use subxt::dynamic::Value;
use subxt::ext::scale_value::At;
use subxt::tx::{PartialExtrinsic, SubmittableExtrinsic, TxStatus};
use subxt::utils::{AccountId32, MultiAddress, MultiSignature, H256};
use subxt::{OnlineClient, PolkadotConfig};

use crate::call_encoder::{CallEncoder, CallIndices, EncodedCall, PalletNames};
use crate::chain::{ChainStateOracle, EventSource, StatusStream, SubmissionChannel};
use crate::error::{Error, Result};
use crate::nonce::Nonce;
use crate::tx_events::{EmittedEvent, Phase};
use crate::tx_status::TransactionStatus;
use crate::tx_submitter::extrinsic_hash;

/// Already encoded call data handed to `subxt` as is.
struct RawCall<'a>(&'a [u8]);

impl subxt::tx::Payload for RawCall<'_> {
    fn encode_call_data_to(
        &self,
        _metadata: &subxt::Metadata,
        out: &mut Vec<u8>,
    ) -> Result<(), subxt::ext::subxt_core::Error> {
        out.extend_from_slice(self.0);
        Ok(())
    }
}

/// A connection to a substrate node.
#[derive(Clone)]
pub struct SubxtClient {
    client: OnlineClient<PolkadotConfig>,
    rpc: LegacyRpcMethods<PolkadotConfig>,
}

impl SubxtClient {
    /// Wraps an existing client and the rpc connection it was built from.
    pub fn new(client: OnlineClient<PolkadotConfig>, rpc: RpcClient) -> Self {
        Self {
            client,
            rpc: LegacyRpcMethods::new(rpc),
        }
    }

    /// Connects to `url` over a reconnecting websocket client.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("🔵 Connecting to {url}");
        let reconnecting = ReconnectingRpcClient::builder()
            .request_timeout(Duration::from_secs(60))
            .connection_timeout(Duration::from_secs(10))
            .enable_ws_ping(PingConfig::new())
            .build(url.to_string())
            .await
            .map_err(|e| Error::Connection {
                url: url.to_string(),
                source: subxt::Error::Other(e.to_string()),
            })?;

        let rpc_client = RpcClient::new(reconnecting);
        let client = OnlineClient::<PolkadotConfig>::from_rpc_client(rpc_client.clone())
            .await
            .map_err(|source| Error::Connection {
                url: url.to_string(),
                source,
            })?;
        info!("🟢 Connected to {url}");

        Ok(Self::new(client, rpc_client))
    }

    /// The underlying `subxt` client.
    pub fn client(&self) -> &OnlineClient<PolkadotConfig> {
        &self.client
    }

    /// An encoder using the call indices of the connected runtime.
    pub fn call_encoder(&self, names: PalletNames) -> CallEncoder {
        let indices = CallIndices::from_metadata(&self.client.metadata(), &names);
        CallEncoder::new(names, indices)
    }

    fn partial(
        &self,
        call: &EncodedCall,
        nonce: Nonce,
    ) -> Result<PartialExtrinsic<PolkadotConfig, OnlineClient<PolkadotConfig>>, subxt::Error> {
        let params = Params::new().nonce(nonce.value()).build();
        self.client
            .tx()
            .create_partial_signed_offline(&RawCall(call.call_data()), params)
    }
}

#[async_trait]
impl ChainStateOracle for SubxtClient {
    async fn account_nonce(&self, account: &AccountId32) -> Result<u64, subxt::Error> {
        self.client.tx().account_nonce(account).await
    }

    async fn free_balance(&self, account: &AccountId32) -> Result<u128, subxt::Error> {
        let query = subxt::dynamic::storage(
            "System",
            "Account",
            vec![Value::from_bytes(account.0)],
        );
        let info = self
            .client
            .storage()
            .at_latest()
            .await?
            .fetch(&query)
            .await?;

        let Some(info) = info else {
            return Ok(0);
        };
        let info = info.to_value()?;
        info.at("data")
            .at("free")
            .and_then(|free| free.as_u128())
            .ok_or_else(|| subxt::Error::Other(format!("No free balance in account info of {account}")))
    }

    async fn token_decimals(&self) -> Result<Option<u32>, subxt::Error> {
        let properties = self.rpc.system_properties().await?;
        Ok(decimals_from_properties(&properties))
    }
}

/// `tokenDecimals` from the node's system properties, the first entry on multi-token chains.
fn decimals_from_properties(properties: &SystemProperties) -> Option<u32> {
    let decimals = match properties.get("tokenDecimals")? {
        serde_json::Value::Array(values) => values.first()?,
        value => value,
    };
    decimals.as_u64().and_then(|decimals| u32::try_from(decimals).ok())
}

#[async_trait]
impl SubmissionChannel for SubxtClient {
    fn signer_payload(&self, call: &EncodedCall, nonce: Nonce) -> Result<Vec<u8>, subxt::Error> {
        Ok(self.partial(call, nonce)?.signer_payload())
    }

    fn assemble(
        &self,
        call: &EncodedCall,
        nonce: Nonce,
        origin: &AccountId32,
        signature: &MultiSignature,
    ) -> Result<Vec<u8>, subxt::Error> {
        let signed = self
            .partial(call, nonce)?
            .sign_with_address_and_signature(&MultiAddress::Id(origin.clone()), signature);
        Ok(signed.encoded().to_vec())
    }

    async fn submit_and_watch(&self, extrinsic: Vec<u8>) -> Result<StatusStream, subxt::Error> {
        let progress = SubmittableExtrinsic::from_bytes(self.client.clone(), extrinsic)
            .submit_and_watch()
            .await?;

        Ok(progress
            .map(|status| match status? {
                TxStatus::Validated => Ok(TransactionStatus::Ready),
                TxStatus::Broadcasted { num_peers } => {
                    info!("📡 Transaction broadcasted to {} peers.", num_peers);
                    Ok(TransactionStatus::Broadcast)
                }
                TxStatus::InBestBlock(details) => {
                    Ok(TransactionStatus::InBlock(details.block_hash()))
                }
                TxStatus::InFinalizedBlock(details) => {
                    Ok(TransactionStatus::Finalized(details.block_hash()))
                }
                TxStatus::NoLongerInBestBlock => Ok(TransactionStatus::Retracted),
                TxStatus::Invalid { message } => {
                    warn!("⚠️ Transaction invalid: {message}");
                    Ok(TransactionStatus::Invalid(message))
                }
                TxStatus::Dropped { message } => {
                    warn!("⚠️ Transaction dropped: {message}");
                    Ok(TransactionStatus::Dropped)
                }
                TxStatus::Error { message } => Err(subxt::Error::Other(message)),
            })
            .boxed())
    }
}

#[async_trait]
impl EventSource for SubxtClient {
    async fn extrinsic_index(
        &self,
        block_hash: H256,
        tx_hash: H256,
    ) -> Result<Option<u32>, subxt::Error> {
        let extrinsics = self.client.blocks().at(block_hash).await?.extrinsics().await?;

        Ok(extrinsics
            .iter()
            .find(|extrinsic| extrinsic_hash(extrinsic.bytes()) == tx_hash)
            .map(|extrinsic| extrinsic.index()))
    }

    async fn events_at(&self, block_hash: H256) -> Result<Vec<EmittedEvent>, subxt::Error> {
        let events = self.client.events().at(block_hash).await?;

        events
            .iter()
            .map(|event| {
                let event = event?;
                let phase = match event.phase() {
                    subxt::events::Phase::ApplyExtrinsic(index) => Phase::ApplyExtrinsic(index),
                    subxt::events::Phase::Finalization => Phase::Finalization,
                    subxt::events::Phase::Initialization => Phase::Initialization,
                };
                let args = event
                    .field_values()?
                    .values()
                    .map(ToString::to_string)
                    .collect();

                Ok(EmittedEvent {
                    phase,
                    pallet: event.pallet_name().to_string(),
                    method: event.variant_name().to_string(),
                    args,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn properties(value: serde_json::Value) -> SystemProperties {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("properties must be an object"),
        }
    }

    #[test]
    fn token_decimals_are_read_from_system_properties() {
        let single = properties(json!({ "tokenDecimals": 12, "tokenSymbol": "UNIT" }));
        assert_eq!(decimals_from_properties(&single), Some(12));
        assert_eq!(
            decimals_from_properties(&properties(json!({ "tokenDecimals": [10, 18] }))),
            Some(10)
        );
        assert_eq!(decimals_from_properties(&properties(json!({ "ss58Format": 42 }))), None);
        assert_eq!(decimals_from_properties(&properties(json!({ "tokenDecimals": [] }))), None);
    }
}
