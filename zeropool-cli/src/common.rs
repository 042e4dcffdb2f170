use std::sync::Arc;

use anyhow::{anyhow, Error};
use log::{info, warn};
use tx_pipeline::signer::load_substrate_key;
use tx_pipeline::{Outcome, PalletNames, Pipeline, PipelineConfig, Sr25519Signer, SubxtClient};
use url::Url;

/// Connect to the node and build a pipeline using its runtime's call indices
pub(crate) async fn create_pipeline(
    rpc_url: &Url,
    names: PalletNames,
    config: PipelineConfig,
) -> Result<Pipeline<SubxtClient>, Error> {
    let client = SubxtClient::connect(rpc_url.as_str()).await?;
    let encoder = client.call_encoder(names);
    info!("Substrate client connected");

    Ok(Pipeline::new(Arc::new(client), encoder, config))
}

/// Load the signing key from a secret uri or a key file
pub(crate) async fn load_signer(
    suri: Option<&str>,
    key_file: Option<&str>,
) -> Result<Sr25519Signer, Error> {
    match (suri, key_file) {
        (Some(suri), _) => Ok(Sr25519Signer::from_uri(suri)?),
        (None, Some(path)) => Ok(load_substrate_key(path).await?),
        (None, None) => Err(anyhow!("either --suri or --key-file is required")),
    }
}

/// Print the outcome the way polkadot.js prints status callbacks
pub(crate) fn print_outcome(outcome: &Outcome) {
    println!("Transaction status: {}", outcome.status.kind());
    println!("Included at block hash {:?}", outcome.block_hash);
    println!("Nonce {} / tx hash {:?}", outcome.nonce, outcome.tx_hash);
    println!("Events:");
    for event in &outcome.events {
        println!("\t {event}");
    }
}

/// Decimals assumed when the chain does not advertise `tokenDecimals`
const DEFAULT_DECIMALS: u32 = 12;

/// Token decimals advertised by the connected chain
pub(crate) async fn chain_decimals(pipeline: &Pipeline<SubxtClient>) -> Result<u32, Error> {
    match pipeline.token_decimals().await? {
        Some(decimals) => Ok(decimals),
        None => {
            warn!("Chain does not advertise tokenDecimals, assuming {DEFAULT_DECIMALS}");
            Ok(DEFAULT_DECIMALS)
        }
    }
}

/// Render an amount of the smallest unit with four decimal places
pub(crate) fn format_balance(amount: u128, decimals: u32) -> String {
    let whole = 10u128
        .checked_pow(decimals)
        .map_or(0, |unit| amount / unit);

    let fraction = if decimals >= 4 {
        10u128
            .checked_pow(decimals - 4)
            .map_or(0, |scale| (amount / scale) % 10_000)
    } else {
        (amount % 10u128.pow(decimals)) * 10u128.pow(4 - decimals)
    };
    format!("{whole}.{fraction:04}")
}
