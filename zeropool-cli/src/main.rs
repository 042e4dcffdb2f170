//! This utility submits zeropool pallet calls to a substrate chain and waits for their outcome.

mod common;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use serde_json::{json, Value};
use tx_pipeline::call_encoder::parse_account;
use tx_pipeline::{Operation, PalletNames, PipelineConfig, Signer};

/// CLI entrypoint
#[derive(Parser)]
#[command(
    name = "zeropool-cli",
    version,
    about = "CLI for submitting zeropool transactions"
)]
struct Cli {
    /// Node RPC endpoint
    #[arg(long, env = "RPC_URL", default_value = "ws://127.0.0.1:9944")]
    rpc_url: url::Url,

    /// Secret uri of the signing account, e.g. //Alice or a mnemonic
    #[arg(long, env = "PRIVATE_KEY", conflicts_with = "key_file")]
    suri: Option<String>,

    /// Path to a file holding a hex encoded sr25519 secret key
    #[arg(long, env = "KEY_FILE")]
    key_file: Option<String>,

    /// Name of the shielded pool pallet in the runtime
    #[arg(long, env = "POOL_PALLET", default_value = "Zeropool")]
    pool_pallet: String,

    #[command(flatten)]
    pipeline: PipelineConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lock funds into the pool
    Lock {
        /// Amount in the chain's smallest unit
        #[arg(short, long, default_value = "100000")]
        amount: String,
    },

    /// Release funds from the pool
    Release {
        /// Amount in the chain's smallest unit
        #[arg(short, long)]
        amount: String,
    },

    /// Set the operator and both verification keys in one batch
    InitPool {
        /// Transfer verification key file
        #[arg(long)]
        transfer_vk: PathBuf,

        /// Tree update verification key file
        #[arg(long)]
        tree_vk: PathBuf,

        /// Operator account, defaults to the signer
        #[arg(long)]
        operator: Option<String>,
    },

    /// Set an account's free balance through sudo
    Fund {
        /// Account to fund
        #[arg(short = 'd', long)]
        address: String,

        /// New free balance in the chain's smallest unit
        #[arg(short, long, default_value = "1000000000000000000000")]
        amount: String,
    },

    /// Submit a serialized pool transaction
    Transact {
        /// Hex encoded transaction
        #[arg(short, long)]
        data: String,
    },

    /// Submit any supported operation
    Submit {
        /// Operation tag, e.g. lock or batch
        #[arg(short, long)]
        op: String,

        /// Operation arguments as json
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Print an account's free balance
    Balance {
        /// Account to query, defaults to the signer
        #[arg(short = 'd', long)]
        address: Option<String>,

        /// Decimals of the chain's token, read from the node when omitted
        #[arg(long)]
        decimals: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger with fallback to info if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let names = PalletNames {
        pool: cli.pool_pallet.clone(),
        ..PalletNames::default()
    };
    let pipeline = common::create_pipeline(&cli.rpc_url, names, cli.pipeline.clone()).await?;

    if let Commands::Balance { address, decimals } = &cli.command {
        let account = match address {
            Some(address) => parse_account(address)?,
            None => common::load_signer(cli.suri.as_deref(), cli.key_file.as_deref())
                .await?
                .account_id(),
        };
        let decimals = match decimals {
            Some(decimals) => *decimals,
            None => common::chain_decimals(&pipeline).await?,
        };
        let free = pipeline.balance(&account).await?;
        println!("{account}: {}", common::format_balance(free, decimals));
        return Ok(());
    }

    let signer = common::load_signer(cli.suri.as_deref(), cli.key_file.as_deref()).await?;
    info!("🔑 Signing as {}", signer.account_id());
    let options = cli.pipeline.wait_options();

    let outcome = match cli.command {
        Commands::Lock { amount } => {
            pipeline
                .submit_and_await("lock", &json!({ "amount": amount }), &signer, options)
                .await?
        }
        Commands::Release { amount } => {
            pipeline
                .submit_and_await("release", &json!({ "amount": amount }), &signer, options)
                .await?
        }
        Commands::InitPool {
            transfer_vk,
            tree_vk,
            operator,
        } => {
            let operator = match operator {
                Some(operator) => parse_account(&operator)?,
                None => signer.account_id(),
            };
            let transfer_vk = tokio::fs::read(&transfer_vk)
                .await
                .with_context(|| format!("reading {}", transfer_vk.display()))?;
            let tree_vk = tokio::fs::read(&tree_vk)
                .await
                .with_context(|| format!("reading {}", tree_vk.display()))?;

            info!("🛠️ Initializing pallet state...");
            let batch = Operation::Batch(vec![
                Operation::SetOperator { address: operator },
                Operation::SetTransferVk { data: transfer_vk },
                Operation::SetTreeVk { data: tree_vk },
            ]);
            pipeline
                .submit_operation_and_await(&batch, &signer, options)
                .await?
        }
        Commands::Fund { address, amount } => {
            info!("💰 Initializing account {address} with funds");
            let args = json!({
                "call": {
                    "op": "setBalance",
                    "args": { "who": address, "free": amount, "reserved": "0" }
                }
            });
            pipeline
                .submit_and_await("sudo", &args, &signer, options)
                .await?
        }
        Commands::Transact { data } => {
            pipeline
                .submit_and_await("transact", &json!({ "data": data }), &signer, options)
                .await?
        }
        Commands::Submit { op, args } => {
            let args: Value = serde_json::from_str(&args).context("parsing --args")?;
            pipeline
                .submit_and_await(&op, &args, &signer, options)
                .await?
        }
        Commands::Balance { .. } => return Ok(()),
    };

    common::print_outcome(&outcome);
    outcome.ensure_success()?;
    Ok(())
}
