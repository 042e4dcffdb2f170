//! Turns tagged operations into SCALE encoded call data.
//!
//! Call data is `[pallet_index, call_index] ++ SCALE(args)`. Indices come from a
//! [`CallIndices`] table so encoding stays pure: the same operation and arguments always
//! produce the same bytes.
use std::collections::HashMap;
use std::str::FromStr;

use codec::{Compact, Encode};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use subxt::utils::{AccountId32, MultiAddress};

/// Errors raised while turning an operation into call data. None of them are retryable.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EncodeError {
    /// The operation tag is not one the encoder knows.
    #[snafu(display("Unknown operation '{tag}'"))]
    UnknownOperation {
        /// The rejected tag.
        tag: String,
    },

    /// The arguments do not match the operation's shape.
    #[snafu(display("Invalid arguments for '{tag}': {source}"))]
    InvalidArgs {
        /// Operation tag.
        tag: String,
        /// The underlying deserialization error.
        source: serde_json::Error,
    },

    /// A byte argument is not valid hex.
    #[snafu(display("Field '{field}' is not valid hex: {source}"))]
    InvalidHex {
        /// Argument name.
        field: String,
        /// The underlying hex parsing error.
        source: hex::FromHexError,
    },

    /// An account argument is neither SS58 nor 32 bytes of hex.
    #[snafu(display("'{value}' is not a valid account id"))]
    InvalidAccount {
        /// The rejected value.
        value: String,
    },

    /// A batch needs at least one call.
    #[snafu(display("Batch must contain at least one call"))]
    EmptyBatch,

    /// The runtime does not expose the call.
    #[snafu(display("Call {pallet}.{call} is not known to the runtime"))]
    UnknownCall {
        /// Pallet name.
        pallet: String,
        /// Call name.
        call: String,
    },
}

/// Names of the pallets calls are routed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PalletNames {
    /// The shielded pool pallet.
    pub pool: String,
    /// The pallet exposing `batch`.
    pub utility: String,
    /// The pallet exposing `sudo`.
    pub sudo: String,
    /// The pallet exposing `set_balance`.
    pub balances: String,
}

impl Default for PalletNames {
    fn default() -> Self {
        Self {
            pool: "Zeropool".to_string(),
            utility: "Utility".to_string(),
            sudo: "Sudo".to_string(),
            balances: "Balances".to_string(),
        }
    }
}

impl PalletNames {
    /// Every (pallet, call) pair an [`Operation`] can encode to.
    pub fn known_calls(&self) -> Vec<(&str, &'static str)> {
        let pool = self.pool.as_str();
        vec![
            (pool, "lock"),
            (pool, "release"),
            (pool, "set_owner"),
            (pool, "set_operator"),
            (pool, "set_transfer_vk"),
            (pool, "set_tree_vk"),
            (pool, "transact"),
            (self.balances.as_str(), "set_balance"),
            (self.sudo.as_str(), "sudo"),
            (self.utility.as_str(), "batch"),
        ]
    }
}

/// Lookup table from (pallet, call) names to their runtime indices.
#[derive(Clone, Debug, Default)]
pub struct CallIndices {
    indices: HashMap<(String, String), (u8, u8)>,
}

impl CallIndices {
    /// Adds an entry.
    pub fn with_call(mut self, pallet: &str, call: &str, pallet_index: u8, call_index: u8) -> Self {
        self.indices
            .insert((pallet.to_string(), call.to_string()), (pallet_index, call_index));
        self
    }

    /// Reads the indices of every known call from runtime metadata.
    ///
    /// Calls the runtime does not expose are left out and fail at encode time.
    pub fn from_metadata(metadata: &subxt::Metadata, names: &PalletNames) -> Self {
        names
            .known_calls()
            .into_iter()
            .fold(Self::default(), |indices, (pallet, call)| {
                let Some(pallet_metadata) = metadata.pallet_by_name(pallet) else {
                    return indices;
                };
                match pallet_metadata.call_variant_by_name(call) {
                    Some(variant) => {
                        indices.with_call(pallet, call, pallet_metadata.index(), variant.index)
                    }
                    None => indices,
                }
            })
    }

    fn lookup(&self, pallet: &str, call: &str) -> Result<(u8, u8), EncodeError> {
        self.indices
            .get(&(pallet.to_string(), call.to_string()))
            .copied()
            .ok_or_else(|| EncodeError::UnknownCall {
                pallet: pallet.to_string(),
                call: call.to_string(),
            })
    }
}

/// A logical ledger operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Lock `amount` into the pool.
    Lock {
        /// Amount in the chain's smallest unit.
        amount: u128,
    },
    /// Release `amount` from the pool.
    Release {
        /// Amount in the chain's smallest unit.
        amount: u128,
    },
    /// Change the pool owner.
    SetOwner {
        /// New owner.
        address: AccountId32,
    },
    /// Change the pool operator (relayer).
    SetOperator {
        /// New operator.
        address: AccountId32,
    },
    /// Install the transfer verification key.
    SetTransferVk {
        /// Serialized key.
        data: Vec<u8>,
    },
    /// Install the tree update verification key.
    SetTreeVk {
        /// Serialized key.
        data: Vec<u8>,
    },
    /// Submit a pool transaction.
    Transact {
        /// Serialized pool transaction.
        data: Vec<u8>,
    },
    /// Set an account's balances. Usually wrapped in [`Operation::Sudo`].
    SetBalance {
        /// Account to fund.
        who: AccountId32,
        /// New free balance.
        free: u128,
        /// New reserved balance.
        reserved: u128,
    },
    /// Dispatch the inner call with root origin.
    Sudo(Box<Operation>),
    /// Dispatch the calls in order, atomicity is up to the ledger.
    Batch(Vec<Operation>),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AmountArgs {
    #[serde(deserialize_with = "deserialize_amount")]
    amount: u128,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AddressArgs {
    address: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DataArgs {
    data: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetBalanceArgs {
    who: String,
    #[serde(deserialize_with = "deserialize_amount")]
    free: u128,
    #[serde(default, deserialize_with = "deserialize_amount")]
    reserved: u128,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NestedCall {
    op: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SudoArgs {
    call: NestedCall,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchArgs {
    calls: Vec<NestedCall>,
}

/// Amounts may exceed `u64`, so decimal strings are accepted next to plain numbers.
fn deserialize_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(u64),
        Text(String),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(value) => Ok(value.into()),
        Amount::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("'{text}' is not a valid amount"))),
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(tag: &str, args: &Value) -> Result<T, EncodeError> {
    serde_json::from_value(args.clone()).context(InvalidArgsSnafu { tag })
}

fn parse_hex(field: &str, value: &str) -> Result<Vec<u8>, EncodeError> {
    hex::decode(value.trim().trim_start_matches("0x")).context(InvalidHexSnafu { field })
}

/// Parses an SS58 address, or a `0x` prefixed 32 byte public key.
pub fn parse_account(value: &str) -> Result<AccountId32, EncodeError> {
    let value = value.trim();
    if let Some(hex_key) = value.strip_prefix("0x") {
        let bytes: [u8; 32] = hex::decode(hex_key)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| EncodeError::InvalidAccount {
                value: value.to_string(),
            })?;
        return Ok(AccountId32(bytes));
    }
    AccountId32::from_str(value).map_err(|_| EncodeError::InvalidAccount {
        value: value.to_string(),
    })
}

impl Operation {
    /// Builds an operation from its tag and structured arguments.
    pub fn from_tag(tag: &str, args: &Value) -> Result<Self, EncodeError> {
        let operation = match tag {
            "lock" => Operation::Lock {
                amount: parse_args::<AmountArgs>(tag, args)?.amount,
            },
            "release" => Operation::Release {
                amount: parse_args::<AmountArgs>(tag, args)?.amount,
            },
            "setOwner" => Operation::SetOwner {
                address: parse_account(&parse_args::<AddressArgs>(tag, args)?.address)?,
            },
            "setOperator" => Operation::SetOperator {
                address: parse_account(&parse_args::<AddressArgs>(tag, args)?.address)?,
            },
            "setTransferVk" => Operation::SetTransferVk {
                data: parse_hex("data", &parse_args::<DataArgs>(tag, args)?.data)?,
            },
            "setTreeVk" => Operation::SetTreeVk {
                data: parse_hex("data", &parse_args::<DataArgs>(tag, args)?.data)?,
            },
            "transact" => Operation::Transact {
                data: parse_hex("data", &parse_args::<DataArgs>(tag, args)?.data)?,
            },
            "setBalance" => {
                let SetBalanceArgs {
                    who,
                    free,
                    reserved,
                } = parse_args(tag, args)?;
                Operation::SetBalance {
                    who: parse_account(&who)?,
                    free,
                    reserved,
                }
            }
            "sudo" => {
                let SudoArgs { call } = parse_args(tag, args)?;
                Operation::Sudo(Box::new(Operation::from_tag(&call.op, &call.args)?))
            }
            "batch" => {
                let BatchArgs { calls } = parse_args(tag, args)?;
                if calls.is_empty() {
                    return Err(EncodeError::EmptyBatch);
                }
                Operation::Batch(
                    calls
                        .iter()
                        .map(|call| Operation::from_tag(&call.op, &call.args))
                        .collect::<Result<_, _>>()?,
                )
            }
            _ => {
                return Err(EncodeError::UnknownOperation {
                    tag: tag.to_string(),
                })
            }
        };
        Ok(operation)
    }

    /// The human readable tag, as accepted by [`Operation::from_tag`].
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::Lock { .. } => "lock",
            Operation::Release { .. } => "release",
            Operation::SetOwner { .. } => "setOwner",
            Operation::SetOperator { .. } => "setOperator",
            Operation::SetTransferVk { .. } => "setTransferVk",
            Operation::SetTreeVk { .. } => "setTreeVk",
            Operation::Transact { .. } => "transact",
            Operation::SetBalance { .. } => "setBalance",
            Operation::Sudo(_) => "sudo",
            Operation::Batch(_) => "batch",
        }
    }

    fn pallet_call<'a>(&self, names: &'a PalletNames) -> (&'a str, &'static str) {
        let pool = names.pool.as_str();
        match self {
            Operation::Lock { .. } => (pool, "lock"),
            Operation::Release { .. } => (pool, "release"),
            Operation::SetOwner { .. } => (pool, "set_owner"),
            Operation::SetOperator { .. } => (pool, "set_operator"),
            Operation::SetTransferVk { .. } => (pool, "set_transfer_vk"),
            Operation::SetTreeVk { .. } => (pool, "set_tree_vk"),
            Operation::Transact { .. } => (pool, "transact"),
            Operation::SetBalance { .. } => (names.balances.as_str(), "set_balance"),
            Operation::Sudo(_) => (names.sudo.as_str(), "sudo"),
            Operation::Batch(_) => (names.utility.as_str(), "batch"),
        }
    }
}

/// Call data ready to be signed. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedCall {
    tag: String,
    call_data: Vec<u8>,
    components: Vec<String>,
}

impl EncodedCall {
    /// Operation tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// SCALE encoded call data.
    pub fn call_data(&self) -> &[u8] {
        &self.call_data
    }

    /// Tags of the calls inside a batch, empty for single calls.
    pub fn components(&self) -> &[String] {
        &self.components
    }
}

/// Encodes operations against a known runtime layout.
#[derive(Clone, Debug)]
pub struct CallEncoder {
    names: PalletNames,
    indices: CallIndices,
}

impl CallEncoder {
    /// Creates an encoder for the given pallet names and index table.
    pub fn new(names: PalletNames, indices: CallIndices) -> Self {
        Self { names, indices }
    }

    /// Parses and encodes a tagged operation.
    pub fn encode(&self, tag: &str, args: &Value) -> Result<EncodedCall, EncodeError> {
        self.encode_operation(&Operation::from_tag(tag, args)?)
    }

    /// Encodes an already built operation.
    pub fn encode_operation(&self, operation: &Operation) -> Result<EncodedCall, EncodeError> {
        let mut call_data = Vec::new();
        self.encode_into(operation, &mut call_data)?;

        let components = match operation {
            Operation::Batch(calls) => calls.iter().map(|call| call.tag().to_string()).collect(),
            _ => Vec::new(),
        };

        Ok(EncodedCall {
            tag: operation.tag().to_string(),
            call_data,
            components,
        })
    }

    fn encode_into(&self, operation: &Operation, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let (pallet, call) = operation.pallet_call(&self.names);
        let (pallet_index, call_index) = self.indices.lookup(pallet, call)?;
        out.push(pallet_index);
        out.push(call_index);

        match operation {
            Operation::Lock { amount } | Operation::Release { amount } => amount.encode_to(out),
            Operation::SetOwner { address } | Operation::SetOperator { address } => {
                address.encode_to(out)
            }
            Operation::SetTransferVk { data }
            | Operation::SetTreeVk { data }
            | Operation::Transact { data } => data.encode_to(out),
            Operation::SetBalance {
                who,
                free,
                reserved,
            } => {
                MultiAddress::<AccountId32, ()>::Id(who.clone()).encode_to(out);
                Compact(*free).encode_to(out);
                Compact(*reserved).encode_to(out);
            }
            Operation::Sudo(inner) => self.encode_into(inner, out)?,
            Operation::Batch(calls) => {
                Compact(calls.len() as u32).encode_to(out);
                for call in calls {
                    self.encode_into(call, out)?;
                }
            }
        }
        Ok(())
    }
}
