//! EIP-1559 (type `0x02`) transaction encoding.
//!
//! Only the RLP subset transactions need is implemented: byte strings,
//! big-endian integers without leading zeros, and lists.

use aa_session_core::{Address, address::keccak256};
use serde_json::Value;
use thiserror::Error;

/// Transaction type byte of EIP-1559 envelopes.
pub const EIP1559_TX_TYPE: u8 = 0x02;

/// Transaction request error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("Missing transaction field {0}")]
    Missing(&'static str),
    #[error("Invalid transaction field {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

fn invalid(field: &'static str, message: impl Into<String>) -> TxError {
    TxError::Invalid {
        field,
        message: message.into(),
    }
}

/// Append the RLP header for a payload of `len` bytes.
#[allow(clippy::cast_possible_truncation)]
fn encode_header(len: usize, offset: u8, out: &mut Vec<u8>) {
    if len < 56 {
        out.push(offset + len as u8);
    } else {
        let be = (len as u64).to_be_bytes();
        let len_bytes = trim_leading_zeros(&be);
        out.push(offset + 55 + len_bytes.len() as u8);
        out.extend_from_slice(len_bytes);
    }
}

/// RLP-encode a byte string.
#[must_use]
pub fn rlp_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        return bytes.to_vec();
    }
    let mut out = Vec::with_capacity(bytes.len() + 9);
    encode_header(bytes.len(), 0x80, &mut out);
    out.extend_from_slice(bytes);
    out
}

/// RLP-encode a list of already encoded items.
#[must_use]
pub fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let len = items.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(len + 9);
    encode_header(len, 0xc0, &mut out);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// Decode a JSON-RPC quantity into minimal big-endian bytes.
fn quantity(tx: &Value, field: &'static str) -> Result<Option<Vec<u8>>, TxError> {
    match tx.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| Some(trim_leading_zeros(&v.to_be_bytes()).to_vec()))
            .ok_or_else(|| invalid(field, format!("{n} is not an unsigned integer"))),
        Some(Value::String(s)) => {
            let digits = s
                .strip_prefix("0x")
                .ok_or_else(|| invalid(field, "quantity must be 0x-prefixed"))?
                .trim_start_matches('0');
            let padded = if digits.len() % 2 == 1 {
                format!("0{digits}")
            } else {
                digits.to_string()
            };
            hex::decode(padded)
                .map(Some)
                .map_err(|e| invalid(field, e.to_string()))
        }
        Some(other) => Err(invalid(field, format!("unexpected {other}"))),
    }
}

fn required(tx: &Value, field: &'static str) -> Result<Vec<u8>, TxError> {
    quantity(tx, field)?.ok_or(TxError::Missing(field))
}

fn to_u64(field: &'static str, bytes: &[u8]) -> Result<u64, TxError> {
    if bytes.len() > 8 {
        return Err(invalid(field, "does not fit in 64 bits"));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Unsigned EIP-1559 transaction with an empty access list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: Vec<u8>,
    pub max_priority_fee_per_gas: Vec<u8>,
    pub max_fee_per_gas: Vec<u8>,
    pub gas_limit: Vec<u8>,
    /// `None` deploys a contract.
    pub to: Option<Address>,
    pub value: Vec<u8>,
    pub data: Vec<u8>,
}

impl Eip1559Transaction {
    /// Build from an `eth_signTransaction` request object.
    ///
    /// `gasPrice` stands in for both fee caps when the EIP-1559 fields are
    /// absent.
    ///
    /// # Errors
    /// Returns error if a required field is missing or malformed, or if the
    /// request names another chain.
    pub fn from_request(tx: &Value, chain_id: u64) -> Result<Self, TxError> {
        if !tx.is_object() {
            return Err(invalid("transaction", "must be an object"));
        }
        if let Some(requested) = quantity(tx, "chainId")? {
            let requested = to_u64("chainId", &requested)?;
            if requested != chain_id {
                return Err(invalid(
                    "chainId",
                    format!("{requested} does not match chain {chain_id}"),
                ));
            }
        }

        let gas_price = quantity(tx, "gasPrice")?;
        let max_fee_per_gas = match quantity(tx, "maxFeePerGas")? {
            Some(fee) => fee,
            None => gas_price.clone().ok_or(TxError::Missing("maxFeePerGas"))?,
        };
        let max_priority_fee_per_gas = match quantity(tx, "maxPriorityFeePerGas")? {
            Some(fee) => fee,
            None => gas_price.unwrap_or_else(|| max_fee_per_gas.clone()),
        };
        let gas_limit = match quantity(tx, "gas")? {
            Some(gas) => gas,
            None => required(tx, "gasLimit")?,
        };
        let to = match tx.get("to") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                raw.as_str()
                    .ok_or_else(|| invalid("to", "must be a string"))?
                    .parse::<Address>()
                    .map_err(|e| invalid("to", e.to_string()))?,
            ),
        };
        let data = match tx.get("data").or_else(|| tx.get("input")) {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => {
                let digits = raw
                    .as_str()
                    .and_then(|s| s.strip_prefix("0x"))
                    .ok_or_else(|| invalid("data", "must be 0x-prefixed hex"))?;
                hex::decode(digits).map_err(|e| invalid("data", e.to_string()))?
            }
        };

        Ok(Self {
            chain_id,
            nonce: required(tx, "nonce")?,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit,
            to,
            value: quantity(tx, "value")?.unwrap_or_default(),
            data,
        })
    }

    fn fields(&self) -> Vec<Vec<u8>> {
        let chain_id = self.chain_id.to_be_bytes();
        vec![
            rlp_bytes(trim_leading_zeros(&chain_id)),
            rlp_bytes(&self.nonce),
            rlp_bytes(&self.max_priority_fee_per_gas),
            rlp_bytes(&self.max_fee_per_gas),
            rlp_bytes(&self.gas_limit),
            rlp_bytes(self.to.as_ref().map_or(&[][..], |a| &a.as_bytes()[..])),
            rlp_bytes(&self.value),
            rlp_bytes(&self.data),
            rlp_list(&[]),
        ]
    }

    /// Digest the sender signs: `keccak256(0x02 || rlp(fields))`.
    #[must_use]
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut preimage = vec![EIP1559_TX_TYPE];
        preimage.extend(rlp_list(&self.fields()));
        keccak256(&preimage)
    }

    /// Signed envelope: `0x02 || rlp(fields ++ [y_parity, r, s])`.
    #[must_use]
    pub fn encode_signed(&self, y_parity: bool, r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut fields = self.fields();
        let parity: &[u8] = if y_parity { &[1] } else { &[] };
        fields.push(rlp_bytes(parity));
        fields.push(rlp_bytes(trim_leading_zeros(r)));
        fields.push(rlp_bytes(trim_leading_zeros(s)));
        let mut out = vec![EIP1559_TX_TYPE];
        out.extend(rlp_list(&fields));
        out
    }
}
