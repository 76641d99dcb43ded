use alloy_primitives::{keccak256, Address, U256};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{EventId, Receipt};
use crate::ledger::{AccessLedger, LedgerError, Settlement};

/// MetaMask-style rejection code, also emitted by node-managed accounts.
const CODE_USER_REJECTED: i64 = 4001;

/// Access contract over JSON-RPC.
///
/// Reads go through `eth_call`; the payment transaction is submitted with
/// `eth_sendTransaction`, so signing stays with the node account named by
/// `from` rather than in this crate.
pub struct RpcLedger {
    client: reqwest::Client,
    rpc_url: String,
    contract: Address,
    chain_id: u64,
    from: Address,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcLedger {
    pub fn new(rpc_url: String, contract: Address, chain_id: u64, from: Address) -> Self {
        let client = reqwest::Client::new();
        Self {
            client,
            rpc_url,
            contract,
            chain_id,
            from,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let response: RpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        if let Some(error) = response.error {
            return Err(map_provider_error(error));
        }
        response
            .result
            .ok_or_else(|| LedgerError::Transport("no result in RPC response".to_string()))
    }

    async fn eth_call(&self, data: String) -> Result<Vec<u8>, LedgerError> {
        let result = self
            .call(
                "eth_call",
                json!([{"to": self.contract.to_string(), "data": data}, "latest"]),
            )
            .await?;
        let encoded = result
            .as_str()
            .ok_or_else(|| LedgerError::Transport("non-string eth_call result".to_string()))?;
        hex::decode(encoded.trim_start_matches("0x"))
            .map_err(|e| LedgerError::Transport(e.to_string()))
    }

    async fn current_chain_id(&self) -> Result<u64, LedgerError> {
        let result = self.call("eth_chainId", json!([])).await?;
        let encoded = result
            .as_str()
            .ok_or_else(|| LedgerError::Transport("non-string chain id".to_string()))?;
        u64::from_str_radix(encoded.trim_start_matches("0x"), 16)
            .map_err(|e| LedgerError::Transport(e.to_string()))
    }
}

#[async_trait]
impl AccessLedger for RpcLedger {
    async fn price(&self) -> Result<U256, LedgerError> {
        let bytes = self.eth_call(selector("predictionPrice()")).await?;
        decode_u256(&bytes)
    }
    async fn can_access(&self, account: Address, event: EventId) -> Result<bool, LedgerError> {
        let data = selector("canAccessPrediction(address,uint256)")
            + &encode_address(account)
            + &encode_u256(U256::from(event as u64));
        let bytes = self.eth_call(data).await?;
        Ok(bytes.last().copied().unwrap_or(0) != 0)
    }
    async fn purchase(
        &self,
        _account: Address,
        event: EventId,
        amount: U256,
    ) -> Result<Receipt, LedgerError> {
        let data = selector("purchasePrediction(uint256)") + &encode_u256(U256::from(event as u64));
        let result = self
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": self.from.to_string(),
                    "to": self.contract.to_string(),
                    "value": format!("0x{:x}", amount),
                    "data": data,
                }]),
            )
            .await?;
        let hash = result
            .as_str()
            .ok_or_else(|| LedgerError::Transport("non-string transaction hash".to_string()))?;
        debug!("payment for event {} submitted as {}", event, hash);
        Ok(hash.to_string())
    }
    async fn settlement(&self, receipt: &Receipt) -> Result<Settlement, LedgerError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([receipt]))
            .await?;
        if result.is_null() {
            return Ok(Settlement::Pending);
        }
        match result.get("status").and_then(Value::as_str) {
            Some("0x1") => Ok(Settlement::Confirmed),
            Some(_) => Ok(Settlement::Reverted),
            None => Ok(Settlement::Pending),
        }
    }
    async fn withdraw(&self, account: Address) -> Result<U256, LedgerError> {
        if self.owner().await? != account {
            return Err(LedgerError::NotOwner);
        }
        let result = self
            .call(
                "eth_getBalance",
                json!([self.contract.to_string(), "latest"]),
            )
            .await?;
        let encoded = result
            .as_str()
            .ok_or_else(|| LedgerError::Transport("non-string balance".to_string()))?;
        let balance = U256::from_str_radix(encoded.trim_start_matches("0x"), 16)
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        if balance.is_zero() {
            return Err(LedgerError::NothingToWithdraw);
        }
        self.call(
            "eth_sendTransaction",
            json!([{
                "from": self.from.to_string(),
                "to": self.contract.to_string(),
                "data": selector("withdraw()"),
            }]),
        )
        .await?;
        Ok(balance)
    }
    async fn owner(&self) -> Result<Address, LedgerError> {
        let bytes = self.eth_call(selector("owner()")).await?;
        decode_address(&bytes)
    }
    async fn ensure_network(&self) -> Result<(), LedgerError> {
        let actual = self.current_chain_id().await?;
        if actual == self.chain_id {
            return Ok(());
        }
        // One switch attempt, then re-check. Plain nodes reject the
        // method, which surfaces the mismatch below.
        let switched = self
            .call(
                "wallet_switchEthereumChain",
                json!([{"chainId": format!("0x{:x}", self.chain_id)}]),
            )
            .await;
        if let Err(e) = switched {
            warn!("network switch to chain {} failed: {}", self.chain_id, e);
        } else if self.current_chain_id().await? == self.chain_id {
            return Ok(());
        }
        Err(LedgerError::WrongNetwork {
            expected: self.chain_id,
            actual,
        })
    }
}

/// Four-byte ABI selector of `signature`, hex-encoded with prefix.
fn selector(signature: &str) -> String {
    let hash = keccak256(signature.as_bytes());
    format!("0x{}", hex::encode(&hash[..4]))
}
fn encode_u256(value: U256) -> String {
    hex::encode(value.to_be_bytes::<32>())
}
fn encode_address(address: Address) -> String {
    format!("{:0>64}", hex::encode(address.as_slice()))
}
fn decode_u256(bytes: &[u8]) -> Result<U256, LedgerError> {
    if bytes.len() < 32 {
        return Err(LedgerError::Transport(format!(
            "response too short: {} bytes",
            bytes.len()
        )));
    }
    Ok(U256::from_be_slice(&bytes[..32]))
}
fn decode_address(bytes: &[u8]) -> Result<Address, LedgerError> {
    if bytes.len() < 32 {
        return Err(LedgerError::Transport(format!(
            "response too short: {} bytes",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes[12..32]))
}

fn map_provider_error(error: RpcError) -> LedgerError {
    let message = error.message.to_lowercase();
    if error.code == CODE_USER_REJECTED {
        LedgerError::UserRejected
    } else if message.contains("insufficient funds") {
        LedgerError::InsufficientFunds
    } else if message.contains("already purchased") {
        LedgerError::AlreadyPurchased
    } else if message.contains("insufficient payment") {
        LedgerError::InsufficientPayment
    } else {
        LedgerError::Transport(error.message)
    }
}
