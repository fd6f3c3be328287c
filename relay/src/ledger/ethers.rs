//! JSON-RPC ledger client built on `ethers`.
//!
//! The middleware stack is a local-wallet signer over a nonce manager over
//! an HTTP provider, so back-to-back bulk transactions get consecutive
//! nonces without a round-trip per send. The manager hands out a nonce
//! before the signed transaction is broadcast, so a failed broadcast leaves
//! a gap; [`LedgerClient::resync_nonce`] re-reads the pending count to
//! close it.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::contract::{ContractCall, abigen};
use ethers::middleware::{NonceManagerMiddleware, SignerMiddleware};
use ethers::providers::{Http, Middleware, PendingTransaction, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, BlockNumber, Bytes, H256, U256};
use tracing::{debug, info};

use super::{LedgerCall, LedgerClient, LedgerConfig, LedgerError, Receipt, TxHandle, TxOptions};
use crate::types::{NormalizedAccount, TxHash};

abigen!(
    RecordStore,
    r#"[
        function bulkStoreNewRecords(address[] accounts, bytes[] records)
        function bulkStoreRecordBytesInc(address sender, bytes[] records)
    ]"#
);

type Client = SignerMiddleware<NonceManagerMiddleware<Provider<Http>>, LocalWallet>;

/// [`LedgerClient`] backed by an EVM JSON-RPC endpoint.
pub struct EthersLedgerClient {
    client: Arc<Client>,
    contract: RecordStore<Client>,
    sender: NormalizedAccount,
}

impl EthersLedgerClient {
    /// Builds the client. No network round-trip happens here.
    pub fn connect(cfg: &LedgerConfig) -> Result<Self, LedgerError> {
        let provider = Provider::<Http>::try_from(cfg.rpc_url.as_str())
            .map_err(|e| LedgerError::Config(format!("bad RPC url {:?}: {e}", cfg.rpc_url)))?
            .interval(Duration::from_millis(cfg.poll_interval_ms.max(1)));

        let wallet = LocalWallet::from_str(cfg.private_key.trim())
            .map_err(|_| LedgerError::Config("bad private key".into()))?
            .with_chain_id(cfg.chain_id);
        let address = wallet.address();

        let contract_address = Address::from_str(cfg.contract_address.trim()).map_err(|e| {
            LedgerError::Config(format!(
                "bad contract address {:?}: {e}",
                cfg.contract_address
            ))
        })?;

        let nonces = NonceManagerMiddleware::new(provider, address);
        let client = Arc::new(SignerMiddleware::new(nonces, wallet));
        let contract = RecordStore::new(contract_address, Arc::clone(&client));
        let sender = NormalizedAccount(address.0);

        info!(
            rpc = %cfg.rpc_url,
            chain_id = cfg.chain_id,
            contract = ?contract_address,
            sender = %sender,
            "ledger client ready"
        );

        Ok(Self {
            client,
            contract,
            sender,
        })
    }

    fn contract_call(&self, call: &LedgerCall) -> ContractCall<Client, ()> {
        match call {
            LedgerCall::BulkStoreNewRecords { accounts, records } => {
                self.contract.bulk_store_new_records(
                    accounts.iter().map(|a| Address::from(a.0)).collect(),
                    to_bytes(records),
                )
            }
            LedgerCall::BulkStoreRecordBytesInc { sender, records } => self
                .contract
                .bulk_store_record_bytes_inc(Address::from(sender.0), to_bytes(records)),
        }
    }
}

fn to_bytes(records: &[Vec<u8>]) -> Vec<Bytes> {
    records.iter().cloned().map(Bytes::from).collect()
}

fn low_u64(v: U256) -> Option<u64> {
    (v <= U256::from(u64::MAX)).then(|| v.low_u64())
}

#[async_trait]
impl LedgerClient for EthersLedgerClient {
    fn sender(&self) -> NormalizedAccount {
        self.sender
    }

    async fn estimate_gas(&self, call: &LedgerCall) -> Result<u64, LedgerError> {
        let gas = self
            .contract_call(call)
            .estimate_gas()
            .await
            .map_err(|e| LedgerError::Estimate(e.to_string()))?;

        low_u64(gas).ok_or_else(|| LedgerError::Estimate(format!("estimate {gas} overflows u64")))
    }

    async fn send(&self, call: &LedgerCall, opts: &TxOptions) -> Result<TxHandle, LedgerError> {
        let mut tx = self.contract_call(call).gas(U256::from(opts.gas_limit));
        if let Some(req) = tx.tx.as_eip1559_mut() {
            if let Some(max_fee) = opts.max_fee_per_gas {
                req.max_fee_per_gas = Some(U256::from(max_fee));
            }
            if let Some(tip) = opts.max_priority_fee_per_gas {
                req.max_priority_fee_per_gas = Some(U256::from(tip));
            }
        }

        let pending = tx
            .send()
            .await
            .map_err(|e| LedgerError::Send(e.to_string()))?;
        let hash = TxHash(pending.tx_hash().0);

        debug!(method = call.method(), tx = %hash, gas_limit = opts.gas_limit, "broadcast");
        Ok(TxHandle { hash })
    }

    async fn await_receipt(
        &self,
        handle: &TxHandle,
        confirmations: usize,
    ) -> Result<Receipt, LedgerError> {
        let receipt = PendingTransaction::new(H256(handle.hash.0), self.client.provider())
            .confirmations(confirmations.max(1))
            .await
            .map_err(|e| LedgerError::Receipt(e.to_string()))?
            .ok_or(LedgerError::Dropped(handle.hash))?;

        Ok(Receipt {
            tx_hash: TxHash(receipt.transaction_hash.0),
            status: receipt.status.map(|s| s.as_u64()).unwrap_or(0),
            gas_used: receipt.gas_used.and_then(low_u64),
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    async fn resync_nonce(&self) -> Result<(), LedgerError> {
        let next = self
            .client
            .inner()
            .initialize_nonce(Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| LedgerError::Send(format!("nonce resync failed: {e}")))?;

        info!(sender = %self.sender, nonce = %next, "nonce resynchronised from node");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known development key; its address is public.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDR: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn cfg() -> LedgerConfig {
        LedgerConfig {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 204_005,
            contract_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
            private_key: DEV_KEY.to_string(),
            poll_interval_ms: 50,
        }
    }

    #[test]
    fn connect_derives_sender_from_key() {
        let client = EthersLedgerClient::connect(&cfg()).expect("connect");
        assert_eq!(client.sender().to_string(), DEV_ADDR);
    }

    #[test]
    fn connect_rejects_bad_inputs() {
        let bad_key = LedgerConfig {
            private_key: "not-a-key".into(),
            ..cfg()
        };
        let err = EthersLedgerClient::connect(&bad_key).err().expect("bad key");
        assert!(matches!(err, LedgerError::Config(_)));
        assert!(!err.to_string().contains("not-a-key"));

        let bad_contract = LedgerConfig {
            contract_address: "0x1234".into(),
            ..cfg()
        };
        assert!(EthersLedgerClient::connect(&bad_contract).is_err());

        let bad_url = LedgerConfig {
            rpc_url: "not a url".into(),
            ..cfg()
        };
        assert!(EthersLedgerClient::connect(&bad_url).is_err());
    }

    #[test]
    fn contract_calls_encode_both_methods() {
        let client = EthersLedgerClient::connect(&cfg()).expect("connect");

        let multi = client.contract_call(&LedgerCall::BulkStoreNewRecords {
            accounts: vec![NormalizedAccount([1; 20])],
            records: vec![vec![0xAA, 0xBB]],
        });
        let single = client.contract_call(&LedgerCall::BulkStoreRecordBytesInc {
            sender: client.sender(),
            records: vec![vec![0xAA, 0xBB]],
        });

        let multi_data = multi.calldata().expect("calldata");
        let single_data = single.calldata().expect("calldata");
        assert_ne!(multi_data[..4], single_data[..4]);
    }

    #[tokio::test]
    async fn nonce_resync_surfaces_unreachable_node() {
        let unreachable = LedgerConfig {
            rpc_url: "http://127.0.0.1:1".to_string(),
            ..cfg()
        };
        let client = EthersLedgerClient::connect(&unreachable).expect("connect");

        let err = client.resync_nonce().await.expect_err("no node");
        assert!(matches!(err, LedgerError::Send(ref msg) if msg.starts_with("nonce resync")));
    }

    #[test]
    fn low_u64_rejects_overflow() {
        assert_eq!(low_u64(U256::from(21_000u64)), Some(21_000));
        assert_eq!(low_u64(U256::MAX), None);
    }
}
