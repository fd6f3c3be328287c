//! Ledger client capability.
//!
//! The submission engine talks to the record-store contract only through
//! [`LedgerClient`]. The concrete [`ethers::EthersLedgerClient`] signs and
//! sends over JSON-RPC; tests script their own implementations.

pub mod ethers;

use std::fmt;

use async_trait::async_trait;

use crate::types::{NormalizedAccount, TxHash};

pub use self::ethers::EthersLedgerClient;

/// One bulk call against the record-store contract.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LedgerCall {
    /// `bulkStoreNewRecords(address[] accounts, bytes[] records)`.
    BulkStoreNewRecords {
        accounts: Vec<NormalizedAccount>,
        records: Vec<Vec<u8>>,
    },
    /// `bulkStoreRecordBytesInc(address sender, bytes[] records)`.
    BulkStoreRecordBytesInc {
        sender: NormalizedAccount,
        records: Vec<Vec<u8>>,
    },
}

impl LedgerCall {
    /// Contract method name, for logs.
    pub fn method(&self) -> &'static str {
        match self {
            LedgerCall::BulkStoreNewRecords { .. } => "bulkStoreNewRecords",
            LedgerCall::BulkStoreRecordBytesInc { .. } => "bulkStoreRecordBytesInc",
        }
    }

    pub fn records(&self) -> &[Vec<u8>] {
        match self {
            LedgerCall::BulkStoreNewRecords { records, .. }
            | LedgerCall::BulkStoreRecordBytesInc { records, .. } => records,
        }
    }
}

/// Per-transaction gas and fee settings.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TxOptions {
    pub gas_limit: u64,
    /// EIP-1559 `maxFeePerGas` in wei.
    pub max_fee_per_gas: Option<u128>,
    /// EIP-1559 `maxPriorityFeePerGas` in wei.
    pub max_priority_fee_per_gas: Option<u128>,
}

/// Handle to a broadcast transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxHandle {
    pub hash: TxHash,
}

/// Mined transaction receipt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// `1` on success, anything else is an on-chain failure.
    pub status: u64,
    pub gas_used: Option<u64>,
    pub block_number: Option<u64>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == 1
    }
}

/// Ledger client capability consumed by the submission engine.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address the client signs with.
    fn sender(&self) -> NormalizedAccount;

    /// Estimates gas units for `call`.
    async fn estimate_gas(&self, call: &LedgerCall) -> Result<u64, LedgerError>;

    /// Signs and broadcasts `call`.
    async fn send(&self, call: &LedgerCall, opts: &TxOptions) -> Result<TxHandle, LedgerError>;

    /// Waits until `handle` is mined with `confirmations` blocks on top.
    async fn await_receipt(
        &self,
        handle: &TxHandle,
        confirmations: usize,
    ) -> Result<Receipt, LedgerError>;

    /// Drops any locally tracked nonce and re-reads it from the node.
    ///
    /// Called after a send or receipt failure, when a nonce may have been
    /// assigned to a transaction that never reached the mempool. Clients
    /// that let the node assign nonces keep the default no-op.
    async fn resync_nonce(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Transport-level ledger failures. All of them are retryable.
#[derive(Debug)]
pub enum LedgerError {
    /// Client could not be constructed from configuration.
    Config(String),
    /// Gas estimation failed, including simulated reverts.
    Estimate(String),
    /// Signing or broadcasting failed (nonce conflicts land here).
    Send(String),
    /// Polling for the receipt failed.
    Receipt(String),
    /// Transaction disappeared from the mempool before being mined.
    Dropped(TxHash),
    /// A ledger call exceeded its deadline.
    Timeout(&'static str),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Config(msg) => write!(f, "ledger client config error: {msg}"),
            LedgerError::Estimate(msg) => write!(f, "gas estimation failed: {msg}"),
            LedgerError::Send(msg) => write!(f, "transaction send failed: {msg}"),
            LedgerError::Receipt(msg) => write!(f, "receipt polling failed: {msg}"),
            LedgerError::Dropped(tx) => write!(f, "transaction {tx} dropped before mining"),
            LedgerError::Timeout(stage) => write!(f, "ledger {stage} timed out"),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Connection settings for the concrete ledger client.
#[derive(Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: String,
    /// Hex-encoded signing key. Never logged.
    pub private_key: String,
    /// Receipt polling interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://x1-testnet.infrafc.org".to_string(),
            chain_id: 204_005,
            contract_address: String::new(),
            private_key: String::new(),
            poll_interval_ms: 1_000,
        }
    }
}

impl fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("contract_address", &self.contract_address)
            .field("private_key", &"<redacted>")
            .field("poll_interval_ms", &self.poll_interval_ms)
            .finish()
    }
}

/// Scripted ledger used by unit tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::TX_HASH_LEN;

    /// Replays queued estimate, send and receipt results, then defaults to
    /// success. Every broadcast call is recorded.
    pub(crate) struct ScriptedLedger {
        pub sender: NormalizedAccount,
        pub estimates: Mutex<VecDeque<Result<u64, LedgerError>>>,
        pub send_errors: Mutex<VecDeque<LedgerError>>,
        pub receipts: Mutex<VecDeque<Result<u64, LedgerError>>>,
        pub sent: Mutex<Vec<(LedgerCall, TxOptions)>>,
        pub nonce_resyncs: AtomicUsize,
        pub default_estimate: u64,
    }

    impl ScriptedLedger {
        pub(crate) fn new() -> Self {
            Self {
                sender: NormalizedAccount([0xEE; 20]),
                estimates: Mutex::new(VecDeque::new()),
                send_errors: Mutex::new(VecDeque::new()),
                receipts: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
                nonce_resyncs: AtomicUsize::new(0),
                default_estimate: 100_000,
            }
        }

        pub(crate) fn push_receipt_status(&self, status: u64) {
            self.receipts.lock().expect("lock").push_back(Ok(status));
        }

        pub(crate) fn push_receipt_error(&self, err: LedgerError) {
            self.receipts.lock().expect("lock").push_back(Err(err));
        }

        pub(crate) fn push_estimate(&self, result: Result<u64, LedgerError>) {
            self.estimates.lock().expect("lock").push_back(result);
        }

        /// The next broadcast fails with `err` and is not recorded.
        pub(crate) fn push_send_error(&self, err: LedgerError) {
            self.send_errors.lock().expect("lock").push_back(err);
        }

        pub(crate) fn sent_calls(&self) -> Vec<(LedgerCall, TxOptions)> {
            self.sent.lock().expect("lock").clone()
        }

        pub(crate) fn nonce_resyncs(&self) -> usize {
            self.nonce_resyncs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LedgerClient for ScriptedLedger {
        fn sender(&self) -> NormalizedAccount {
            self.sender
        }

        async fn estimate_gas(&self, _call: &LedgerCall) -> Result<u64, LedgerError> {
            self.estimates
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Ok(self.default_estimate))
        }

        async fn send(&self, call: &LedgerCall, opts: &TxOptions) -> Result<TxHandle, LedgerError> {
            if let Some(err) = self.send_errors.lock().expect("lock").pop_front() {
                return Err(err);
            }
            let mut sent = self.sent.lock().expect("lock");
            sent.push((call.clone(), *opts));
            Ok(TxHandle {
                hash: TxHash([sent.len() as u8; TX_HASH_LEN]),
            })
        }

        async fn await_receipt(
            &self,
            handle: &TxHandle,
            _confirmations: usize,
        ) -> Result<Receipt, LedgerError> {
            let status = self
                .receipts
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Ok(1))?;
            Ok(Receipt {
                tx_hash: handle.hash,
                status,
                gas_used: Some(90_000),
                block_number: Some(1),
            })
        }

        async fn resync_nonce(&self) -> Result<(), LedgerError> {
            self.nonce_resyncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_config_debug_redacts_key() {
        let cfg = LedgerConfig {
            private_key: "deadbeef".repeat(8),
            ..LedgerConfig::default()
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("deadbeef"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn receipt_success_is_status_one() {
        let mut r = Receipt {
            tx_hash: TxHash([0; 32]),
            status: 1,
            gas_used: None,
            block_number: None,
        };
        assert!(r.is_success());
        r.status = 0;
        assert!(!r.is_success());
    }
}
