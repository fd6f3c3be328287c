//! Submission engine.
//!
//! Turns a [`Batch`] into one bulk ledger transaction: estimate gas, send
//! with a fixed safety margin, wait for the receipt, and report the
//! on-chain status. The engine keeps no state between calls; retrying is
//! the coordinator's decision.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerCall, LedgerClient, LedgerError, Receipt, TxOptions};
use crate::types::{Batch, RecordKind, TxHash};

/// Gas limit applied on top of the estimate, in percent.
pub const GAS_MARGIN_PERCENT: u64 = 120;

const GWEI: u128 = 1_000_000_000;

/// Which contract method a batch is sent through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmissionMode {
    /// Multi-account `bulkStoreNewRecords`.
    NewRecords,
    /// Single-sender `bulkStoreRecordBytesInc`, with the client's own
    /// address as sender.
    RecordBytesInc,
}

/// Configuration for [`SubmissionEngine`].
#[derive(Clone, Debug)]
pub struct SubmissionConfig {
    /// Blocks to wait on top of the inclusion block.
    pub confirmations: usize,
    /// EIP-1559 fee cap in wei; `None` leaves it to the client.
    pub max_fee_per_gas: Option<u128>,
    /// EIP-1559 priority fee in wei; `None` leaves it to the client.
    pub max_priority_fee_per_gas: Option<u128>,
    /// Deadline for gas estimation and for broadcasting.
    pub rpc_timeout: Duration,
    /// Deadline for the receipt to reach the requested confirmations.
    pub receipt_timeout: Duration,
    pub hash_mode: SubmissionMode,
    pub xuni_mode: SubmissionMode,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            confirmations: 1,
            max_fee_per_gas: Some(10 * GWEI),
            max_priority_fee_per_gas: Some(2 * GWEI),
            rpc_timeout: Duration::from_secs(30),
            receipt_timeout: Duration::from_secs(180),
            hash_mode: SubmissionMode::NewRecords,
            xuni_mode: SubmissionMode::RecordBytesInc,
        }
    }
}

impl SubmissionConfig {
    pub fn mode_for(&self, kind: RecordKind) -> SubmissionMode {
        match kind {
            RecordKind::Hash => self.hash_mode,
            RecordKind::Xuni => self.xuni_mode,
        }
    }
}

/// Successful result of [`SubmissionEngine::submit`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    /// Mined with `status == 1`.
    Confirmed(Receipt),
    /// Nothing to send.
    Skipped,
}

/// Failed submission.
#[derive(Debug)]
pub enum SubmissionError {
    /// Estimation, broadcast, receipt polling or a deadline failed.
    Transport(LedgerError),
    /// Mined, but the receipt status is not `1`.
    Reverted { tx: TxHash, status: u64 },
}

impl SubmissionError {
    /// `true` for failures where the same batch can be resent as is.
    pub fn is_transient(&self) -> bool {
        matches!(self, SubmissionError::Transport(_))
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SubmissionError::Transport(_) => "transport",
            SubmissionError::Reverted { .. } => "reverted",
        }
    }
}

impl From<LedgerError> for SubmissionError {
    fn from(e: LedgerError) -> Self {
        SubmissionError::Transport(e)
    }
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionError::Transport(e) => write!(f, "{e}"),
            SubmissionError::Reverted { tx, status } => {
                write!(f, "transaction {tx} failed on-chain with status {status}")
            }
        }
    }
}

impl std::error::Error for SubmissionError {}

/// Returns `estimate` scaled by [`GAS_MARGIN_PERCENT`].
pub fn gas_with_margin(estimate: u64) -> u64 {
    let scaled = u128::from(estimate) * u128::from(GAS_MARGIN_PERCENT) / 100;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Submits batches through a [`LedgerClient`].
pub struct SubmissionEngine<C> {
    client: C,
    cfg: SubmissionConfig,
}

impl<C: LedgerClient> SubmissionEngine<C> {
    pub fn new(client: C, cfg: SubmissionConfig) -> Self {
        Self { client, cfg }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &SubmissionConfig {
        &self.cfg
    }

    /// Builds the contract call for `batch` according to its kind.
    pub fn build_call(&self, batch: &Batch) -> LedgerCall {
        let records = batch.records.iter().map(|r| r.encoded.to_bytes()).collect();
        match self.cfg.mode_for(batch.kind) {
            SubmissionMode::NewRecords => LedgerCall::BulkStoreNewRecords {
                accounts: batch.accounts(),
                records,
            },
            SubmissionMode::RecordBytesInc => LedgerCall::BulkStoreRecordBytesInc {
                sender: self.client.sender(),
                records,
            },
        }
    }

    /// Submits `batch` and waits for its receipt.
    ///
    /// Empty batches are reported as [`SubmitOutcome::Skipped`] without
    /// touching the ledger.
    pub async fn submit(&self, batch: &Batch) -> Result<SubmitOutcome, SubmissionError> {
        if batch.is_empty() {
            debug!(cursor = %batch.cursor, "empty batch, skipping submission");
            return Ok(SubmitOutcome::Skipped);
        }

        let call = self.build_call(batch);

        let estimate = deadline(
            self.cfg.rpc_timeout,
            "gas estimation",
            self.client.estimate_gas(&call),
        )
        .await?;

        let opts = TxOptions {
            gas_limit: gas_with_margin(estimate),
            max_fee_per_gas: self.cfg.max_fee_per_gas,
            max_priority_fee_per_gas: self.cfg.max_priority_fee_per_gas,
        };

        let handle = match deadline(
            self.cfg.rpc_timeout,
            "broadcast",
            self.client.send(&call, &opts),
        )
        .await
        {
            Ok(handle) => handle,
            Err(e) => return Err(self.resync_after(e).await),
        };

        let receipt = match deadline(
            self.cfg.receipt_timeout,
            "receipt",
            self.client.await_receipt(&handle, self.cfg.confirmations),
        )
        .await
        {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.resync_after(e).await),
        };

        if !receipt.is_success() {
            return Err(SubmissionError::Reverted {
                tx: receipt.tx_hash,
                status: receipt.status,
            });
        }

        info!(
            method = call.method(),
            kind = %batch.kind,
            records = batch.len(),
            gas_estimate = estimate,
            gas_limit = opts.gas_limit,
            tx = %receipt.tx_hash,
            "batch confirmed"
        );
        Ok(SubmitOutcome::Confirmed(receipt))
    }

    /// A failed broadcast or lost receipt may leave the client's nonce
    /// ahead of the node; re-read it so the retry is not stuck behind a gap.
    async fn resync_after(&self, err: LedgerError) -> SubmissionError {
        let resync = deadline(
            self.cfg.rpc_timeout,
            "nonce resync",
            self.client.resync_nonce(),
        );
        if let Err(e) = resync.await {
            warn!(error = %e, cause = %err, "nonce resync failed; next send may stall");
        }
        SubmissionError::Transport(err)
    }
}

async fn deadline<T, F>(limit: Duration, stage: &'static str, fut: F) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout(stage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::ScriptedLedger;
    use crate::types::{
        AcceptedRecord, Cursor, EncodedRecord, KEY_LEN, NormalizedAccount, TX_HASH_LEN,
    };

    fn record(kind: RecordKind, id: u8) -> AcceptedRecord {
        AcceptedRecord {
            key: format!("key-{id}"),
            kind,
            account: NormalizedAccount([id; 20]),
            block_id: u64::from(id),
            encoded: EncodedRecord {
                parallelism: 1,
                memory_cost: 65_536,
                time_cost: 3,
                version: 19,
                key: [id; KEY_LEN],
                salt: vec![id; 8],
            },
        }
    }

    fn batch(kind: RecordKind, n: u8) -> Batch {
        Batch {
            kind,
            records: (0..n).map(|i| record(kind, i)).collect(),
            cursor: Cursor(u64::from(n)),
        }
    }

    fn engine() -> SubmissionEngine<ScriptedLedger> {
        SubmissionEngine::new(ScriptedLedger::new(), SubmissionConfig::default())
    }

    #[test]
    fn margin_is_twenty_percent() {
        assert_eq!(gas_with_margin(100_000), 120_000);
        assert_eq!(gas_with_margin(0), 0);
        assert_eq!(gas_with_margin(u64::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn empty_batch_is_skipped_without_ledger_calls() {
        let engine = engine();
        let outcome = engine
            .submit(&Batch::empty(RecordKind::Hash, Cursor(3)))
            .await
            .expect("skip");

        assert_eq!(outcome, SubmitOutcome::Skipped);
        assert!(engine.client().sent_calls().is_empty());
    }

    #[tokio::test]
    async fn hash_batch_uses_multi_account_call_with_margin_and_fees() {
        let engine = engine();
        engine.client().push_estimate(Ok(50_000));

        let outcome = engine
            .submit(&batch(RecordKind::Hash, 3))
            .await
            .expect("confirmed");
        assert!(matches!(outcome, SubmitOutcome::Confirmed(r) if r.is_success()));

        let sent = engine.client().sent_calls();
        assert_eq!(sent.len(), 1);
        let (call, opts) = &sent[0];
        match call {
            LedgerCall::BulkStoreNewRecords { accounts, records } => {
                assert_eq!(accounts.len(), 3);
                assert_eq!(accounts[2], NormalizedAccount([2; 20]));
                assert_eq!(records[1], record(RecordKind::Hash, 1).encoded.to_bytes());
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(opts.gas_limit, 60_000);
        assert_eq!(opts.max_fee_per_gas, Some(10 * GWEI));
        assert_eq!(opts.max_priority_fee_per_gas, Some(2 * GWEI));
    }

    #[tokio::test]
    async fn xuni_batch_uses_single_sender_call() {
        let engine = engine();
        engine
            .submit(&batch(RecordKind::Xuni, 2))
            .await
            .expect("confirmed");

        let sent = engine.client().sent_calls();
        match &sent[0].0 {
            LedgerCall::BulkStoreRecordBytesInc { sender, records } => {
                assert_eq!(*sender, engine.client().sender);
                assert_eq!(records.len(), 2);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_zero_is_reported_as_reverted() {
        let engine = engine();
        engine.client().push_receipt_status(0);

        let err = engine
            .submit(&batch(RecordKind::Hash, 10))
            .await
            .expect_err("reverted");
        assert!(matches!(err, SubmissionError::Reverted { status: 0, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn estimation_failure_is_transient_and_sends_nothing() {
        let engine = engine();
        engine
            .client()
            .push_estimate(Err(LedgerError::Estimate("execution reverted".into())));

        let err = engine
            .submit(&batch(RecordKind::Hash, 1))
            .await
            .expect_err("estimate failure");
        assert!(err.is_transient());
        assert_eq!(err.kind(), "transport");
        assert!(engine.client().sent_calls().is_empty());
        assert_eq!(engine.client().nonce_resyncs(), 0);
    }

    #[tokio::test]
    async fn failed_broadcast_resyncs_nonce_before_retry() {
        let engine = engine();
        engine
            .client()
            .push_send_error(LedgerError::Send("connection reset by peer".into()));

        let err = engine
            .submit(&batch(RecordKind::Hash, 2))
            .await
            .expect_err("broadcast failure");
        assert!(err.is_transient());
        assert!(engine.client().sent_calls().is_empty());
        assert_eq!(engine.client().nonce_resyncs(), 1);

        let outcome = engine
            .submit(&batch(RecordKind::Hash, 2))
            .await
            .expect("retry confirmed");
        assert!(matches!(outcome, SubmitOutcome::Confirmed(_)));
        assert_eq!(engine.client().sent_calls().len(), 1);
        assert_eq!(engine.client().nonce_resyncs(), 1);
    }

    #[tokio::test]
    async fn receipt_failure_resyncs_nonce() {
        let engine = engine();
        engine
            .client()
            .push_receipt_error(LedgerError::Receipt("node restarting".into()));

        let err = engine
            .submit(&batch(RecordKind::Hash, 1))
            .await
            .expect_err("receipt failure");
        assert!(err.is_transient());
        assert_eq!(engine.client().nonce_resyncs(), 1);
    }

    #[tokio::test]
    async fn confirmed_and_reverted_batches_keep_the_nonce() {
        let engine = engine();
        engine.client().push_receipt_status(0);

        engine
            .submit(&batch(RecordKind::Hash, 1))
            .await
            .expect_err("reverted");
        engine
            .submit(&batch(RecordKind::Hash, 1))
            .await
            .expect("confirmed");
        assert_eq!(engine.client().nonce_resyncs(), 0);
    }

    #[tokio::test]
    async fn dropped_transaction_is_transient() {
        let engine = engine();
        engine
            .client()
            .push_receipt_error(LedgerError::Dropped(TxHash([9; TX_HASH_LEN])));

        let err = engine
            .submit(&batch(RecordKind::Hash, 1))
            .await
            .expect_err("dropped");
        assert!(err.is_transient());
        assert_eq!(engine.client().nonce_resyncs(), 1);
    }
}
