//! Fee submission with gas ceiling, nonce pinning and confirmation polling
//!
//! The nonce is read from the node until a transaction is broadcast. From then
//! on it is pinned: a retry first checks whether an earlier broadcast was
//! included, and otherwise replaces it at the same nonce with a higher gas
//! price.

use super::contract::{FeeContract, TxReceipt};
use super::errors::ChainError;
use crate::metrics::{metrics, Timer};
use crate::resilience::{GuardError, ResilienceGuard, RetryPolicy};
use crate::structured_logging::CycleLogger;
use crate::types::{ComputedRate, SubmissionRecord, TxHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitSettings {
    /// Gas price ceiling in wei
    pub max_gas_price_wei: u128,
    /// How long to wait for inclusion after each broadcast
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SubmitSettings {
    fn default() -> Self {
        Self {
            max_gas_price_wei: 50_000_000_000,
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Drives one [`SubmissionRecord`] from `Pending` to a terminal state
pub struct ChainSubmitter {
    contract: Arc<dyn FeeContract>,
    guard: ResilienceGuard,
    settings: SubmitSettings,
}

impl ChainSubmitter {
    pub fn new(contract: Arc<dyn FeeContract>, policy: RetryPolicy, settings: SubmitSettings) -> Self {
        Self {
            contract,
            guard: ResilienceGuard::new("submit", policy),
            settings,
        }
    }

    pub fn guard(&self) -> &ResilienceGuard {
        &self.guard
    }

    pub fn settings(&self) -> &SubmitSettings {
        &self.settings
    }

    /// Submit `rate` and return the terminal record
    ///
    /// Never fails: every outcome, including cancellation and an open
    /// circuit, ends in `Confirmed`, `Reverted` or `Abandoned`.
    pub async fn submit(
        &self,
        rate: &ComputedRate,
        logger: &CycleLogger,
        cancel: &CancellationToken,
    ) -> SubmissionRecord {
        let timer = Timer::new();
        let record = Mutex::new(SubmissionRecord::new(rate.clone()));
        let in_flight = Mutex::new(InFlight::default());
        let (record_ref, in_flight_ref) = (&record, &in_flight);
        let rate_bps = rate.rate_bps;

        let outcome = self
            .guard
            .execute(cancel, move |attempt| {
                self.attempt(attempt, rate_bps, record_ref, in_flight_ref, logger)
            })
            .await;

        let mut record = record.into_inner();
        match outcome {
            Ok(receipt) => {
                record.confirm(receipt.gas_used, receipt.block_number);
                metrics().submissions_confirmed.inc();
            }
            Err(GuardError::Permanent {
                error: ChainError::Reverted { tx, gas_used },
                ..
            }) => {
                record.revert(gas_used, format!("transaction {tx} reverted on chain"));
                metrics().submissions_reverted.inc();
            }
            Err(e) => {
                logger.warn(&format!("Submission abandoned: {e}"));
                record.abandon(e.to_cycle_error());
                metrics().submissions_abandoned.inc();
            }
        }

        timer.observe_duration(&metrics().submit_latency);
        logger.log_submission(&record, (timer.elapsed_secs() * 1000.0) as u64);
        record
    }

    async fn attempt(
        &self,
        attempt: u32,
        rate_bps: u32,
        record: &Mutex<SubmissionRecord>,
        in_flight: &Mutex<InFlight>,
        logger: &CycleLogger,
    ) -> Result<TxReceipt, ChainError> {
        record.lock().begin_attempt(attempt);
        metrics().submit_attempts.inc();

        let pinned = in_flight.lock().pinned();
        let (nonce, gas_price) = match pinned {
            // Nothing broadcast yet: the pending nonce is free to take
            None => {
                let nonce = self.contract.pending_nonce().await?;
                (nonce, self.contract.gas_price().await?)
            }
            // An earlier broadcast may still land; settle it or replace it
            Some((nonce, last_gas_price, txs)) => {
                if let Some(last) = txs.last() {
                    record.lock().mark_broadcast(last.clone());
                }
                if let Some((tx, receipt)) = self.find_included(&txs).await {
                    debug!(tx = %tx, attempt, "Earlier broadcast was included");
                    record.lock().mark_broadcast(tx.clone());
                    return settle(tx, receipt);
                }
                let current = self.contract.gas_price().await?;
                let gas_price = current.max(bump_gas_price(last_gas_price));
                debug!(nonce, gas_price = %gas_price, "Replacing unconfirmed transaction");
                (nonce, gas_price)
            }
        };

        if gas_price > self.settings.max_gas_price_wei {
            return Err(ChainError::GasPriceExceeded {
                current_wei: gas_price,
                max_wei: self.settings.max_gas_price_wei,
            });
        }

        let sent = self.contract.send_fee_update(rate_bps, nonce, gas_price).await;
        let (tx, txs) = {
            let mut in_flight = in_flight.lock();
            // An underpriced replacement still raises the floor for the next one
            if in_flight.nonce.is_some() {
                in_flight.gas_price = in_flight.gas_price.max(gas_price);
            }
            let tx = sent?;
            in_flight.track(nonce, gas_price, tx.clone());
            (tx, in_flight.txs.clone())
        };
        record.lock().mark_broadcast(tx.clone());
        logger.log_broadcast(attempt, nonce, &tx);

        let (tx, receipt) = self.await_receipt(&tx, &txs).await?;
        record.lock().mark_broadcast(tx.clone());
        settle(tx, receipt)
    }

    /// First receipt found among `txs`
    async fn find_included(&self, txs: &[TxHandle]) -> Option<(TxHandle, TxReceipt)> {
        for tx in txs {
            match self.contract.receipt(tx).await {
                Ok(Some(receipt)) => return Some((tx.clone(), receipt)),
                Ok(None) => debug!(tx = %tx, "Not yet included"),
                // Already broadcast; a flaky receipt call must not trigger a resend
                Err(e) => warn!(tx = %tx, error = %e, "Receipt poll failed"),
            }
        }
        None
    }

    /// Poll until one of `txs` is included or the confirmation window closes
    ///
    /// All of `txs` share a nonce, so at most one of them can be included.
    async fn await_receipt(
        &self,
        latest: &TxHandle,
        txs: &[TxHandle],
    ) -> Result<(TxHandle, TxReceipt), ChainError> {
        let window = self.settings.confirmation_timeout;
        let poll = async {
            loop {
                if let Some(included) = self.find_included(txs).await {
                    return included;
                }
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        };

        tokio::time::timeout(window, poll)
            .await
            .map_err(|_| ChainError::ConfirmationTimeout {
                tx: latest.clone(),
                waited: window,
            })
    }
}

/// Transactions broadcast for one submission
///
/// The first successful broadcast pins the nonce. Every later send reuses
/// it, so the fee can be applied at most once.
#[derive(Debug, Default)]
struct InFlight {
    nonce: Option<u64>,
    gas_price: u128,
    txs: Vec<TxHandle>,
}

impl InFlight {
    fn pinned(&self) -> Option<(u64, u128, Vec<TxHandle>)> {
        self.nonce.map(|nonce| (nonce, self.gas_price, self.txs.clone()))
    }

    fn track(&mut self, nonce: u64, gas_price: u128, tx: TxHandle) {
        self.nonce = Some(nonce);
        self.gas_price = self.gas_price.max(gas_price);
        self.txs.push(tx);
    }
}

/// Replacement price accepted by mempools: at least 10% above the original
fn bump_gas_price(previous: u128) -> u128 {
    previous.saturating_add(previous / 8).max(previous.saturating_add(1))
}

fn settle(tx: TxHandle, receipt: TxReceipt) -> Result<TxReceipt, ChainError> {
    if receipt.success {
        Ok(receipt)
    } else {
        Err(ChainError::Reverted {
            tx,
            gas_used: receipt.gas_used,
        })
    }
}
