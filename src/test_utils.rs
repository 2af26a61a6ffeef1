//! Test Utilities Module
//!
//! Scripted stand-ins for the network-facing seams: an index source that
//! replays canned pages or errors, a fee contract that replays broadcast and
//! receipt outcomes, and a recorder that keeps records in memory.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::chain::{ChainError, FeeContract, TxReceipt};
use crate::extractor::RawContent;
use crate::fetcher::{FetchError, IndexSource};
use crate::recorder::{CycleRecord, Recorder};
use crate::types::TxHandle;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// HTML page with the index in `td#price-value`
pub fn index_page(value_text: &str) -> String {
    format!(
        r#"<html><body><table><tr><td class="label">Index</td><td id="price-value">{value_text}</td></tr></table></body></html>"#
    )
}

/// Index source that replays a script, then repeats a fallback page
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<String, FetchError>>>,
    fallback: Option<String>,
    calls: Mutex<u32>,
    delay: Duration,
}

impl ScriptedSource {
    /// Always serves a page showing `value_text`
    pub fn serving(value_text: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(index_page(value_text)),
            calls: Mutex::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Replays `script` in order; fails with a timeout once it runs out
    pub fn scripted(script: Vec<Result<String, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: Mutex::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Each fetch takes `delay` (tokio time)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl IndexSource for ScriptedSource {
    async fn fetch(&self, endpoint: &str, _selector: &str) -> Result<RawContent, FetchError> {
        *self.calls.lock() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().pop_front();
        let body = match next {
            Some(result) => result?,
            None => match &self.fallback {
                Some(page) => page.clone(),
                None => {
                    return Err(FetchError::Timeout {
                        url: endpoint.to_string(),
                        timeout_ms: 30_000,
                    })
                }
            },
        };
        Ok(RawContent::new(endpoint, body, "scripted"))
    }
}

/// Outcome of one `send_fee_update` call on [`ScriptedContract`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Included and succeeded
    Confirm,
    /// Included and reverted
    Revert,
    /// Rejected by the node before broadcast
    BroadcastError(String),
    /// Broadcast but never included
    NeverIncluded,
    /// Broadcast, then included and succeeded once this much time has passed
    ConfirmAfter(Duration),
}

struct BroadcastTx {
    nonce: u64,
    gas_price: u128,
    outcome: SendOutcome,
    sent_at: Instant,
    replaced: bool,
}

impl BroadcastTx {
    fn is_included(&self) -> bool {
        if self.replaced {
            return false;
        }
        match &self.outcome {
            SendOutcome::Confirm | SendOutcome::Revert => true,
            SendOutcome::ConfirmAfter(after) => Instant::now() >= self.sent_at + *after,
            SendOutcome::NeverIncluded | SendOutcome::BroadcastError(_) => false,
        }
    }
}

#[derive(Default)]
struct ContractState {
    sends: VecDeque<SendOutcome>,
    txs: HashMap<TxHandle, BroadcastTx>,
    // live transaction per nonce, included or still in the mempool
    slots: BTreeMap<u64, TxHandle>,
    sent_rates: Vec<u32>,
    nonces_used: Vec<u64>,
    gas_prices_used: Vec<u128>,
    nonce_queries: u32,
    tx_counter: u64,
}

impl ContractState {
    fn pending_nonce(&self) -> u64 {
        self.slots.keys().next_back().map_or(0, |n| n + 1)
    }
}

/// Fee contract that replays scripted send outcomes
///
/// Sends beyond the script confirm. Behaves like a node mempool: every
/// broadcast occupies its nonce, so the pending nonce counts transactions
/// that are not yet included, and a second send at an occupied nonce
/// replaces the first only with a gas price at least 10% higher.
pub struct ScriptedContract {
    state: Mutex<ContractState>,
    gas_price: u128,
}

impl Default for ScriptedContract {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedContract {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ContractState::default()),
            gas_price: 20_000_000_000,
        }
    }

    pub fn with_sends(self, sends: Vec<SendOutcome>) -> Self {
        self.state.lock().sends = sends.into();
        self
    }

    pub fn with_gas_price(mut self, wei: u128) -> Self {
        self.gas_price = wei;
        self
    }

    /// Rates of every transaction that reached the node
    pub fn sent_rates(&self) -> Vec<u32> {
        self.state.lock().sent_rates.clone()
    }

    pub fn nonces_used(&self) -> Vec<u64> {
        self.state.lock().nonces_used.clone()
    }

    pub fn gas_prices_used(&self) -> Vec<u128> {
        self.state.lock().gas_prices_used.clone()
    }

    pub fn nonce_queries(&self) -> u32 {
        self.state.lock().nonce_queries
    }

    /// Transactions that are, or could still be, applied on chain
    pub fn live_transactions(&self) -> usize {
        self.state.lock().txs.values().filter(|tx| !tx.replaced).count()
    }
}

#[async_trait]
impl FeeContract for ScriptedContract {
    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(self.gas_price)
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        let mut state = self.state.lock();
        state.nonce_queries += 1;
        Ok(state.pending_nonce())
    }

    async fn send_fee_update(
        &self,
        rate_bps: u32,
        nonce: u64,
        gas_price: u128,
    ) -> Result<TxHandle, ChainError> {
        let mut state = self.state.lock();
        let outcome = state.sends.pop_front().unwrap_or(SendOutcome::Confirm);

        if let SendOutcome::BroadcastError(reason) = &outcome {
            return Err(ChainError::Broadcast { reason: reason.clone() });
        }
        let expected = state.pending_nonce();
        if nonce > expected {
            return Err(ChainError::Broadcast {
                reason: format!("nonce gap: got {nonce}, expected at most {expected}"),
            });
        }
        if let Some(previous) = state.slots.get(&nonce).and_then(|tx| state.txs.get(tx)) {
            if previous.is_included() {
                return Err(ChainError::Broadcast {
                    reason: format!("nonce too low: {nonce} already included"),
                });
            }
            if gas_price < previous.gas_price + previous.gas_price / 10 {
                return Err(ChainError::Broadcast {
                    reason: "replacement transaction underpriced".to_string(),
                });
            }
        }
        if let Some(previous) = state.slots.get(&nonce).cloned() {
            if let Some(previous) = state.txs.get_mut(&previous) {
                previous.replaced = true;
            }
        }

        state.tx_counter += 1;
        let tx = TxHandle::new(format!("0x{:064x}", state.tx_counter));
        state.sent_rates.push(rate_bps);
        state.nonces_used.push(nonce);
        state.gas_prices_used.push(gas_price);
        state.slots.insert(nonce, tx.clone());
        state.txs.insert(
            tx.clone(),
            BroadcastTx {
                nonce,
                gas_price,
                outcome,
                sent_at: Instant::now(),
                replaced: false,
            },
        );
        Ok(tx)
    }

    async fn receipt(&self, tx: &TxHandle) -> Result<Option<TxReceipt>, ChainError> {
        let state = self.state.lock();
        let receipt = state
            .txs
            .get(tx)
            .filter(|broadcast| broadcast.is_included())
            .map(|broadcast| TxReceipt {
                success: broadcast.outcome != SendOutcome::Revert,
                gas_used: Some(if broadcast.outcome == SendOutcome::Revert { 23_100 } else { 29_500 }),
                block_number: Some(1_000 + broadcast.nonce),
            });
        Ok(receipt)
    }
}

/// Keeps every record in memory
#[derive(Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<CycleRecord>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CycleRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn record(&self, record: &CycleRecord) -> anyhow::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
