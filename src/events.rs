//! Outbound event records.
//!
//! Every state-changing operation appends a record to an append-only log
//! and publishes it on a broadcast channel. Dashboards and indexers
//! subscribe to the channel; the core never depends on anything reading it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::types::{Amount, Principal, VenueId};

/// Broadcast channel capacity. Slow subscribers that fall further behind
/// than this observe a `Lagged` error and must re-read from the log.
const CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// Records emitted by the vault, policy store, and rebalance engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VaultEvent {
    Deposit {
        sender: Principal,
        owner: Principal,
        assets: Amount,
        shares: Amount,
    },
    Withdraw {
        sender: Principal,
        receiver: Principal,
        owner: Principal,
        assets: Amount,
        shares: Amount,
    },
    Rebalanced {
        from_venue: VenueId,
        to_venue: VenueId,
        amount: Amount,
    },
    RebalanceTriggered {
        apy_a_bps: u64,
        apy_b_bps: u64,
        divergence_bps: u64,
    },
    ConfigUpdated {
        field: String,
        value: String,
    },
    UserAuthorized {
        principal: Principal,
    },
    UserDeauthorized {
        principal: Principal,
    },
}

impl fmt::Display for VaultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultEvent::Deposit {
                sender,
                owner,
                assets,
                shares,
            } => write!(f, "Deposit sender={sender} owner={owner} assets={assets} shares={shares}"),
            VaultEvent::Withdraw {
                sender,
                receiver,
                owner,
                assets,
                shares,
            } => write!(
                f,
                "Withdraw sender={sender} receiver={receiver} owner={owner} assets={assets} shares={shares}"
            ),
            VaultEvent::Rebalanced {
                from_venue,
                to_venue,
                amount,
            } => write!(f, "Rebalanced {from_venue} -> {to_venue} amount={amount}"),
            VaultEvent::RebalanceTriggered {
                apy_a_bps,
                apy_b_bps,
                divergence_bps,
            } => write!(
                f,
                "RebalanceTriggered A={apy_a_bps}bps B={apy_b_bps}bps diff={divergence_bps}bps"
            ),
            VaultEvent::ConfigUpdated { field, value } => {
                write!(f, "ConfigUpdated {field}={value}")
            }
            VaultEvent::UserAuthorized { principal } => write!(f, "UserAuthorized {principal}"),
            VaultEvent::UserDeauthorized { principal } => {
                write!(f, "UserDeauthorized {principal}")
            }
        }
    }
}

/// An event with its position in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: VaultEvent,
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Append-only event log with broadcast fan-out.
pub struct EventLog {
    records: Mutex<Vec<EventRecord>>,
    tx: broadcast::Sender<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            records: Mutex::new(Vec::new()),
            tx,
        }
    }

    /// Append an event and notify subscribers. Returns the assigned
    /// sequence number. A send with no live subscribers is not an error.
    pub fn emit(&self, event: VaultEvent) -> u64 {
        let mut records = self.records.lock().expect("event log poisoned");
        let seq = records.len() as u64;
        let record = EventRecord {
            seq,
            timestamp: Utc::now(),
            event,
        };
        records.push(record.clone());
        drop(records);

        let _ = self.tx.send(record);
        seq
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    /// All records emitted so far.
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.records.lock().expect("event log poisoned").clone()
    }

    /// Records with `seq >= since`.
    pub fn since(&self, since: u64) -> Vec<EventRecord> {
        self.records
            .lock()
            .expect("event log poisoned")
            .iter()
            .filter(|r| r.seq >= since)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("event log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
