//! Byte-granular transmit and receive credit bookkeeping
//!
//! One credit is permission to send one byte. The peer grants transmit
//! credits through its credit characteristic; the local side owes the peer
//! a grant for every byte drained from the receive buffer.
//!
//! # Wire format
//!
//! A credit grant is a single little-endian `u16`. Larger amounts are sent
//! as several consecutive grants.

/// Size of one encoded credit grant
pub const CREDIT_VALUE_LEN: usize = 2;

/// Encode a credit grant for the peer's credit characteristic
pub fn encode_credits(amount: u16) -> [u8; CREDIT_VALUE_LEN] {
    amount.to_le_bytes()
}

/// Decode a credit notification value
///
/// Returns `None` when the value is too short to hold a grant. Trailing
/// bytes are ignored.
pub fn decode_credits(value: &[u8]) -> Option<u16> {
    match value {
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

/// Credit ledger for one connection.
///
/// When credits are disabled the ledger is inert: every amount is sendable
/// and debits are ignored, leaving the MTU as the only limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreditLedger {
    enabled: bool,
    transmit: usize,
    owed: usize,
    credited_total: u64,
    debited_total: u64,
    granted_total: u64,
}

impl CreditLedger {
    /// Create a ledger with credits disabled
    pub const fn new() -> Self {
        Self {
            enabled: false,
            transmit: 0,
            owed: 0,
            credited_total: 0,
            debited_total: 0,
            granted_total: 0,
        }
    }

    /// Create a ledger with credits enabled and no transmit credits yet
    pub const fn enabled() -> Self {
        let mut ledger = Self::new();
        ledger.enabled = true;
        ledger
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Switch credit accounting on mid-session.
    ///
    /// Data already handed to the transport is not re-checked.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Credits currently available for transmission
    pub fn transmit_credits(&self) -> usize {
        self.transmit
    }

    /// Receive credit owed to the peer and not yet granted
    pub fn owed(&self) -> usize {
        self.owed
    }

    /// Total credits received from the peer since the ledger was reset
    pub fn credited_total(&self) -> u64 {
        self.credited_total
    }

    /// Total credits spent on transmitted bytes since the ledger was reset
    pub fn debited_total(&self) -> u64 {
        self.debited_total
    }

    /// Total credits granted to the peer since the ledger was reset
    pub fn granted_total(&self) -> u64 {
        self.granted_total
    }

    /// How much of `amount` may be sent right now
    pub fn can_send(&self, amount: usize) -> usize {
        if self.enabled {
            amount.min(self.transmit)
        } else {
            amount
        }
    }

    /// Spend credits on bytes the transport accepted.
    ///
    /// Callers gate every debit through [`can_send`](Self::can_send).
    pub fn debit(&mut self, amount: usize) {
        if !self.enabled {
            return;
        }
        debug_assert!(amount <= self.transmit, "debit exceeds transmit credits");
        let amount = amount.min(self.transmit);
        self.transmit -= amount;
        self.debited_total += amount as u64;
    }

    /// Add credits granted by the peer
    pub fn credit(&mut self, amount: usize) {
        self.transmit = self.transmit.saturating_add(amount);
        self.credited_total += amount as u64;
    }

    /// Record `amount` bytes of receive capacity to report to the peer
    pub fn grant(&mut self, amount: usize) {
        if self.enabled {
            self.owed = self.owed.saturating_add(amount);
        }
    }

    /// Next grant to put on the wire, if one is due.
    ///
    /// Owed credit below `threshold` is held back unless `force` is set, so
    /// that a slow reader does not turn every drained byte into a write.
    pub fn next_grant(&self, threshold: usize, force: bool) -> Option<u16> {
        if !self.enabled || self.owed == 0 {
            return None;
        }
        if self.owed < threshold && !force {
            return None;
        }
        Some(self.owed.min(u16::MAX as usize) as u16)
    }

    /// Mark a grant as delivered to the peer
    pub fn confirm_grant(&mut self, amount: u16) {
        let amount = (amount as usize).min(self.owed);
        self.owed -= amount;
        self.granted_total += amount as u64;
    }

    /// Zero every counter and disable credits
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
