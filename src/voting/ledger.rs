//! Contribution ledger for one ability offering
//!
//! Every contribution is applied under a single lock, so the order in which
//! contributions land is a total order and exactly one contribution can
//! push the cumulative total past the target. The target itself decays under
//! the same lock, so a price tick and a contribution never both close it.

use hashbrown::HashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::game::types::PlayerId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger is closed")]
    Closed,
    #[error("Contribution must be positive, got {0}")]
    NonPositive(Decimal),
}

/// Result of an accepted contribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributionReceipt {
    /// Position in the ledger's arrival order (1-based)
    pub sequence: u64,
    pub amount: Decimal,
    pub cumulative: Decimal,
    pub player_total: Decimal,
    /// This contribution crossed the target and closed the ledger
    pub winning: bool,
}

/// The contribution that crossed the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WinningContribution {
    pub player_id: PlayerId,
    pub sequence: u64,
    pub amount: Decimal,
    pub cumulative: Decimal,
}

/// Result of one price tick on an open ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceMove {
    pub target: Decimal,
    /// The target fell to the funded total and closed the ledger
    pub crossed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub target: Decimal,
    pub cumulative: Decimal,
    pub contributors: usize,
    pub closed: bool,
}

#[derive(Debug)]
struct LedgerState {
    target: Decimal,
    cumulative: Decimal,
    sequence: u64,
    // Player totals plus the sequence of their first contribution for tie breaks
    totals: HashMap<PlayerId, (Decimal, u64)>,
    closed: bool,
    winner: Option<WinningContribution>,
}

#[derive(Debug)]
pub struct ContributionLedger {
    state: Mutex<LedgerState>,
}

impl ContributionLedger {
    pub fn new(target: Decimal) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                target,
                cumulative: Decimal::ZERO,
                sequence: 0,
                totals: HashMap::new(),
                closed: false,
                winner: None,
            }),
        }
    }

    /// Add `amount` from `player`
    pub fn contribute(
        &self,
        player: PlayerId,
        amount: Decimal,
    ) -> Result<ContributionReceipt, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositive(amount));
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(LedgerError::Closed);
        }

        state.sequence += 1;
        let sequence = state.sequence;
        state.cumulative += amount;
        let cumulative = state.cumulative;

        let entry = state.totals.entry(player).or_insert((Decimal::ZERO, sequence));
        entry.0 += amount;
        let player_total = entry.0;

        let winning = cumulative >= state.target;
        if winning {
            state.closed = true;
            state.winner = Some(WinningContribution {
                player_id: player,
                sequence,
                amount,
                cumulative,
            });
        }

        Ok(ContributionReceipt {
            sequence,
            amount,
            cumulative,
            player_total,
            winning,
        })
    }

    /// Scale the target by `rate`, never below `floor`
    ///
    /// `None` once the ledger is closed. A funded ledger whose target drops
    /// to its cumulative total closes with no winning contribution.
    pub fn decay(&self, rate: Decimal, floor: Decimal) -> Option<PriceMove> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }

        let scaled = state.target.checked_mul(rate).unwrap_or(state.target);
        state.target = scaled.max(floor);
        let crossed = state.cumulative > Decimal::ZERO && state.target <= state.cumulative;
        if crossed {
            state.closed = true;
        }
        Some(PriceMove {
            target: state.target,
            crossed,
        })
    }

    /// Close without a winner. Returns false if already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.closed, true)
    }

    /// Clear all contributions and reopen with a new target
    pub fn reset(&self, target: Decimal) {
        let mut state = self.state.lock();
        state.target = target;
        state.cumulative = Decimal::ZERO;
        state.sequence = 0;
        state.totals.clear();
        state.closed = false;
        state.winner = None;
    }

    pub fn target(&self) -> Decimal {
        self.state.lock().target
    }

    pub fn winner(&self) -> Option<WinningContribution> {
        self.state.lock().winner.clone()
    }

    pub fn cumulative(&self) -> Decimal {
        self.state.lock().cumulative
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().sequence == 0
    }

    pub fn player_total(&self, player: PlayerId) -> Decimal {
        self.state
            .lock()
            .totals
            .get(&player)
            .map(|(total, _)| *total)
            .unwrap_or(Decimal::ZERO)
    }

    /// Contributors by total, largest first; earlier arrival wins ties
    pub fn ranked_contributors(&self) -> Vec<(PlayerId, Decimal)> {
        let state = self.state.lock();
        let mut ranked: Vec<(PlayerId, Decimal, u64)> = state
            .totals
            .iter()
            .map(|(player, (total, first))| (*player, *total, *first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked.into_iter().map(|(p, t, _)| (p, t)).collect()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.lock();
        LedgerSnapshot {
            target: state.target,
            cumulative: state.cumulative,
            contributors: state.totals.len(),
            closed: state.closed,
        }
    }
}
