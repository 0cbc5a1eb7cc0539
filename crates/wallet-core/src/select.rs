//! Coin selection.
//!
//! Candidates arrive in ledger preference order. The selector tries, in
//! order: a single coin that pays without change, the single largest coin,
//! then greedy accumulation in ledger order. Change below the dust threshold
//! is given to the fee instead of becoming an output.

use chain_bsv::transaction::estimate_fee;
use chain_bsv::{FeeRate, ScriptTemplate};

use crate::error::WalletError;
use crate::types::Utxo;

/// Fee and output shape the selector must account for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub fee_rate: FeeRate,
    pub dust_threshold: u64,
    /// Locking script length of each requested output.
    pub payment_script_lens: Vec<usize>,
    /// Locking script length of the change output, if one is made.
    pub change_script_len: usize,
}

impl SelectionPolicy {
    fn fee(&self, inputs: &[ScriptTemplate], with_change: bool) -> u64 {
        let mut lens = self.payment_script_lens.clone();
        if with_change {
            lens.push(self.change_script_len);
        }
        estimate_fee(inputs, &lens, self.fee_rate)
    }
}

/// Coins to spend, the fee they pay, and the change left over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub chosen: Vec<Utxo>,
    pub fee: u64,
    /// Zero when no change output is made.
    pub change: u64,
}

impl Selection {
    pub fn total_in(&self) -> u64 {
        self.chosen
            .iter()
            .fold(0u64, |acc, u| acc.saturating_add(u.value))
    }

    pub fn has_change(&self) -> bool {
        self.change > 0
    }
}

/// Choose coins from `available` to pay `target` plus fee.
pub fn select<'a, I>(
    available: I,
    target: u64,
    policy: &SelectionPolicy,
) -> Result<Selection, WalletError>
where
    I: IntoIterator<Item = &'a Utxo>,
{
    if target == 0 {
        return Err(WalletError::InvalidAmount("payment total must be positive".into()));
    }
    let candidates: Vec<&Utxo> = available.into_iter().collect();

    // A single coin whose excess is too small for change.
    let changeless = candidates
        .iter()
        .filter_map(|u| {
            let needed = target.checked_add(policy.fee(&[u.template], false))?;
            let excess = u.value.checked_sub(needed)?;
            (excess < policy.dust_threshold).then_some((excess, *u))
        })
        .min_by_key(|(excess, _)| *excess);
    if let Some((_, coin)) = changeless {
        return Ok(finish(vec![coin], target, policy));
    }

    // The single largest coin, first in ledger order on ties.
    if let Some(largest) = candidates.iter().rev().max_by_key(|u| u.value) {
        let needed = target.saturating_add(policy.fee(&[largest.template], true));
        if largest.value >= needed {
            return Ok(finish(vec![*largest], target, policy));
        }
    }

    let mut chosen: Vec<&Utxo> = Vec::new();
    let mut templates: Vec<ScriptTemplate> = Vec::new();
    let mut total: u64 = 0;
    for coin in candidates.iter().copied() {
        chosen.push(coin);
        templates.push(coin.template);
        total = total.saturating_add(coin.value);

        let with_change = target.saturating_add(policy.fee(&templates, true));
        let without_change = target.saturating_add(policy.fee(&templates, false));
        // Covered, but change would be dust or would not pay for itself.
        let fits_changeless = total >= without_change
            && (total < with_change || total - without_change < policy.dust_threshold);
        if total >= with_change || fits_changeless {
            return Ok(finish(chosen, target, policy));
        }
    }

    Err(WalletError::InsufficientFunds {
        available: total,
        required: target.saturating_add(policy.fee(&templates, false)),
    })
}

/// Split the excess of `chosen` over `target` into fee and change.
///
/// Callers guarantee the coins cover `target` plus the changeless fee.
fn finish(chosen: Vec<&Utxo>, target: u64, policy: &SelectionPolicy) -> Selection {
    let templates: Vec<ScriptTemplate> = chosen.iter().map(|u| u.template).collect();
    let total = chosen
        .iter()
        .fold(0u64, |acc, u| acc.saturating_add(u.value));
    let excess = total.saturating_sub(target);

    let fee_with_change = policy.fee(&templates, true);
    let (fee, change) = match excess.checked_sub(fee_with_change) {
        Some(change) if change >= policy.dust_threshold && change > 0 => (fee_with_change, change),
        _ => (excess, 0),
    };

    Selection {
        chosen: chosen.into_iter().cloned().collect(),
        fee,
        change,
    }
}
