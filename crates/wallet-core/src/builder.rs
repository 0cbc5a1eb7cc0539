use std::collections::HashSet;

use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Transaction, TxOut};
use chain_bsv::transaction::build_unsigned;

use crate::error::WalletError;
use crate::types::Utxo;

/// The wallet's change output within a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutput {
    pub vout: u32,
    pub value: u64,
    pub script: ScriptBuf,
}

/// A transaction skeleton with empty unlocking scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    /// The coins spent, in input order.
    pub inputs: Vec<Utxo>,
    pub fee: u64,
    pub change: Option<ChangeOutput>,
}

/// Assemble inputs, requested outputs and change into an unsigned transaction.
///
/// Input order follows `chosen`; requested outputs come first in the given
/// order and change, when non-zero, is appended last. Inputs must equal
/// outputs plus `fee` exactly.
pub fn build(
    chosen: &[Utxo],
    outputs: &[(ScriptBuf, u64)],
    change_script: &Script,
    change_value: u64,
    fee: u64,
    lock_time: u32,
) -> Result<UnsignedTransaction, WalletError> {
    if outputs.is_empty() {
        return Err(WalletError::InvalidAmount("at least one output is required".into()));
    }
    if let Some((script, _)) = outputs.iter().find(|(_, value)| *value == 0) {
        return Err(WalletError::InvalidAmount(format!(
            "zero-value output to {script}"
        )));
    }

    let inputs_total = checked_sum(chosen.iter().map(|u| u.value));
    let outputs_total = checked_sum(
        outputs
            .iter()
            .map(|(_, v)| *v)
            .chain(std::iter::once(change_value)),
    );
    let balanced = match (inputs_total, outputs_total) {
        (Some(i), Some(o)) => o.checked_add(fee) == Some(i),
        _ => false,
    };
    let mut seen = HashSet::new();
    let distinct = chosen.iter().all(|u| seen.insert(u.outpoint));
    if chosen.is_empty() || !balanced || !distinct {
        return Err(WalletError::ValueConservation {
            inputs: inputs_total.unwrap_or(u64::MAX),
            outputs: outputs_total.unwrap_or(u64::MAX),
            fee,
        });
    }

    let mut tx_outputs: Vec<TxOut> = outputs
        .iter()
        .map(|(script, value)| TxOut {
            value: Amount::from_sat(*value),
            script_pubkey: script.clone(),
        })
        .collect();

    let change = if change_value > 0 {
        let vout = u32::try_from(tx_outputs.len())
            .map_err(|_| WalletError::InvalidAmount("too many outputs".into()))?;
        tx_outputs.push(TxOut {
            value: Amount::from_sat(change_value),
            script_pubkey: change_script.to_owned(),
        });
        Some(ChangeOutput {
            vout,
            value: change_value,
            script: change_script.to_owned(),
        })
    } else {
        None
    };

    let outpoints: Vec<OutPoint> = chosen.iter().map(|u| u.outpoint).collect();
    let tx = build_unsigned(&outpoints, tx_outputs, lock_time);

    Ok(UnsignedTransaction {
        tx,
        inputs: chosen.to_vec(),
        fee,
        change,
    })
}

fn checked_sum(values: impl Iterator<Item = u64>) -> Option<u64> {
    values.into_iter().try_fold(0u64, |acc, v| acc.checked_add(v))
}
