//! UTXO ledger.
//!
//! Outputs are keyed by outpoint. A secondary index keeps them in spend
//! preference order: confirmed before unconfirmed, lower height first, then
//! the order in which the ledger first saw them.

use std::collections::{BTreeMap, HashMap};

use bitcoin::{Amount, OutPoint, Txid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::WalletError;
use crate::types::{outpoint_label, Utxo};

/// Ordering key: (height, or MAX when unconfirmed; insertion sequence).
type OrderKey = (u32, u64);

#[derive(Debug, Clone)]
struct Entry {
    utxo: Utxo,
    seq: u64,
}

impl Entry {
    fn order_key(&self) -> OrderKey {
        (self.utxo.confirmation.height().unwrap_or(u32::MAX), self.seq)
    }
}

/// What `record_output` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// What `mark_unconfirmed_reversal` undid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reversal {
    /// Outputs created by the dropped transaction, now removed.
    pub removed: Vec<OutPoint>,
    /// Outputs the dropped transaction had spent, now unspent again.
    pub restored: Vec<OutPoint>,
}

/// Serialized form of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub next_seq: u64,
    pub entries: Vec<LedgerRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub seq: u64,
    #[serde(flatten)]
    pub utxo: Utxo,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: HashMap<OutPoint, Entry>,
    order: BTreeMap<OrderKey, OutPoint>,
    next_seq: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.entries.get(outpoint).map(|e| &e.utxo)
    }

    /// Insert or refresh an output.
    ///
    /// Recording identical data twice is a no-op. A later report may confirm
    /// the output, move its confirmation height, or mark it spent. It may not
    /// change what the output is, and it may not un-spend it.
    pub fn record_output(&mut self, utxo: Utxo) -> Result<RecordOutcome, WalletError> {
        check_value(&utxo)?;
        let Some(existing) = self.entries.get(&utxo.outpoint).cloned() else {
            self.insert_new(utxo);
            return Ok(RecordOutcome::Inserted);
        };

        if !existing.utxo.same_output(&utxo) {
            return Err(WalletError::LedgerConsistency {
                outpoint: outpoint_label(&utxo.outpoint),
                reason: format!(
                    "reported as {} sat to {}, ledger has {} sat to {}",
                    utxo.value, utxo.script, existing.utxo.value, existing.utxo.script
                ),
            });
        }
        if existing.utxo.spent && !utxo.spent {
            return Err(WalletError::LedgerConsistency {
                outpoint: outpoint_label(&utxo.outpoint),
                reason: "spent output reported as unspent".into(),
            });
        }
        if existing.utxo == utxo {
            return Ok(RecordOutcome::Unchanged);
        }

        let old_key = existing.order_key();
        let mut updated = existing;
        updated.utxo.confirmation = utxo.confirmation;
        if utxo.spent && !updated.utxo.spent {
            updated.utxo.spent = true;
            updated.utxo.spent_by = utxo.spent_by;
        }
        self.reindex(old_key, updated);
        debug!(outpoint = %utxo.outpoint, "ledger: output updated");
        Ok(RecordOutcome::Updated)
    }

    /// Flip an output to spent. Already spent is a no-op.
    pub fn mark_spent(
        &mut self,
        outpoint: &OutPoint,
        spender: Option<Txid>,
    ) -> Result<(), WalletError> {
        let entry = self
            .entries
            .get_mut(outpoint)
            .ok_or_else(|| WalletError::UnknownUtxo(outpoint_label(outpoint)))?;
        if entry.utxo.spent {
            return Ok(());
        }
        entry.utxo.spent = true;
        entry.utxo.spent_by = spender;
        debug!(outpoint = %outpoint, spender = ?spender, "ledger: output spent");
        Ok(())
    }

    /// Undo the effects of a transaction that left the chain.
    ///
    /// Outputs it created are forgotten; outputs it spent become spendable.
    pub fn mark_unconfirmed_reversal(&mut self, txid: &Txid) -> Reversal {
        let mut reversal = Reversal::default();

        let created: Vec<OutPoint> = self
            .entries
            .keys()
            .filter(|op| op.txid == *txid)
            .copied()
            .collect();
        for outpoint in created {
            if let Some(entry) = self.entries.remove(&outpoint) {
                self.order.remove(&entry.order_key());
                if entry.utxo.spent {
                    warn!(outpoint = %outpoint, "ledger: removing output of dropped tx that was already spent");
                }
                reversal.removed.push(outpoint);
            }
        }

        for entry in self.entries.values_mut() {
            if entry.utxo.spent && entry.utxo.spent_by.as_ref() == Some(txid) {
                entry.utxo.spent = false;
                entry.utxo.spent_by = None;
                reversal.restored.push(entry.utxo.outpoint);
            }
        }

        reversal.removed.sort();
        reversal.restored.sort();
        if !reversal.removed.is_empty() || !reversal.restored.is_empty() {
            info!(
                %txid,
                removed = reversal.removed.len(),
                restored = reversal.restored.len(),
                "ledger: transaction reversed"
            );
        }
        reversal
    }

    /// Unspent outputs in spend preference order.
    ///
    /// The iterator is lazy and `Clone`, so callers can restart it.
    pub fn list_spendable(&self) -> impl Iterator<Item = &Utxo> + Clone + '_ {
        self.order
            .values()
            .filter_map(|op| self.entries.get(op))
            .map(|e| &e.utxo)
            .filter(|u| !u.spent)
    }

    /// Sum of unspent outputs with at least `min_confirmations` at `tip`.
    pub fn available_balance(&self, min_confirmations: u32, tip: u32) -> u64 {
        self.list_spendable()
            .filter(|u| u.confirmation.confirmations(tip) >= min_confirmations)
            .fold(0u64, |acc, u| acc.saturating_add(u.value))
    }

    /// Every output, spent or not, in preference order.
    pub fn iter(&self) -> impl Iterator<Item = &Utxo> + '_ {
        self.order
            .values()
            .filter_map(|op| self.entries.get(op))
            .map(|e| &e.utxo)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            next_seq: self.next_seq,
            entries: self
                .order
                .values()
                .filter_map(|op| self.entries.get(op))
                .map(|e| LedgerRecord {
                    seq: e.seq,
                    utxo: e.utxo.clone(),
                })
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, WalletError> {
        let mut ledger = Ledger {
            next_seq: snapshot.next_seq,
            ..Ledger::default()
        };
        for record in snapshot.entries {
            let outpoint = record.utxo.outpoint;
            check_value(&record.utxo)?;
            if record.seq >= snapshot.next_seq {
                return Err(WalletError::LedgerConsistency {
                    outpoint: outpoint_label(&outpoint),
                    reason: format!("sequence {} beyond next_seq {}", record.seq, snapshot.next_seq),
                });
            }
            let entry = Entry {
                utxo: record.utxo,
                seq: record.seq,
            };
            let key = entry.order_key();
            if ledger.entries.insert(outpoint, entry).is_some() || ledger.order.insert(key, outpoint).is_some() {
                return Err(WalletError::LedgerConsistency {
                    outpoint: outpoint_label(&outpoint),
                    reason: "duplicate entry in stored ledger".into(),
                });
            }
        }
        Ok(ledger)
    }

    fn insert_new(&mut self, utxo: Utxo) {
        let outpoint = utxo.outpoint;
        let entry = Entry {
            utxo,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.order.insert(entry.order_key(), outpoint);
        debug!(
            outpoint = %outpoint,
            value = entry.utxo.value,
            path = %entry.utxo.path,
            "ledger: output recorded"
        );
        self.entries.insert(outpoint, entry);
    }

    fn reindex(&mut self, old_key: OrderKey, entry: Entry) {
        self.order.remove(&old_key);
        self.order.insert(entry.order_key(), entry.utxo.outpoint);
        self.entries.insert(entry.utxo.outpoint, entry);
    }
}

/// Ledger state is compared by content, not by index layout.
impl PartialEq for Ledger {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

/// No single output can carry more than the money supply.
fn check_value(utxo: &Utxo) -> Result<(), WalletError> {
    if utxo.value > Amount::MAX_MONEY.to_sat() {
        return Err(WalletError::LedgerConsistency {
            outpoint: outpoint_label(&utxo.outpoint),
            reason: format!("value {} sat exceeds the money supply", utxo.value),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::keys::KeyPath;
    use crate::types::Confirmation;
    use bitcoin::hashes::Hash;
    use bitcoin::ScriptBuf;
    use chain_bsv::ScriptTemplate;

    pub(crate) fn txid(byte: u8) -> Txid {
        Txid::from_byte_array([byte; 32])
    }

    pub(crate) fn utxo(byte: u8, vout: u32, value: u64, confirmation: Confirmation) -> Utxo {
        Utxo {
            outpoint: OutPoint {
                txid: txid(byte),
                vout,
            },
            value,
            script: ScriptBuf::from_bytes(vec![0x51, byte]),
            path: format!("m/44'/236'/0'/0/{byte}").parse::<KeyPath>().unwrap(),
            template: ScriptTemplate::P2pkh,
            confirmation,
            spent: false,
            spent_by: None,
        }
    }

    fn confirmed(height: u32) -> Confirmation {
        Confirmation::Confirmed { height }
    }

    #[test]
    fn record_is_idempotent() {
        let mut ledger = Ledger::new();
        let u = utxo(1, 0, 1000, confirmed(10));
        assert_eq!(ledger.record_output(u.clone()).unwrap(), RecordOutcome::Inserted);
        let once = ledger.clone();
        assert_eq!(ledger.record_output(u).unwrap(), RecordOutcome::Unchanged);
        assert_eq!(ledger, once);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn conflicting_report_rejected() {
        let mut ledger = Ledger::new();
        ledger.record_output(utxo(1, 0, 1000, confirmed(10))).unwrap();
        let mut other = utxo(1, 0, 999, confirmed(10));
        other.script = ScriptBuf::from_bytes(vec![0x52]);
        let err = ledger.record_output(other).unwrap_err();
        assert!(matches!(err, WalletError::LedgerConsistency { .. }));
        assert_eq!(ledger.get(&utxo(1, 0, 0, confirmed(0)).outpoint).unwrap().value, 1000);
    }

    #[test]
    fn spent_cannot_be_reported_unspent() {
        let mut ledger = Ledger::new();
        let u = utxo(2, 1, 500, confirmed(5));
        ledger.record_output(u.clone()).unwrap();
        ledger.mark_spent(&u.outpoint, Some(txid(9))).unwrap();
        let err = ledger.record_output(u.clone()).unwrap_err();
        assert!(err.to_string().contains("spent output reported as unspent"));
        assert!(ledger.get(&u.outpoint).unwrap().spent);
    }

    #[test]
    fn confirmation_update_reorders() {
        let mut ledger = Ledger::new();
        let a = utxo(1, 0, 100, Confirmation::Unconfirmed);
        let b = utxo(2, 0, 200, confirmed(50));
        ledger.record_output(a.clone()).unwrap();
        ledger.record_output(b.clone()).unwrap();
        let order: Vec<u64> = ledger.list_spendable().map(|u| u.value).collect();
        assert_eq!(order, vec![200, 100]);

        let mut a_conf = a;
        a_conf.confirmation = confirmed(40);
        assert_eq!(ledger.record_output(a_conf).unwrap(), RecordOutcome::Updated);
        let order: Vec<u64> = ledger.list_spendable().map(|u| u.value).collect();
        assert_eq!(order, vec![100, 200]);
    }

    #[test]
    fn spendable_order_height_then_insertion() {
        let mut ledger = Ledger::new();
        ledger.record_output(utxo(1, 0, 1, confirmed(20))).unwrap();
        ledger.record_output(utxo(2, 0, 2, confirmed(10))).unwrap();
        ledger.record_output(utxo(3, 0, 3, confirmed(20))).unwrap();
        ledger.record_output(utxo(4, 0, 4, Confirmation::Unconfirmed)).unwrap();
        let order: Vec<u64> = ledger.list_spendable().map(|u| u.value).collect();
        assert_eq!(order, vec![2, 1, 3, 4]);
    }

    #[test]
    fn list_spendable_is_restartable() {
        let mut ledger = Ledger::new();
        ledger.record_output(utxo(1, 0, 10, confirmed(1))).unwrap();
        ledger.record_output(utxo(2, 0, 20, confirmed(2))).unwrap();
        let mut iter = ledger.list_spendable();
        let again = iter.clone();
        assert_eq!(iter.next().map(|u| u.value), Some(10));
        assert_eq!(again.map(|u| u.value).collect::<Vec<_>>(), vec![10, 20]);
    }

    #[test]
    fn mark_spent_unknown_fails() {
        let mut ledger = Ledger::new();
        let err = ledger
            .mark_spent(&utxo(7, 0, 1, confirmed(1)).outpoint, None)
            .unwrap_err();
        assert!(matches!(err, WalletError::UnknownUtxo(_)));
    }

    #[test]
    fn mark_spent_twice_is_noop() {
        let mut ledger = Ledger::new();
        let u = utxo(1, 0, 10, confirmed(1));
        ledger.record_output(u.clone()).unwrap();
        ledger.mark_spent(&u.outpoint, Some(txid(8))).unwrap();
        let once = ledger.clone();
        ledger.mark_spent(&u.outpoint, Some(txid(9))).unwrap();
        assert_eq!(ledger, once);
        assert_eq!(ledger.get(&u.outpoint).unwrap().spent_by, Some(txid(8)));
        assert_eq!(ledger.list_spendable().count(), 0);
    }

    #[test]
    fn balance_respects_confirmations() {
        let mut ledger = Ledger::new();
        ledger.record_output(utxo(1, 0, 1000, confirmed(100))).unwrap();
        ledger.record_output(utxo(2, 0, 300, confirmed(104))).unwrap();
        ledger.record_output(utxo(3, 0, 50, Confirmation::Unconfirmed)).unwrap();
        assert_eq!(ledger.available_balance(0, 105), 1350);
        assert_eq!(ledger.available_balance(1, 105), 1300);
        assert_eq!(ledger.available_balance(6, 105), 1000);
        assert_eq!(ledger.available_balance(7, 105), 0);
    }

    #[test]
    fn reversal_restores_and_removes() {
        let mut ledger = Ledger::new();
        let input = utxo(1, 0, 1000, confirmed(10));
        let change = utxo(9, 1, 380, Confirmation::Unconfirmed);
        ledger.record_output(input.clone()).unwrap();
        ledger.mark_spent(&input.outpoint, Some(txid(9))).unwrap();
        ledger.record_output(change.clone()).unwrap();

        let reversal = ledger.mark_unconfirmed_reversal(&txid(9));
        assert_eq!(reversal.removed, vec![change.outpoint]);
        assert_eq!(reversal.restored, vec![input.outpoint]);
        assert!(ledger.get(&change.outpoint).is_none());
        assert!(!ledger.get(&input.outpoint).unwrap().spent);
        assert_eq!(ledger.available_balance(1, 10), 1000);

        // Re-recording after reversal is allowed again.
        ledger.mark_spent(&input.outpoint, Some(txid(10))).unwrap();
        assert!(ledger.mark_unconfirmed_reversal(&txid(9)).removed.is_empty());
    }

    #[test]
    fn snapshot_roundtrip_preserves_order() {
        let mut ledger = Ledger::new();
        ledger.record_output(utxo(1, 0, 1, confirmed(30))).unwrap();
        ledger.record_output(utxo(2, 0, 2, confirmed(10))).unwrap();
        ledger.mark_spent(&utxo(2, 0, 2, confirmed(10)).outpoint, None).unwrap();

        let json = serde_json::to_string(&ledger.snapshot()).unwrap();
        let restored = Ledger::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored, ledger);

        // New outputs continue the sequence.
        let mut restored = restored;
        restored.record_output(utxo(3, 0, 3, confirmed(30))).unwrap();
        let order: Vec<u64> = restored.iter().map(|u| u.value).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn corrupt_snapshot_rejected() {
        let snapshot = LedgerSnapshot {
            next_seq: 1,
            entries: vec![
                LedgerRecord { seq: 0, utxo: utxo(1, 0, 1, confirmed(1)) },
                LedgerRecord { seq: 0, utxo: utxo(1, 0, 1, confirmed(1)) },
            ],
        };
        assert!(Ledger::from_snapshot(snapshot).is_err());
    }

    #[test]
    fn value_above_money_supply_rejected() {
        let max = Amount::MAX_MONEY.to_sat();
        let mut ledger = Ledger::new();
        let err = ledger
            .record_output(utxo(1, 0, max + 1, confirmed(1)))
            .unwrap_err();
        assert!(matches!(err, WalletError::LedgerConsistency { .. }));
        assert!(ledger.is_empty());

        ledger.record_output(utxo(2, 0, max, confirmed(1))).unwrap();
        ledger.record_output(utxo(3, 0, max, confirmed(1))).unwrap();
        assert_eq!(ledger.available_balance(0, 1), 2 * max);
    }

    #[test]
    fn stored_ledger_value_checked() {
        let snapshot = LedgerSnapshot {
            next_seq: 1,
            entries: vec![LedgerRecord { seq: 0, utxo: utxo(1, 0, u64::MAX, confirmed(1)) }],
        };
        assert!(matches!(
            Ledger::from_snapshot(snapshot),
            Err(WalletError::LedgerConsistency { .. })
        ));
    }
}
