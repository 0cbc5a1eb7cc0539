//! Wallet façade.
//!
//! Composes keys, ledger, selection, building and signing behind one
//! mutex-protected state. Spending is two-phase: `pay` reserves coins and
//! returns a signed transaction without touching the ledger, and
//! `confirm_broadcast` commits the spend once the transport accepted it.

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bitcoin::{OutPoint, ScriptBuf, Txid};
use chain_bsv::script::P2PKH_SCRIPT_LEN;
use chain_bsv::{address, BsvNetwork, FeeRate, ScriptTemplate};
use parking_lot::{Mutex, MutexGuard};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::builder::build;
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::keys::{AddressCounters, KeyPath, Keychain, MAX_INDEX};
use crate::ledger::{Ledger, LedgerSnapshot, RecordOutcome, Reversal};
use crate::mnemonic::{mnemonic_from_entropy, mnemonic_to_seed, ZeroizingMnemonic};
use crate::restore::{self, AddressHistory, RestoreSummary};
use crate::seed_encryption::{decrypt_seed, deserialize_encrypted_seed, encrypt_seed, serialize_encrypted_seed};
use crate::select::{select, SelectionPolicy};
use crate::signer::{sign, SignedTransaction};
use crate::store::{load_json, save_json, WalletStore, CONFIG_KEY, COUNTERS_KEY, LEDGER_KEY, SEED_KEY};
use crate::types::{
    outpoint_label, Confirmation, IncomingOutput, PaymentRequest, Purpose, ReceiveAddress, Utxo,
};

/// Lifecycle state visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletStatus {
    /// No seed yet; only creation and import are allowed.
    Uninitialized,
    Ready,
}

/// Identity the stored records belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoredIdentity {
    network: BsvNetwork,
    account: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredLedger {
    tip: u32,
    ledger: LedgerSnapshot,
}

#[derive(Debug, Clone)]
struct PendingChange {
    index: u32,
    path: KeyPath,
    vout: u32,
    value: u64,
    script: ScriptBuf,
}

/// Coins held back for a payment between `pay` and its resolution.
#[derive(Debug, Clone)]
struct Reservation {
    token: u64,
    /// Set once the transaction is signed.
    txid: Option<Txid>,
    inputs: Vec<OutPoint>,
    change: Option<PendingChange>,
}

#[derive(Debug, Default)]
struct Dirty {
    counters: bool,
    ledger: bool,
}

struct State {
    keychain: Option<Arc<Keychain>>,
    counters: AddressCounters,
    ledger: Ledger,
    tip: u32,
    /// Scripts the wallet recognises as its own.
    owned: HashMap<ScriptBuf, (KeyPath, ScriptTemplate)>,
    /// Per chain, first index not yet in `owned`.
    watched: [u32; 2],
    reservations: Vec<Reservation>,
    next_token: u64,
    dirty: Dirty,
}

impl State {
    fn empty() -> Self {
        Self {
            keychain: None,
            counters: AddressCounters::default(),
            ledger: Ledger::new(),
            tip: 0,
            owned: HashMap::new(),
            watched: [0, 0],
            reservations: Vec::new(),
            next_token: 0,
            dirty: Dirty::default(),
        }
    }

    fn keychain(&self) -> Result<Arc<Keychain>, WalletError> {
        self.keychain.clone().ok_or(WalletError::NotInitialized)
    }

    /// Recognise every allocated address plus `gap_limit` beyond it.
    fn extend_watch(&mut self, gap_limit: u32) -> Result<(), WalletError> {
        let keychain = self.keychain()?;
        for purpose in Purpose::ALL {
            let slot = purpose.chain_index() as usize;
            let upto = self
                .counters
                .peek(purpose)
                .saturating_add(gap_limit)
                .min(MAX_INDEX + 1);
            for index in self.watched[slot]..upto {
                let path = keychain.path(purpose, index)?;
                for template in ScriptTemplate::ALL {
                    let script = keychain.locking_script(&path, template)?;
                    self.owned.insert(script, (path.clone(), template));
                }
            }
            self.watched[slot] = self.watched[slot].max(upto);
        }
        Ok(())
    }

    fn reserved_outpoints(&self) -> HashSet<OutPoint> {
        self.reservations
            .iter()
            .flat_map(|r| r.inputs.iter().copied())
            .collect()
    }

    /// Change index for a new payment, skipping ones held by reservations.
    fn next_change_index(&self) -> u32 {
        self.reservations
            .iter()
            .filter_map(|r| r.change.as_ref().map(|c| c.index.saturating_add(1)))
            .fold(self.counters.change, u32::max)
    }

    fn release(&mut self, token: u64) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.token == token)?;
        Some(self.reservations.remove(pos))
    }

    fn find_payment(&self, txid: &Txid) -> Result<usize, WalletError> {
        self.reservations
            .iter()
            .position(|r| r.txid.as_ref() == Some(txid))
            .ok_or_else(|| WalletError::UnknownPayment(txid.to_string()))
    }

    fn flush(&mut self, store: &dyn WalletStore) -> Result<(), WalletError> {
        if self.dirty.counters {
            save_json(store, COUNTERS_KEY, &self.counters)?;
            self.dirty.counters = false;
        }
        if self.dirty.ledger {
            let stored = StoredLedger {
                tip: self.tip,
                ledger: self.ledger.snapshot(),
            };
            save_json(store, LEDGER_KEY, &stored)?;
            self.dirty.ledger = false;
        }
        Ok(())
    }
}

/// Exclusive access to the state. Dirty records are written when the
/// guard goes away, whether the operation succeeded or not.
struct StateGuard<'a> {
    state: MutexGuard<'a, State>,
    store: &'a dyn WalletStore,
}

impl StateGuard<'_> {
    /// Flush now and report storage failures to the caller.
    fn commit(mut self) -> Result<(), WalletError> {
        let store = self.store;
        self.state.flush(store)
    }
}

impl Deref for StateGuard<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut State {
        &mut self.state
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        let store = self.store;
        if let Err(e) = self.state.flush(store) {
            error!(error = %e, "wallet: flush failed");
        }
    }
}

/// A single wallet instance. Share it across threads with `Arc`.
pub struct Wallet {
    store: Arc<dyn WalletStore>,
    config: WalletConfig,
    password: SecretString,
    state: Mutex<State>,
}

impl Wallet {
    /// Open the wallet kept in `store`, or an uninitialized one if the store
    /// holds no seed yet.
    pub fn open(
        store: Arc<dyn WalletStore>,
        config: WalletConfig,
        password: &str,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        let mut state = State::empty();

        if let Some(envelope) = store.get(SEED_KEY)? {
            let identity: Option<StoredIdentity> = load_json(&*store, CONFIG_KEY)?;
            let expected = StoredIdentity {
                network: config.network,
                account: config.account,
            };
            if let Some(identity) = identity {
                if identity != expected {
                    return Err(WalletError::InvalidConfig(format!(
                        "store holds a {} wallet for account {}, config asks for {} account {}",
                        identity.network, identity.account, config.network, config.account
                    )));
                }
            }

            let json = String::from_utf8(envelope)
                .map_err(|e| WalletError::Serialization(format!("record {SEED_KEY}: {e}")))?;
            let seed = decrypt_seed(&deserialize_encrypted_seed(&json)?, password.as_bytes())?;
            state.keychain = Some(Arc::new(Keychain::new(&seed, config.network, config.account)?));

            state.counters = load_json(&*store, COUNTERS_KEY)?.unwrap_or_default();
            let stored: StoredLedger = load_json(&*store, LEDGER_KEY)?.unwrap_or_default();
            state.tip = stored.tip;
            state.ledger = Ledger::from_snapshot(stored.ledger)?;
            state.extend_watch(config.gap_limit)?;

            info!(
                network = %config.network,
                account = config.account,
                utxos = state.ledger.len(),
                tip = state.tip,
                "wallet: opened"
            );
        } else {
            info!(network = %config.network, "wallet: opened uninitialized");
        }

        Ok(Self {
            store,
            config,
            password: SecretString::from(password.to_string()),
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn status(&self) -> WalletStatus {
        if self.state.lock().keychain.is_some() {
            WalletStatus::Ready
        } else {
            WalletStatus::Uninitialized
        }
    }

    fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            state: self.state.lock(),
            store: &*self.store,
        }
    }

    // ---- creation ----------------------------------------------------------

    /// Create a wallet from fresh entropy. Returns the mnemonic for backup.
    pub fn create_wallet(&self, entropy: &[u8]) -> Result<ZeroizingMnemonic, WalletError> {
        self.create_wallet_with_passphrase(entropy, "")
    }

    pub fn create_wallet_with_passphrase(
        &self,
        entropy: &[u8],
        passphrase: &str,
    ) -> Result<ZeroizingMnemonic, WalletError> {
        let mnemonic = mnemonic_from_entropy(entropy)?;
        let seed = mnemonic.to_seed(passphrase)?;
        self.initialize(&seed)?;
        Ok(mnemonic)
    }

    /// Restore from a BIP-39 phrase. Run [`Wallet::restore`] afterwards to
    /// find addresses already in use.
    pub fn import_mnemonic(&self, phrase: &str, passphrase: &str) -> Result<(), WalletError> {
        let seed = mnemonic_to_seed(phrase, passphrase)?;
        self.initialize(&seed)
    }

    /// Import raw seed bytes (16 to 64 bytes).
    pub fn import_wallet(&self, seed: &[u8]) -> Result<(), WalletError> {
        self.initialize(seed)
    }

    fn initialize(&self, seed: &[u8]) -> Result<(), WalletError> {
        let mut state = self.lock();
        if state.keychain.is_some() {
            return Err(WalletError::AlreadyInitialized);
        }
        let keychain = Keychain::new(seed, self.config.network, self.config.account)?;

        let envelope = encrypt_seed(
            seed,
            self.password.expose_secret().as_bytes(),
            &self.config.kdf,
        )?;
        let identity = StoredIdentity {
            network: self.config.network,
            account: self.config.account,
        };
        self.store
            .put(SEED_KEY, serialize_encrypted_seed(&envelope)?.as_bytes())?;
        save_json(&*self.store, CONFIG_KEY, &identity)?;

        state.keychain = Some(Arc::new(keychain));
        state.counters = AddressCounters::default();
        state.ledger = Ledger::new();
        state.tip = 0;
        state.owned.clear();
        state.watched = [0, 0];
        state.dirty = Dirty {
            counters: true,
            ledger: true,
        };
        state.extend_watch(self.config.gap_limit)?;

        info!(network = %self.config.network, account = self.config.account, "wallet: initialized");
        state.commit()
    }

    // ---- addresses ---------------------------------------------------------

    /// Allocate the next receive address. Never returns the same path twice.
    pub fn next_receive_address(&self) -> Result<ReceiveAddress, WalletError> {
        let mut state = self.lock();
        let keychain = state.keychain()?;

        // Derive first so a failure leaves the counter where it was.
        let index = state.counters.peek(Purpose::Receive);
        let path = keychain.path(Purpose::Receive, index)?;
        let script = keychain.locking_script(&path, ScriptTemplate::P2pkh)?;
        let address = keychain.address(&path)?;
        state.counters.allocate(Purpose::Receive)?;
        state.dirty.counters = true;
        state.extend_watch(self.config.gap_limit)?;

        debug!(%path, %address, "wallet: receive address allocated");
        state.commit()?;
        Ok(ReceiveAddress {
            address,
            path,
            script,
        })
    }

    // ---- queries -----------------------------------------------------------

    /// Unspent value with at least `min_confirmations`.
    pub fn balance(&self, min_confirmations: u32) -> Result<u64, WalletError> {
        let state = self.state.lock();
        state.keychain()?;
        Ok(state.ledger.available_balance(min_confirmations, state.tip))
    }

    /// Every ledger entry, spent or not, in spend preference order.
    pub fn utxos(&self) -> Result<Vec<Utxo>, WalletError> {
        let state = self.state.lock();
        state.keychain()?;
        Ok(state.ledger.iter().cloned().collect())
    }

    pub fn chain_tip(&self) -> Result<u32, WalletError> {
        let state = self.state.lock();
        state.keychain()?;
        Ok(state.tip)
    }

    /// Signed payments awaiting `confirm_broadcast` or `abandon_payment`.
    pub fn pending_payments(&self) -> Result<Vec<Txid>, WalletError> {
        let state = self.state.lock();
        state.keychain()?;
        Ok(state.reservations.iter().filter_map(|r| r.txid).collect())
    }

    pub fn is_owned_script(&self, script: &ScriptBuf) -> Result<bool, WalletError> {
        let state = self.state.lock();
        state.keychain()?;
        Ok(state.owned.contains_key(script))
    }

    // ---- spending ----------------------------------------------------------

    /// Build and sign a payment.
    ///
    /// The ledger is not modified. The chosen coins stay reserved until the
    /// caller resolves the payment with [`Wallet::confirm_broadcast`] or
    /// [`Wallet::abandon_payment`].
    pub fn pay(&self, request: PaymentRequest) -> Result<SignedTransaction, WalletError> {
        if request.destination.is_empty() {
            return Err(WalletError::InvalidAmount("empty destination script".into()));
        }
        if request.value < self.config.dust_threshold {
            return Err(WalletError::InvalidAmount(format!(
                "payment of {} sat is below the dust threshold of {} sat",
                request.value, self.config.dust_threshold
            )));
        }
        let fee_rate = request.fee_rate.unwrap_or(self.config.fee_rate);
        if fee_rate.bytes == 0 {
            return Err(WalletError::InvalidAmount("fee rate denominator is zero".into()));
        }

        // Building: select and assemble under the lock, then reserve.
        let (keychain, unsigned, token) = {
            let mut state = self.state.lock();
            let keychain = state.keychain()?;

            let reserved = state.reserved_outpoints();
            let tip = state.tip;
            let min_conf = self.config.min_confirmations;
            let candidates = state.ledger.list_spendable().filter(|u| {
                !reserved.contains(&u.outpoint) && u.confirmation.confirmations(tip) >= min_conf
            });
            let policy = SelectionPolicy {
                fee_rate,
                dust_threshold: self.config.dust_threshold,
                payment_script_lens: vec![request.destination.len()],
                change_script_len: P2PKH_SCRIPT_LEN,
            };
            let selection = select(candidates, request.value, &policy)?;

            let change_index = state.next_change_index();
            let change_path = keychain.path(Purpose::Change, change_index)?;
            let change_script = keychain.locking_script(&change_path, ScriptTemplate::P2pkh)?;

            let unsigned = build(
                &selection.chosen,
                &[(request.destination.clone(), request.value)],
                &change_script,
                selection.change,
                selection.fee,
                self.config.lock_time,
            )?;

            let token = state.next_token;
            state.next_token += 1;
            state.reservations.push(Reservation {
                token,
                txid: None,
                inputs: unsigned.inputs.iter().map(|u| u.outpoint).collect(),
                change: unsigned.change.as_ref().map(|c| PendingChange {
                    index: change_index,
                    path: change_path.clone(),
                    vout: c.vout,
                    value: c.value,
                    script: c.script.clone(),
                }),
            });
            debug!(
                inputs = unsigned.inputs.len(),
                fee = unsigned.fee,
                change = selection.change,
                "wallet: payment built"
            );
            (keychain, unsigned, token)
        };

        // Signing runs without the lock; the reservation keeps the coins ours.
        let signed = sign(unsigned, keychain.as_ref());

        let mut state = self.state.lock();
        match signed {
            Ok(signed) => {
                let txid = signed.txid();
                if let Some(reservation) = state.reservations.iter_mut().find(|r| r.token == token) {
                    reservation.txid = Some(txid);
                }
                let destination =
                    address::script_to_address(&request.destination, self.config.network);
                info!(
                    %txid,
                    destination = destination.as_deref().unwrap_or("non-standard script"),
                    value = request.value,
                    fee = signed.fee,
                    "wallet: payment signed"
                );
                Ok(signed)
            }
            Err(e) => {
                state.release(token);
                error!(error = %e, fatal = e.is_fatal(), "wallet: payment aborted");
                Err(e)
            }
        }
    }

    /// Pay a Base58 P2PKH address on the configured network.
    pub fn pay_to_address(
        &self,
        address: &str,
        value: u64,
        fee_rate: Option<FeeRate>,
    ) -> Result<SignedTransaction, WalletError> {
        let destination = address::address_to_script(address, self.config.network)?;
        self.pay(PaymentRequest {
            destination,
            value,
            fee_rate,
        })
    }

    /// Commit a payment the transport accepted: its inputs become spent and
    /// its change output joins the ledger.
    pub fn confirm_broadcast(&self, txid: &Txid) -> Result<(), WalletError> {
        let mut state = self.lock();
        state.keychain()?;
        let pos = state.find_payment(txid)?;

        if let Some(missing) = state.reservations[pos]
            .inputs
            .iter()
            .find(|op| state.ledger.get(op).is_none())
        {
            return Err(WalletError::UnknownUtxo(outpoint_label(missing)));
        }

        let reservation = state.reservations.remove(pos);
        for outpoint in &reservation.inputs {
            state.ledger.mark_spent(outpoint, Some(*txid))?;
        }
        if let Some(change) = reservation.change {
            let outpoint = OutPoint {
                txid: *txid,
                vout: change.vout,
            };
            // The chain may have reported the change before the caller did.
            let confirmation = state
                .ledger
                .get(&outpoint)
                .map(|u| u.confirmation)
                .unwrap_or(Confirmation::Unconfirmed);
            let utxo = Utxo {
                outpoint,
                value: change.value,
                script: change.script,
                path: change.path,
                template: ScriptTemplate::P2pkh,
                confirmation,
                spent: false,
                spent_by: None,
            };
            state.ledger.record_output(utxo)?;
            if state.counters.advance_past(Purpose::Change, change.index) {
                state.dirty.counters = true;
                state.extend_watch(self.config.gap_limit)?;
            }
        }
        state.dirty.ledger = true;

        info!(%txid, inputs = reservation.inputs.len(), "wallet: broadcast confirmed");
        state.commit()
    }

    /// Release the coins of a payment that will not be broadcast.
    pub fn abandon_payment(&self, txid: &Txid) -> Result<(), WalletError> {
        let mut state = self.state.lock();
        state.keychain()?;
        let pos = state.find_payment(txid)?;
        let reservation = state.reservations.remove(pos);
        info!(%txid, inputs = reservation.inputs.len(), "wallet: payment abandoned");
        Ok(())
    }

    // ---- chain-state notifications ----------------------------------------

    /// Record an output if it pays one of the wallet's scripts.
    ///
    /// Returns `false` for outputs the wallet does not own.
    pub fn on_incoming_output(&self, output: IncomingOutput) -> Result<bool, WalletError> {
        let mut state = self.lock();
        state.keychain()?;

        let Some((path, template)) = state.owned.get(&output.script).cloned() else {
            debug!(outpoint = %output.outpoint, "wallet: ignoring foreign output");
            return Ok(false);
        };

        // The chain reports existence and confirmation, not spend state.
        let (spent, spent_by) = state
            .ledger
            .get(&output.outpoint)
            .map(|u| (u.spent, u.spent_by))
            .unwrap_or((false, None));
        let utxo = Utxo {
            outpoint: output.outpoint,
            value: output.value,
            script: output.script,
            path: path.clone(),
            template,
            confirmation: output.confirmation,
            spent,
            spent_by,
        };

        if state.ledger.record_output(utxo)? != RecordOutcome::Unchanged {
            state.dirty.ledger = true;
        }
        if let (Some(purpose), Some(index)) = (path.purpose(), path.index()) {
            if state.counters.advance_past(purpose, index) {
                state.dirty.counters = true;
                state.extend_watch(self.config.gap_limit)?;
            }
        }
        state.commit()?;
        Ok(true)
    }

    /// Record the height of the best chain.
    pub fn on_chain_tip(&self, height: u32) -> Result<(), WalletError> {
        let mut state = self.lock();
        state.keychain()?;
        if state.tip != height {
            state.tip = height;
            state.dirty.ledger = true;
            debug!(height, "wallet: chain tip");
        }
        state.commit()
    }

    /// A wallet coin was spent by a transaction seen on chain.
    pub fn on_output_spent(&self, outpoint: &OutPoint, spender: Txid) -> Result<(), WalletError> {
        let mut state = self.lock();
        state.keychain()?;
        state.ledger.mark_spent(outpoint, Some(spender))?;
        state.dirty.ledger = true;

        let foreign_spend = state
            .reservations
            .iter()
            .any(|r| r.inputs.contains(outpoint) && r.txid != Some(spender));
        if foreign_spend {
            warn!(%outpoint, %spender, "wallet: reserved coin spent by another transaction");
        }
        state.commit()
    }

    /// A transaction left the chain: forget its outputs and un-spend its inputs.
    pub fn on_transaction_dropped(&self, txid: &Txid) -> Result<Reversal, WalletError> {
        let mut state = self.lock();
        state.keychain()?;
        let reversal = state.ledger.mark_unconfirmed_reversal(txid);
        if !reversal.removed.is_empty() || !reversal.restored.is_empty() {
            state.dirty.ledger = true;
        }
        state.commit()?;
        Ok(reversal)
    }

    // ---- recovery ----------------------------------------------------------

    /// Scan both chains for used addresses and move the counters past them.
    pub fn restore(
        &self,
        history: &dyn AddressHistory,
        gap_limit: u32,
    ) -> Result<RestoreSummary, WalletError> {
        if gap_limit == 0 {
            return Err(WalletError::InvalidConfig("gap limit must be positive".into()));
        }
        let keychain = self.state.lock().keychain()?;
        let summary = restore::scan(&keychain, history, gap_limit)?;

        let mut state = self.lock();
        for purpose in Purpose::ALL {
            if let Some(last) = summary.last_used(purpose) {
                if state.counters.advance_past(purpose, last) {
                    state.dirty.counters = true;
                }
            }
        }
        state.extend_watch(self.config.gap_limit)?;
        info!(
            receive = state.counters.receive,
            change = state.counters.change,
            "wallet: restore complete"
        );
        state.commit()?;
        Ok(summary)
    }

    /// The at-rest seed envelope as JSON, for backup.
    pub fn export_encrypted_seed(&self) -> Result<String, WalletError> {
        let bytes = self.store.get(SEED_KEY)?.ok_or(WalletError::NotInitialized)?;
        String::from_utf8(bytes)
            .map_err(|e| WalletError::Serialization(format!("record {SEED_KEY}: {e}")))
    }

    // ---- teardown ----------------------------------------------------------

    /// Flush and close. Unresolved reservations are dropped.
    pub fn close(self) -> Result<(), WalletError> {
        let mut state = self.state.lock();
        let pending = state.reservations.len();
        if pending > 0 {
            warn!(pending, "wallet: closing with unconfirmed payments");
        }
        state.flush(&*self.store)
    }

    /// Delete every record of this wallet from the store.
    pub fn delete(self) -> Result<(), WalletError> {
        let mut state = self.state.lock();
        for key in [SEED_KEY, COUNTERS_KEY, LEDGER_KEY, CONFIG_KEY] {
            self.store.delete(key)?;
        }
        state.dirty = Dirty::default();
        info!("wallet: deleted");
        Ok(())
    }
}

impl Drop for Wallet {
    fn drop(&mut self) {
        let store = Arc::clone(&self.store);
        if let Err(e) = self.state.get_mut().flush(&*store) {
            error!(error = %e, "wallet: flush on drop failed");
        }
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("network", &self.config.network)
            .field("account", &self.config.account)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
