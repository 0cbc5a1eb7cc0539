//! Cross-crate integration tests exercising the full pipeline:
//! mnemonic -> wallet -> receive -> pay -> verify -> confirm.
//!
//! These go through the public API of wallet_core only, with the chain and
//! broadcast collaborators played by the test.

use std::sync::{Arc, Barrier};
use std::thread;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{OutPoint, PubkeyHash, Script, ScriptBuf, Txid};
use chain_bsv::verify;
use crypto_utils::KdfParams;
use wallet_core::*;

const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn config() -> WalletConfig {
    WalletConfig {
        fee_rate: FeeRate::per_byte(1),
        dust_threshold: 100,
        kdf: KdfParams::insecure_fast(),
        ..WalletConfig::default()
    }
}

fn open(store: Arc<dyn WalletStore>, config: WalletConfig) -> Wallet {
    Wallet::open(store, config, "correct horse").unwrap()
}

fn dest() -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([0xbb; 20]))
}

fn receive(wallet: &Wallet, byte: u8, value: u64, height: u32) -> OutPoint {
    let addr = wallet.next_receive_address().unwrap();
    let outpoint = OutPoint {
        txid: Txid::from_byte_array([byte; 32]),
        vout: 0,
    };
    let owned = wallet
        .on_incoming_output(IncomingOutput {
            outpoint,
            value,
            script: addr.script,
            confirmation: Confirmation::Confirmed { height },
        })
        .unwrap();
    assert!(owned);
    outpoint
}

fn verify_signed(signed: &SignedTransaction) {
    let secp = Secp256k1::verification_only();
    let prevouts: Vec<(&Script, u64)> = signed
        .inputs
        .iter()
        .map(|u| (u.script.as_script(), u.value))
        .collect();
    verify::verify_transaction(&secp, &signed.transaction, &prevouts).unwrap();
}

// ─── Pay: receive -> select -> build -> sign -> verify ──────────────

#[test]
fn single_coin_payment_with_change() {
    let wallet = open(Arc::new(MemoryStore::new()), config());
    wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();

    let t1 = receive(&wallet, 0x01, 1000, 100);
    wallet.on_chain_tip(105).unwrap();
    assert_eq!(wallet.utxos().unwrap()[0].confirmation.confirmations(105), 6);

    let signed = wallet.pay(PaymentRequest::new(dest(), 600)).unwrap();
    let tx = &signed.transaction;

    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].previous_output, t1);
    assert_eq!(tx.output.len(), 2);
    assert_eq!(tx.output[0].value.to_sat(), 600);
    assert_eq!(tx.output[0].script_pubkey, dest());

    let change = signed.change.clone().unwrap();
    assert_eq!(change.vout, 1);
    assert_eq!(signed.fee, 227);
    assert_eq!(change.value, 400 - signed.fee);
    assert_eq!(tx.output[1].value.to_sat(), change.value);
    assert!(wallet.is_owned_script(&change.script).unwrap());

    verify_signed(&signed);
    assert!(signed.size() as u64 <= signed.fee);
}

#[test]
fn dust_change_folds_into_fee() {
    let mut cfg = config();
    cfg.dust_threshold = 546;
    let wallet = open(Arc::new(MemoryStore::new()), cfg);
    wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();
    receive(&wallet, 0x01, 1000, 100);

    let signed = wallet.pay(PaymentRequest::new(dest(), 600)).unwrap();
    assert_eq!(signed.transaction.output.len(), 1);
    assert!(signed.change.is_none());
    assert_eq!(signed.fee, 400);
    verify_signed(&signed);
}

#[test]
fn payment_to_address_string() {
    let wallet = open(Arc::new(MemoryStore::new()), config());
    wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();
    receive(&wallet, 0x01, 50_000, 100);
    receive(&wallet, 0x02, 30_000, 101);

    let signed = wallet
        .pay_to_address(
            "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA",
            60_000,
            Some(FeeRate::per_kilobyte(500)),
        )
        .unwrap();
    assert_eq!(signed.transaction.input.len(), 2);
    let in_total: u64 = signed.inputs.iter().map(|u| u.value).sum();
    let out_total: u64 = signed
        .transaction
        .output
        .iter()
        .map(|o| o.value.to_sat())
        .sum();
    assert_eq!(in_total, out_total + signed.fee);
    verify_signed(&signed);
}

// ─── Two-phase commit ───────────────────────────────────────────────

#[test]
fn confirm_then_spend_change() {
    let wallet = open(Arc::new(MemoryStore::new()), config());
    wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();
    receive(&wallet, 0x01, 10_000, 100);

    let first = wallet.pay(PaymentRequest::new(dest(), 2_000)).unwrap();
    wallet.confirm_broadcast(&first.txid()).unwrap();
    let change = first.change.clone().unwrap();
    assert_eq!(wallet.balance(0).unwrap(), change.value);
    assert_eq!(wallet.balance(1).unwrap(), 0);

    // The chain confirms the change output.
    let mined = wallet
        .on_incoming_output(IncomingOutput {
            outpoint: OutPoint {
                txid: first.txid(),
                vout: change.vout,
            },
            value: change.value,
            script: change.script.clone(),
            confirmation: Confirmation::Confirmed { height: 101 },
        })
        .unwrap();
    assert!(mined);
    assert_eq!(wallet.balance(1).unwrap(), change.value);

    let second = wallet.pay(PaymentRequest::new(dest(), 3_000)).unwrap();
    assert_eq!(second.inputs[0].outpoint.txid, first.txid());
    assert_ne!(second.change.as_ref().unwrap().script, change.script);
    verify_signed(&second);
}

#[test]
fn abandoned_payment_leaves_no_trace() {
    let store = Arc::new(MemoryStore::new());
    let wallet = open(store.clone(), config());
    wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();
    receive(&wallet, 0x01, 1000, 100);
    let ledger_before = store.get("ledger").unwrap();
    let counters_before = store.get("counters").unwrap();

    let signed = wallet.pay(PaymentRequest::new(dest(), 600)).unwrap();
    wallet.abandon_payment(&signed.txid()).unwrap();

    assert_eq!(store.get("ledger").unwrap(), ledger_before);
    assert_eq!(store.get("counters").unwrap(), counters_before);
    let again = wallet.pay(PaymentRequest::new(dest(), 600)).unwrap();
    assert_eq!(again.txid(), signed.txid());
}

#[test]
fn insufficient_funds() {
    let wallet = open(Arc::new(MemoryStore::new()), config());
    wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();
    receive(&wallet, 0x01, 500, 100);

    let err = wallet.pay(PaymentRequest::new(dest(), 600)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::User);
    match err {
        WalletError::InsufficientFunds { available, required } => {
            assert_eq!(available, 500);
            assert!(required > 600);
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ─── Concurrency ────────────────────────────────────────────────────

#[test]
fn concurrent_pays_never_share_a_coin() {
    let wallet = Arc::new(open(Arc::new(MemoryStore::new()), config()));
    wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();
    receive(&wallet, 0x01, 1000, 100);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let wallet = Arc::clone(&wallet);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                wallet.pay(PaymentRequest::new(dest(), 600))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(WalletError::InsufficientFunds { .. }))));
    assert_eq!(wallet.pending_payments().unwrap().len(), 1);
}

// ─── Persistence ────────────────────────────────────────────────────

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (last_address, change_script) = {
        let wallet = open(Arc::new(FileStore::open(dir.path()).unwrap()), config());
        wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();
        receive(&wallet, 0x01, 5_000, 100);
        let last = wallet.next_receive_address().unwrap();
        let signed = wallet.pay(PaymentRequest::new(dest(), 1_000)).unwrap();
        wallet.confirm_broadcast(&signed.txid()).unwrap();
        wallet.on_chain_tip(120).unwrap();
        wallet.close().unwrap();
        (last, signed.change.unwrap().script)
    };

    let wallet = open(Arc::new(FileStore::open(dir.path()).unwrap()), config());
    assert_eq!(wallet.status(), WalletStatus::Ready);
    assert_eq!(wallet.chain_tip().unwrap(), 120);
    let next = wallet.next_receive_address().unwrap();
    assert_eq!(next.path.index(), last_address.path.index().map(|i| i + 1));
    assert_ne!(next.address, last_address.address);

    let utxos = wallet.utxos().unwrap();
    assert_eq!(utxos.len(), 2);
    assert!(utxos[0].spent || utxos[1].spent);
    assert!(wallet.is_owned_script(&change_script).unwrap());
}

#[test]
fn wrong_password_rejected() {
    let store: Arc<dyn WalletStore> = Arc::new(MemoryStore::new());
    open(store.clone(), config())
        .import_mnemonic(TEST_MNEMONIC, "")
        .unwrap();

    let err = Wallet::open(store, config(), "wrong").unwrap_err();
    assert!(matches!(err, WalletError::DecryptionFailed(_)));
}

#[test]
fn network_mismatch_rejected() {
    let store: Arc<dyn WalletStore> = Arc::new(MemoryStore::new());
    open(store.clone(), config())
        .import_mnemonic(TEST_MNEMONIC, "")
        .unwrap();

    let mut testnet = config();
    testnet.network = BsvNetwork::Testnet;
    let err = Wallet::open(store, testnet, "correct horse").unwrap_err();
    assert!(matches!(err, WalletError::InvalidConfig(_)));
}

#[test]
fn exported_envelope_has_no_plaintext() {
    let wallet = open(Arc::new(MemoryStore::new()), config());
    let mnemonic = wallet.create_wallet(&[0x42; 32]).unwrap();
    assert_eq!(mnemonic.words().len(), 24);

    let exported = wallet.export_encrypted_seed().unwrap();
    let seed = mnemonic.to_seed("").unwrap();
    assert!(!exported.contains(&hex::encode(&*seed)));
    assert!(!exported.contains(mnemonic.as_str()));
}

// ─── Reorg and restore ──────────────────────────────────────────────

#[test]
fn dropped_transaction_reverses_spend() {
    let wallet = open(Arc::new(MemoryStore::new()), config());
    wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();
    receive(&wallet, 0x01, 1000, 100);

    let signed = wallet.pay(PaymentRequest::new(dest(), 600)).unwrap();
    wallet.confirm_broadcast(&signed.txid()).unwrap();
    assert_eq!(wallet.balance(1).unwrap(), 0);

    let reversal = wallet.on_transaction_dropped(&signed.txid()).unwrap();
    assert_eq!(reversal.restored, vec![signed.inputs[0].outpoint]);
    assert_eq!(wallet.balance(1).unwrap(), 1000);
    assert_eq!(wallet.utxos().unwrap().len(), 1);
}

#[test]
fn restore_skips_used_addresses() {
    let used: Vec<ScriptBuf> = {
        let wallet = open(Arc::new(MemoryStore::new()), config());
        wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();
        (0..4)
            .map(|_| wallet.next_receive_address().unwrap().script)
            .collect()
    };

    let wallet = open(Arc::new(MemoryStore::new()), config());
    wallet.import_mnemonic(TEST_MNEMONIC, "").unwrap();
    let history = |s: &Script| used.iter().any(|u| u.as_script() == s);
    let summary = wallet.restore(&history, 20).unwrap();

    assert_eq!(summary.last_used(Purpose::Receive), Some(3));
    assert_eq!(summary.last_used(Purpose::Change), None);
    assert_eq!(wallet.next_receive_address().unwrap().path.index(), Some(4));
}
