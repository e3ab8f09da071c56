//! End-to-end flows through the engine facade against in-memory collaborators

use std::sync::Arc;

use futures::TryStreamExt;
use splitpay::account::account_type;
use splitpay::ledger::{Contact, CreationDiscard, PendingTopUp};
use splitpay::ledger::mock::{MockDiscovery, MockIdentity, MockLedger, MockWallet, raw_entry};
use splitpay::{
    Direction, EngineConfig, HistoryQuery, PoolKind, SettlementEngine, SettlementError,
    TransferTag, WalletRecord,
};

struct Harness {
    ledger: Arc<MockLedger>,
    identity: Arc<MockIdentity>,
    wallet: Arc<MockWallet>,
    engine: SettlementEngine,
}

fn harness(addresses: &[&str]) -> Harness {
    let ledger = Arc::new(MockLedger::new());
    let identity = Arc::new(MockIdentity::new());
    let wallet = Arc::new(MockWallet::new());
    let records = addresses
        .iter()
        .map(|address| WalletRecord {
            address: address.to_string(),
            server: "lem".into(),
            active: true,
            message_key: None,
        })
        .collect();
    let engine = SettlementEngine::new(
        EngineConfig::default(),
        Arc::new(MockDiscovery::new(ledger.clone())),
        identity.clone(),
        wallet.clone(),
        records,
    );
    Harness {
        ledger,
        identity,
        wallet,
        engine,
    }
}

#[tokio::test]
async fn split_transfer_settles_both_pools() {
    let h = harness(&["0xaaaa"]);
    h.ledger.set_balance(PoolKind::Collateralized, "aaaa", "10.00");
    h.ledger.set_balance(PoolKind::MutualCredit, "aaaa", "3.00");
    h.ledger.set_limits("aaaa", "-5.00", "1000.00");
    h.ledger.set_limits("bbbb", "0.00", "100.00");

    let recipient = h
        .engine
        .recipient(
            "0xbbbb",
            Contact {
                id: Some(3),
                public_name: Some("Bakery".into()),
            },
        )
        .unwrap();
    let txs = recipient
        .transfer("12.00", "bread", Some("thanks"))
        .await
        .unwrap();

    // 3.00 balance + 5.00 room on the credit side, the rest collateralized
    let submissions = h.ledger.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(
        (submissions[0].pool, submissions[0].amount),
        (PoolKind::MutualCredit, 800)
    );
    assert_eq!(
        (submissions[1].pool, submissions[1].amount),
        (PoolKind::Collateralized, 400)
    );
    assert!(submissions.iter().all(|s| s.memo == "bread|thanks"));
    assert_eq!(h.wallet.unlock_count(), 2);

    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0].tags, vec![TransferTag::Barter]);
    assert_eq!(txs[1].tags, vec![TransferTag::Collateralized]);
    assert!(txs.iter().all(|tx| tx.direction == Direction::Outbound));
    assert_eq!(txs.iter().map(|tx| tx.amount).sum::<i64>(), -1200);
    assert_eq!(txs[0].related(), "Bakery");
}

#[tokio::test]
async fn transfer_beyond_both_pools_is_refused_before_submission() {
    let h = harness(&["0xaaaa"]);
    h.ledger.set_balance(PoolKind::Collateralized, "aaaa", "1.00");
    h.ledger.set_balance(PoolKind::MutualCredit, "aaaa", "1.00");
    h.ledger.set_limits("aaaa", "0.00", "1000.00");
    h.ledger.set_limits("bbbb", "0.00", "100.00");

    let recipient = h.engine.recipient("bbbb", Contact::default()).unwrap();
    let err = recipient.transfer("5.00", "too much", None).await.unwrap_err();
    assert!(matches!(err, SettlementError::InsufficientBalance { .. }));
    assert!(h.ledger.submissions().is_empty());

    let err = recipient.transfer("0.00", "nothing", None).await.unwrap_err();
    assert_eq!(err.code(), "NULL_AMOUNT");
}

#[tokio::test]
async fn history_is_merged_newest_first_across_accounts() {
    let h = harness(&["0xaaaa", "0xcccc"]);
    h.identity.add_contact("bbbb", "Bakery");
    h.ledger.set_history(
        "aaaa",
        vec![
            raw_entry("0x03", "aaaa", "bbbb", true, 250, 3_000),
            raw_entry("0x01", "aaaa", "bbbb", false, 100, 1_000),
        ],
    );
    h.ledger.set_history(
        "cccc",
        vec![
            raw_entry("0x04", "cccc", "dddd", false, 400, 4_000),
            raw_entry("0x02", "cccc", "dddd", true, 50, 2_000),
        ],
    );

    let txs: Vec<_> = h
        .engine
        .transactions(&HistoryQuery::default())
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    let ids: Vec<&str> = txs.iter().map(|tx| tx.id.as_str()).collect();
    assert_eq!(ids, vec!["0x04", "0x03", "0x02", "0x01"]);
    let amounts: Vec<i64> = txs.iter().map(|tx| tx.amount).collect();
    assert_eq!(amounts, vec![400, -250, -50, 100]);
    assert_eq!(txs[1].counterparty_name.as_deref(), Some("Bakery"));
}

#[tokio::test]
async fn validator_activates_new_wallet() {
    let h = harness(&["0xaaaa"]);
    h.ledger
        .set_account_type("aaaa", account_type::CREDIT_MANAGER);
    h.ledger.set_account_status("bbbb", 0);

    let recipient = h
        .engine
        .recipient(
            "0xbbbb",
            Contact {
                id: Some(11),
                public_name: None,
            },
        )
        .unwrap();
    recipient.validate_creation().await.unwrap();

    let params = h.ledger.account_params();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].0, "bbbb");
    assert_eq!(params[0].1.status, 1);

    let activations = h.identity.activations();
    assert_eq!(activations.len(), 1);
    assert_eq!(activations[0].recipient_id, Some(11));
}

#[tokio::test]
async fn top_ups_and_discarded_creation_go_through_identity_service() {
    let h = harness(&["0xaaaa"]);
    let top_up = PendingTopUp {
        id: 12,
        amount: 5_000,
        created_at: None,
    };
    h.identity.set_pending_top_ups("aaaa", vec![top_up.clone()]);
    assert_eq!(h.engine.pending_top_ups().await.unwrap(), vec![top_up]);

    let url = h.engine.credit_url("50.00").await.unwrap();
    assert!(!url.is_empty());
    assert_eq!(h.identity.credit_calls(), vec![("aaaa".to_string(), 5_000)]);

    let recipient = h
        .engine
        .recipient(
            "0xdddd",
            Contact {
                id: Some(21),
                public_name: None,
            },
        )
        .unwrap();
    recipient.discard_create_request().await.unwrap();
    assert_eq!(
        h.identity.discards(),
        vec![CreationDiscard {
            recipient_id: Some(21),
            address: "dddd".into(),
        }]
    );
}
