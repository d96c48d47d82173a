//! End-to-end service tests.
//!
//! Drives the wired application through:
//! - Arrival, replacement and duplicate rejection
//! - Loop-driven promotion under a bounded pool
//! - Exit-signal cancellation and history
//! - Risk offset planning with connector release
//! - Journal replay across restarts

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal_macros::dec;
use serde_json::json;
use sigq_core::{
    ManualClock, PositionId, PositionSnapshot, PositionStatus, Price, Side, SignalPayload,
    SignalStatus, Size, UserId,
};
use sigq_offset::testkit::{MockConnectorFactory, MockExchange};
use sigq_offset::UserAccount;
use sigq_queue::testkit::{
    MockEntryConfigs, MockPositionCreator, MockPositions, MockPrices, MockRiskConfigs,
};
use sigq_queue::QueueError;
use sigq_service::{AppConfig, Application, Collaborators};
use sigq_store::SignalStore;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    app: Application,
    clock: Arc<ManualClock>,
    prices: Arc<MockPrices>,
    positions: Arc<MockPositions>,
    creator: Arc<MockPositionCreator>,
    connectors: Arc<MockConnectorFactory>,
}

fn config(capacity: u32) -> AppConfig {
    AppConfig::from_toml_str(&format!(
        "[scheduler]\ninterval_ms = 10\n\n[pool]\ncapacity = {capacity}\n"
    ))
    .unwrap()
}

fn fixture(config: AppConfig) -> Fixture {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 9, 2, 8, 10, 0).unwrap(),
    ));
    let prices = Arc::new(MockPrices::new());
    let positions = Arc::new(MockPositions::new());
    let creator = Arc::new(MockPositionCreator::new());
    let connectors = Arc::new(MockConnectorFactory::new());

    let collaborators = Collaborators {
        positions: positions.clone(),
        risk: Arc::new(MockRiskConfigs::new()),
        entries: Arc::new(MockEntryConfigs::permissive()),
        creator: creator.clone(),
        prices: prices.clone(),
        connectors: connectors.clone(),
        pool: None,
    };
    let app = Application::with_clock(config, collaborators, clock.clone()).unwrap();

    Fixture {
        app,
        clock,
        prices,
        positions,
        creator,
        connectors,
    }
}

fn payload(user: &str, symbol: &str, price: rust_decimal::Decimal) -> SignalPayload {
    SignalPayload {
        user_id: Some(UserId::new(user)),
        exchange: "binance".to_string(),
        symbol: symbol.to_string(),
        timeframe: 15,
        side: Side::Long,
        entry_price: Price::new(price),
        position_size: Some(Size::new(dec!(0.2))),
        raw: json!({"source": "webhook", "symbol": symbol}),
        received_at: None,
    }
}

async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_arrival_dedup_and_replacement() {
    let f = fixture(config(1));
    let manager = f.app.manager();

    let first = manager
        .enqueue(payload("alice", "BTCUSDT", dec!(60000)))
        .await
        .unwrap();

    // Same 15m candle.
    f.clock.advance(ChronoDuration::minutes(4));
    let dup = manager
        .enqueue(payload("alice", "BTCUSDT", dec!(59000)))
        .await;
    assert!(matches!(dup, Err(QueueError::DuplicateSignal { .. })));

    // Next candle.
    f.clock.advance(ChronoDuration::minutes(15));
    let replaced = manager
        .enqueue(payload("alice", "BTCUSDT", dec!(58000)))
        .await
        .unwrap();
    assert!(replaced.is_replacement());
    assert_eq!(replaced.signal().id, first.signal().id);
    assert_eq!(replaced.signal().replacement_count, 1);
    assert_eq!(replaced.signal().queued_at, first.signal().queued_at);

    let listed = manager.list(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].signal.entry_price, Price::new(dec!(58000)));

    let metrics = f.app.metrics();
    assert_eq!(metrics.enqueue_count("created"), 1);
    assert_eq!(metrics.enqueue_count("duplicate"), 1);
    assert_eq!(metrics.enqueue_count("replaced"), 1);
}

#[tokio::test]
async fn test_loop_promotes_within_pool_capacity() {
    let f = fixture(config(2));
    let manager = f.app.manager();

    for (symbol, entry, current) in [
        ("BTCUSDT", dec!(60000), dec!(59400)), // -1%
        ("ETHUSDT", dec!(3000), dec!(2850)),   // -5%
        ("SOLUSDT", dec!(150), dec!(151)),     // +0.67%
    ] {
        manager.enqueue(payload("alice", symbol, entry)).await.unwrap();
        f.prices.set("binance", symbol, Price::new(current));
        f.clock.advance(ChronoDuration::seconds(1));
    }

    assert!(f.app.start().await);
    let creator = f.creator.clone();
    let metrics = f.app.metrics().clone();
    assert!(wait_until(|| creator.created().len() == 2 && metrics.slot_denied_count() > 0).await);
    f.app.stop().await;

    let created: Vec<String> = f.creator.created().into_iter().map(|s| s.symbol).collect();
    assert_eq!(created, vec!["ETHUSDT".to_string(), "BTCUSDT".to_string()]);

    let remaining = manager.list(None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].signal.symbol, "SOLUSDT");
    assert_eq!(f.app.metrics().promotion_count("pool"), 2);
}

#[tokio::test]
async fn test_pyramid_continuation_bypasses_full_pool() {
    let f = fixture(config(1));
    let manager = f.app.manager();

    // Fill the only slot.
    let filler = manager
        .enqueue(payload("alice", "BTCUSDT", dec!(60000)))
        .await
        .unwrap();
    manager
        .promote(filler.signal().id, &UserId::new("alice"))
        .await
        .unwrap()
        .unwrap();

    f.positions.set(
        "alice",
        vec![PositionSnapshot {
            id: PositionId::new("pos-eth"),
            user_id: UserId::new("alice"),
            exchange: "binance".to_string(),
            symbol: "ETHUSDT".to_string(),
            timeframe: 15,
            side: Side::Long,
            status: PositionStatus::Active,
            weighted_avg_entry: Price::new(dec!(3000)),
            total_filled_quantity: Size::new(dec!(1)),
            unrealized_pnl: dec!(0),
        }],
    );
    let pyramid = manager
        .enqueue(payload("alice", "ETHUSDT", dec!(2950)))
        .await
        .unwrap();
    let blocked = manager
        .enqueue(payload("alice", "SOLUSDT", dec!(150)))
        .await
        .unwrap();

    let listed = manager.list(Some(&UserId::new("alice"))).await.unwrap();
    let eth = listed
        .iter()
        .find(|l| l.signal.id == pyramid.signal().id)
        .unwrap();
    assert_eq!(eth.bypass_eligible, Some(true));

    let handle = manager
        .promote(pyramid.signal().id, &UserId::new("alice"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.path, sigq_queue::PromotionPath::PyramidBypass);

    assert!(manager
        .promote(blocked.signal().id, &UserId::new("alice"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_exit_signal_cancels_and_feeds_history() {
    let f = fixture(config(1));
    let manager = f.app.manager();

    let queued = manager
        .enqueue(payload("bob", "ETHUSDT", dec!(3000)))
        .await
        .unwrap();
    let cancelled = manager
        .cancel_for_key(&UserId::new("bob"), "ETHUSDT", "binance", 15, Side::Long)
        .await
        .unwrap();
    assert_eq!(cancelled, 1);

    let history = manager.history(Some(&UserId::new("bob")), 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, queued.signal().id);
    assert_eq!(history[0].status, SignalStatus::Cancelled);
    assert!(manager
        .history(Some(&UserId::new("alice")), 10)
        .await
        .unwrap()
        .is_empty());

    // The key is free again.
    let again = manager
        .enqueue(payload("bob", "ETHUSDT", dec!(3010)))
        .await
        .unwrap();
    assert!(!again.is_replacement());
}

#[tokio::test]
async fn test_risk_offset_plan_through_service() {
    let f = fixture(config(1));
    f.connectors.add_exchange(
        "binance",
        MockExchange::new()
            .with_price("BTCUSDT", dec!(55000))
            .with_price("ETHUSDT", dec!(1800))
            .with_rules("ETHUSDT", dec!(0.01), dec!(10)),
    );
    let user = UserAccount {
        user_id: UserId::new("alice"),
        credentials: json!({"binance": {"api_key": "k", "api_secret": "s"}}),
    };
    let winners = [
        PositionSnapshot {
            id: PositionId::new("btc-long"),
            user_id: UserId::new("alice"),
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: 60,
            side: Side::Long,
            status: PositionStatus::Active,
            weighted_avg_entry: Price::new(dec!(50000)),
            total_filled_quantity: Size::new(dec!(0.04)),
            unrealized_pnl: dec!(200),
        },
        PositionSnapshot {
            id: PositionId::new("eth-short"),
            user_id: UserId::new("alice"),
            exchange: "binance".to_string(),
            symbol: "ETHUSDT".to_string(),
            timeframe: 60,
            side: Side::Short,
            status: PositionStatus::Active,
            weighted_avg_entry: Price::new(dec!(2000)),
            total_filled_quantity: Size::new(dec!(5)),
            unrealized_pnl: dec!(1000),
        },
    ];

    // BTC would need 0.05 of 0.04 held, so ETH covers it: 250 / 200 = 1.25.
    let plan = f.app.planner().plan(&user, &winners, dec!(250)).await;

    assert_eq!(plan.len(), 1);
    assert_eq!(plan.entries[0].position_id, PositionId::new("eth-short"));
    assert_eq!(plan.entries[0].quantity.inner(), dec!(1.25));
    assert!(plan.covers(dec!(250)));
    assert!(f.connectors.ledger().balanced());
    assert_eq!(f.app.metrics().connectors_open_balance(), 0);
}

#[tokio::test]
async fn test_disabled_scheduler_does_not_start() {
    let config = AppConfig::from_toml_str("[scheduler]\nenabled = false\n").unwrap();
    let f = fixture(config);
    assert!(!f.app.start().await);
    assert!(!f.app.promotion_loop().is_running());
}

#[tokio::test]
async fn test_run_until_stops_loop() {
    let f = fixture(config(1));
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let app = &f.app;
    let run = app.run_until(async {
        let _ = rx.await;
    });
    let trigger = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(app.promotion_loop().is_running());
        let _ = tx.send(());
    };
    tokio::join!(run, trigger);

    assert!(!f.app.promotion_loop().is_running());
}

#[tokio::test]
async fn test_journal_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("signals.jsonl");
    let toml = format!(
        "[scheduler]\nenabled = false\n\n[store]\njournal_path = {:?}\n",
        journal.display().to_string()
    );

    let id = {
        let f = fixture(AppConfig::from_toml_str(&toml).unwrap());
        f.app
            .manager()
            .enqueue(payload("carol", "XRPUSDT", dec!(0.5)))
            .await
            .unwrap()
            .signal()
            .id
    };

    let f = fixture(AppConfig::from_toml_str(&toml).unwrap());
    let restored = f.app.store().get(id).await.unwrap().unwrap();
    assert_eq!(restored.symbol, "XRPUSDT");
    assert_eq!(restored.status, SignalStatus::Queued);
}
