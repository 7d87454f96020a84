mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use serde_json::json;

use signalbot::db::Store;
use signalbot::exchange::{AdapterError, ExchangeOrderStatus};
use signalbot::execution::{DispatchError, Transition};
use signalbot::models::{Direction, OrderStatus, PositionStatus};

use common::{dispatcher, order_state, seeded_store, signal, ScriptedExchange, ACCOUNT_ID, BOT_ID};

#[tokio::test]
async fn test_open_add_close_scenario() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    let dispatcher = dispatcher(&store, exchange.clone());

    let opened = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap();
    assert_eq!(opened.transition, Transition::Opened);
    assert_eq!(opened.position.symbol, "BTCUSDT");
    assert_eq!(opened.position.direction, Direction::Long);
    assert_eq!(opened.position.position_size, dec!(1));
    assert_eq!(opened.position.average_entry_price, dec!(100));

    let added = dispatcher.handle(&signal("buy", "1", "110", "long", "2")).await.unwrap();
    assert_eq!(added.transition, Transition::Increased);
    assert_eq!(added.position.id, opened.position.id);
    assert_eq!(added.position.position_size, dec!(2));
    assert_eq!(added.position.average_entry_price, dec!(105));

    let closed = dispatcher.handle(&signal("sell", "2", "120", "flat", "0")).await.unwrap();
    assert_eq!(closed.transition, Transition::Closed);
    assert_eq!(closed.position.status, PositionStatus::Closed);
    assert_eq!(closed.position.position_size, dec!(0));
    assert_eq!(closed.position.exit_price, Some(dec!(120)));
    assert_eq!(closed.position.profit_loss, dec!(29.84));
    assert_eq!(closed.position.percent_profit_loss, dec!(14.21));
    assert_eq!(closed.realized.map(|r| r.net), Some(dec!(29.84)));

    // Balance moves only on closure, by the net result
    assert_eq!(store.balance(ACCOUNT_ID), Some(dec!(1029.84)));

    let orders = store.orders();
    assert_eq!(orders.len(), 3);
    assert!(orders.iter().all(|o| o.status == OrderStatus::Filled));
    assert!(orders.iter().all(|o| o.position_id == Some(opened.position.id)));
    assert!(orders.iter().all(|o| o.external_order_id.is_some()));

    assert!(store.find_open_position(BOT_ID, "BTCUSDT").await.unwrap().is_none());
    assert_eq!(exchange.places(), 3);
}

#[tokio::test]
async fn test_new_position_after_close() {
    let store = seeded_store();
    let dispatcher = dispatcher(&store, ScriptedExchange::new());

    let first = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap();
    dispatcher.handle(&signal("sell", "1", "100", "flat", "0")).await.unwrap();
    let second = dispatcher.handle(&signal("sell", "2", "100", "short", "2")).await.unwrap();

    assert_eq!(second.transition, Transition::Opened);
    assert_ne!(second.position.id, first.position.id);
    assert_eq!(second.position.direction, Direction::Short);
    assert_eq!(store.positions().len(), 2);
}

#[tokio::test]
async fn test_short_round_trip_credits_balance() {
    let store = seeded_store();
    let dispatcher = dispatcher(&store, ScriptedExchange::new());

    dispatcher.handle(&signal("sell", "2", "100", "short", "2")).await.unwrap();
    let closed = dispatcher.handle(&signal("buy", "2", "90", "flat", "0")).await.unwrap();

    assert_eq!(closed.position.profit_loss, dec!(19.87));
    assert_eq!(closed.position.percent_profit_loss, dec!(9.94));
    assert_eq!(store.balance(ACCOUNT_ID), Some(dec!(1019.87)));
}

#[tokio::test]
async fn test_partial_close_keeps_position_open() {
    let store = seeded_store();
    let dispatcher = dispatcher(&store, ScriptedExchange::new());

    dispatcher.handle(&signal("buy", "3", "100", "long", "3")).await.unwrap();
    let reduced = dispatcher.handle(&signal("sell", "1", "130", "long", "2")).await.unwrap();

    assert_eq!(reduced.transition, Transition::Reduced);
    assert_eq!(reduced.position.status, PositionStatus::Open);
    assert_eq!(reduced.position.position_size, dec!(2));
    assert_eq!(reduced.position.average_entry_price, dec!(100));
    assert_eq!(reduced.position.exit_price, None);
    assert_eq!(store.balance(ACCOUNT_ID), Some(dec!(1000)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fills_do_not_lose_updates() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    let dispatcher = Arc::new(dispatcher(&store, exchange.clone()));

    dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap();
    exchange.set_place_delay(Duration::from_millis(5));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(async move {
            dispatcher.handle(&signal("buy", "1", "100", "long", "2")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let position = store.find_open_position(BOT_ID, "BTCUSDT").await.unwrap().unwrap();
    assert_eq!(position.position_size, dec!(11));
    assert_eq!(position.initial_size, dec!(11));
    assert_eq!(position.average_entry_price, dec!(100));
    assert_eq!(store.positions().len(), 1);

    let orders = store.orders();
    assert_eq!(orders.len(), 11);
    assert!(orders.iter().all(|o| o.position_id == Some(position.id)));
    assert_eq!(dispatcher.active_keys(), 0);
}

#[tokio::test]
async fn test_rejected_order_records_error_and_no_position() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    exchange.script_place(Err(AdapterError::Rejected("insufficient margin".into())));
    let dispatcher = dispatcher(&store, exchange.clone());

    let err = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap_err();
    assert!(matches!(err, DispatchError::AdapterFailure(AdapterError::Rejected(_))));
    assert_eq!(err.code(), "adapter_failure");

    // Terminal errors are not retried
    assert_eq!(exchange.places(), 1);

    let orders = store.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Error);
    assert!(orders[0].error_message.as_deref().unwrap().contains("insufficient margin"));
    assert!(orders[0].position_id.is_none());
    assert!(store.positions().is_empty());
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    exchange.script_place(Err(AdapterError::Network("connection reset".into())));
    exchange.script_place(Err(AdapterError::RateLimited { retry_after: None }));
    let dispatcher = dispatcher(&store, exchange.clone());

    let outcome = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap();

    assert_eq!(outcome.transition, Transition::Opened);
    assert_eq!(exchange.places(), 3);
    assert_eq!(store.orders().len(), 1);
    assert_eq!(store.orders()[0].status, OrderStatus::Filled);
}

#[tokio::test]
async fn test_exhausted_retries_release_the_key() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    for _ in 0..3 {
        exchange.script_place(Err(AdapterError::Network("connection reset".into())));
    }
    let dispatcher = dispatcher(&store, exchange.clone());

    let err = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap_err();
    assert!(matches!(err, DispatchError::AdapterFailure(AdapterError::Network(_))));
    assert_eq!(exchange.places(), 3);
    assert_eq!(store.orders()[0].status, OrderStatus::Error);
    assert_eq!(dispatcher.active_keys(), 0);

    // The next signal for the same key is not starved
    let outcome = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap();
    assert_eq!(outcome.transition, Transition::Opened);
    assert_eq!(store.orders().len(), 2);
}

#[tokio::test]
async fn test_timed_out_order_that_landed_is_committed() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    // First attempt executes but the response is lost; the retry then hits
    // the duplicate client order id.
    exchange.land_next_place();
    exchange.script_place(Err(AdapterError::Network("timed out".into())));
    exchange.script_place(Err(AdapterError::Rejected("duplicate client order id".into())));
    let dispatcher = dispatcher(&store, exchange.clone());

    let outcome = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap();

    assert_eq!(outcome.transition, Transition::Opened);
    assert_eq!(exchange.places(), 2);
    assert_eq!(exchange.lookup_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let orders = store.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Filled);
    assert_eq!(orders[0].external_order_id.as_deref(), Some("ex-1"));
    assert_eq!(orders[0].position_id, Some(outcome.position.id));

    let positions = store.positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].position_size, dec!(1));
}

#[tokio::test]
async fn test_slow_exchange_times_out_as_network_error() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    exchange.set_place_delay(Duration::from_millis(500));
    let dispatcher = dispatcher(&store, exchange.clone());

    let err = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap_err();

    assert!(matches!(err, DispatchError::AdapterFailure(AdapterError::Network(_))));
    assert_eq!(exchange.places(), 3);
    let orders = store.orders();
    assert_eq!(orders[0].status, OrderStatus::Error);
    assert!(orders[0].error_message.as_deref().unwrap().contains("timed out"));
    assert!(store.positions().is_empty());
}

#[tokio::test]
async fn test_commit_failure_leaves_no_partial_state() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    let dispatcher = dispatcher(&store, exchange.clone());

    let opened = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap();

    // The exchange fills the close, then the store goes away at commit
    let failing = store.clone();
    exchange.on_next_place(move || failing.fail_next_commit());
    let err = dispatcher.handle(&signal("sell", "1", "120", "flat", "0")).await.unwrap_err();

    assert!(matches!(err, DispatchError::PersistenceFailure(_)));
    assert_eq!(err.code(), "persistence_failure");

    let position = store.find_open_position(BOT_ID, "BTCUSDT").await.unwrap().unwrap();
    assert_eq!(position.id, opened.position.id);
    assert_eq!(position.position_size, dec!(1));
    assert_eq!(store.balance(ACCOUNT_ID), Some(dec!(1000)));

    let orders = store.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[1].status, OrderStatus::Error);
    assert!(orders[1].error_message.as_deref().unwrap().starts_with("commit failed"));
}

#[tokio::test]
async fn test_unknown_bot_has_no_side_effects() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    let dispatcher = dispatcher(&store, exchange.clone());

    let mut payload = signal("buy", "1", "100", "long", "1");
    payload["bot_id"] = json!(99);

    let err = dispatcher.handle(&payload).await.unwrap_err();
    assert!(matches!(err, DispatchError::BotNotFound(99)));
    assert!(store.orders().is_empty());
    assert_eq!(exchange.places(), 0);
}

#[tokio::test]
async fn test_malformed_signal_is_rejected_before_side_effects() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    let dispatcher = dispatcher(&store, exchange.clone());

    let mut payload = signal("buy", "1", "100", "long", "1");
    payload["order_price"] = json!("-5");

    let err = dispatcher.handle(&payload).await.unwrap_err();
    assert!(matches!(err, DispatchError::ValidationFailure(_)));
    assert_eq!(err.code(), "validation_failure");
    assert!(store.orders().is_empty());
    assert_eq!(exchange.places(), 0);
}

#[tokio::test]
async fn test_size_mismatch_is_rejected_before_the_exchange() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    let dispatcher = dispatcher(&store, exchange.clone());

    let err = dispatcher.handle(&signal("buy", "1", "100", "long", "2")).await.unwrap_err();

    assert!(matches!(err, DispatchError::PositionMismatch(_)));
    assert_eq!(exchange.places(), 0);
    assert!(store.orders().is_empty());
}

#[tokio::test]
async fn test_unfilled_order_is_cancelled() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    exchange.script_place(Ok(order_state("ex-rest", ExchangeOrderStatus::Open, dec!(0), None)));
    let dispatcher = dispatcher(&store, exchange.clone());

    let err = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap_err();

    assert!(matches!(err, DispatchError::NotFilled(ref id) if id == "ex-rest"));
    assert_eq!(exchange.cancels(), 1);
    let orders = store.orders();
    assert_eq!(orders[0].status, OrderStatus::Cancelled);
    assert!(store.positions().is_empty());
}

#[tokio::test]
async fn test_partial_fill_is_applied_after_cancel() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    exchange.script_place(Ok(order_state("ex-part", ExchangeOrderStatus::Open, dec!(0), None)));
    exchange.script_fetch(Ok(order_state("ex-part", ExchangeOrderStatus::Open, dec!(0.4), Some(dec!(99.5)))));
    exchange.script_fetch(Ok(order_state("ex-part", ExchangeOrderStatus::Open, dec!(0.4), Some(dec!(99.5)))));
    exchange.script_fetch(Ok(order_state(
        "ex-part",
        ExchangeOrderStatus::Cancelled,
        dec!(0.4),
        Some(dec!(99.5)),
    )));
    let dispatcher = dispatcher(&store, exchange.clone());

    let outcome = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap();

    assert_eq!(exchange.cancels(), 1);
    assert_eq!(outcome.position.position_size, dec!(0.4));
    assert_eq!(outcome.position.average_entry_price, dec!(99.5));
    assert_eq!(outcome.order.quantity, dec!(0.4));
    assert_eq!(outcome.order.entry_price, dec!(99.5));
    assert_eq!(outcome.order.external_order_id.as_deref(), Some("ex-part"));
    assert_eq!(outcome.order.status, OrderStatus::Filled);
}

#[tokio::test]
async fn test_exchange_side_rejection_after_acceptance() {
    let store = seeded_store();
    let exchange = ScriptedExchange::new();
    exchange.script_place(Ok(order_state("ex-rej", ExchangeOrderStatus::Rejected, dec!(0), None)));
    let dispatcher = dispatcher(&store, exchange.clone());

    let err = dispatcher.handle(&signal("buy", "1", "100", "long", "1")).await.unwrap_err();

    assert!(matches!(err, DispatchError::AdapterFailure(AdapterError::Rejected(_))));
    assert_eq!(store.orders()[0].status, OrderStatus::Error);
    assert!(store.positions().is_empty());
}
