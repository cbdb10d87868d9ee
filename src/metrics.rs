//! Prometheus instrumentation
//!
//! Counters register against the default registry so the binary's
//! `/metrics` endpoint picks them up with a plain `prometheus::gather()`.

use prometheus::{register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec};
use std::sync::OnceLock;

struct Metrics {
    frames_received: IntCounterVec,
    reconnects: IntCounterVec,
    book_corruptions: IntCounterVec,
    events_published: IntCounterVec,
    active_subscriptions: IntGaugeVec,
}

fn metrics() -> &'static Metrics {
    static METRICS: OnceLock<Metrics> = OnceLock::new();
    METRICS.get_or_init(|| Metrics {
        frames_received: register_int_counter_vec!(
            "crossfeed_frames_received_total",
            "Inbound websocket frames per endpoint",
            &["url"]
        )
        .expect("register frames_received"),
        reconnects: register_int_counter_vec!(
            "crossfeed_reconnects_total",
            "Successful reconnects per endpoint",
            &["url"]
        )
        .expect("register reconnects"),
        book_corruptions: register_int_counter_vec!(
            "crossfeed_book_corruptions_total",
            "Order book sequence gaps / stale snapshots per symbol",
            &["symbol"]
        )
        .expect("register book_corruptions"),
        events_published: register_int_counter_vec!(
            "crossfeed_events_published_total",
            "Events fanned out to delivery queues, by kind",
            &["kind"]
        )
        .expect("register events_published"),
        active_subscriptions: register_int_gauge_vec!(
            "crossfeed_active_subscriptions",
            "Delivery queues currently registered per endpoint",
            &["url"]
        )
        .expect("register active_subscriptions"),
    })
}

pub fn frames_received(url: &str) {
    metrics().frames_received.with_label_values(&[url]).inc();
}

pub fn reconnects(url: &str) {
    metrics().reconnects.with_label_values(&[url]).inc();
}

pub fn book_corruptions(symbol: &str) {
    metrics().book_corruptions.with_label_values(&[symbol]).inc();
}

pub fn events_published(kind: &str, queues: u64) {
    metrics()
        .events_published
        .with_label_values(&[kind])
        .inc_by(queues);
}

pub fn active_subscriptions(url: &str, count: i64) {
    metrics()
        .active_subscriptions
        .with_label_values(&[url])
        .set(count);
}
