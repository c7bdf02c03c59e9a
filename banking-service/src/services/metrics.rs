//! Domain metrics for banking-service, exported through the global
//! Prometheus recorder installed at startup.

use metrics::{counter, histogram};
use std::time::Instant;

/// Store operation latency by operation name.
pub fn record_db_query(operation: &'static str, started: Instant) {
    histogram!("banking_db_query_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

/// Login attempts by outcome (success, invalid_credentials, locked).
pub fn login_attempt(outcome: &'static str) {
    counter!("banking_login_attempts_total", "outcome" => outcome).increment(1);
}

pub fn token_reuse_detected() {
    counter!("banking_token_reuse_detected_total").increment(1);
}

pub fn transfer_created() {
    counter!("banking_transfers_created_total").increment(1);
}

/// Transaction decisions by resulting status.
pub fn transaction_decided(status: &'static str) {
    counter!("banking_transaction_decisions_total", "status" => status).increment(1);
}

pub fn settlement_failed() {
    counter!("banking_settlement_failures_total").increment(1);
}

/// Requests turned away by admission control, by limiter scope.
pub fn admission_denied(scope: &'static str) {
    counter!("banking_admission_denied_total", "scope" => scope).increment(1);
}

pub fn access_denied() {
    counter!("banking_access_denied_total").increment(1);
}

pub fn audit_write_failed() {
    counter!("banking_audit_write_failures_total").increment(1);
}
