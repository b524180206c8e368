//! Subscriber setup shared by every suite.

use federate_tests::{init_logging, DEFAULT_LOG_FILTER};
use tracing_subscriber::EnvFilter;

#[test]
fn default_filter_parses_and_keeps_crate_levels() {
    let filter = EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
    let rendered = filter.to_string();
    assert!(rendered.contains("federate_executor=debug"));
    assert!(rendered.contains("federate_compiler=info"));
}

#[test]
fn init_logging_is_idempotent() {
    init_logging();
    init_logging();
    tracing::info!("subscriber installed");
}
