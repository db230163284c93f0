/*! Integration tests for elemsync.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - binding: Tests for binding, rebinding and writing through binding handles
 * - observer: Tests for remote refreshes reaching bindings
 * - awareness: Tests for presence aggregation across clients
 * - migration: Tests for the legacy layout migration across peers
 * - engine: Tests for engine lifecycle and configuration
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("elemsync=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod awareness;
mod binding;
mod engine;
mod migration;
mod observer;
