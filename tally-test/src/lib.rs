//! Test utilities shared by the Tally crates.
//!
//! Call [`setup`] at the start of every test that logs. Services under test can be connected to
//! mocks created with [`mock_service`] or [`mock_recorder`] in place of their real peers:
//!
//! ```no_run
//! # struct Flush;
//! # impl tally_system::Interface for Flush {}
//! # async fn test_flushes() {
//! tally_test::setup();
//!
//! let (addr, handle) = tally_test::mock_recorder::<Flush>("sink");
//! // Hand `addr` to the service under test, then stop it.
//! drop(addr);
//!
//! let received = handle.await.unwrap();
//! assert!(received.is_empty());
//! # }
//! ```

use tally_system::{Addr, Interface};
use tokio::task::JoinHandle;

/// Prepares the test environment.
///
/// Logs of the calling crate are captured by the test runner and shown for failing tests.
pub fn setup() {
    tally_log::init_test!();
}

/// Spawns a service that folds every received message into `state`.
///
/// The returned handle resolves to the final state once all [`Addr`]s have been dropped.
pub fn mock_service<S, I, F>(name: &'static str, state: S, mut f: F) -> (Addr<I>, JoinHandle<S>)
where
    S: Send + 'static,
    I: Interface,
    F: FnMut(&mut S, I) + Send + 'static,
{
    let (addr, mut rx) = tally_system::channel(name);

    let handle = tokio::spawn(async move {
        let mut state = state;
        while let Some(message) = rx.recv().await {
            f(&mut state, message);
        }
        state
    });

    (addr, handle)
}

/// Spawns a service that records every message it receives, in order.
pub fn mock_recorder<I: Interface>(name: &'static str) -> (Addr<I>, JoinHandle<Vec<I>>) {
    mock_service(name, Vec::new(), |messages: &mut Vec<I>, message| {
        messages.push(message)
    })
}
