use std::time::Duration;

use tokio::sync::watch;

/// Shutdown request message sent by the [`Controller`] to subscribed services.
///
/// A handler has to ensure that it doesn't take longer than `timeout` to resolve the future.
/// Ideally, open work is persisted or finished in an orderly manner but no new requests are
/// accepted anymore.
///
/// After the timeout the system will shut down regardless of what the receivers of this message
/// do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

/// Notifies a service about an upcoming shutdown.
///
/// Obtain a handle through [`Controller::shutdown_handle`]. Every service that needs to react to
/// a shutdown keeps its own handle and awaits [`notified`](Self::notified) in its main loop.
#[derive(Clone, Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Returns the current shutdown state without waiting.
    pub fn get(&self) -> Option<Shutdown> {
        *self.0.borrow()
    }

    /// Wait for a shutdown.
    ///
    /// This receives all shutdown signals since the [`Controller`] has been created. If the
    /// controller is dropped without requesting a shutdown, this resolves to an immediate
    /// shutdown.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }

            if self.0.changed().await.is_err() {
                return Shutdown { timeout: None };
            }
        }
    }
}

/// Service to start and gracefully stop a group of services.
///
/// The controller is owned by the component that starts the services, such as the server. It hands
/// out [`ShutdownHandle`]s to services, which are notified once [`shutdown`](Self::shutdown) is
/// called. Dropping the controller notifies all handles with an immediate shutdown.
///
/// ### Example
///
/// ```
/// use std::time::Duration;
/// use tally_system::Controller;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let controller = Controller::new();
/// let mut shutdown = controller.shutdown_handle();
///
/// tokio::spawn(async move {
///     let _ = shutdown.notified().await;
///     // Clean up and stop.
/// });
///
/// controller.shutdown(Some(Duration::from_secs(1)));
/// # }
/// ```
#[derive(Debug)]
pub struct Controller {
    tx: watch::Sender<Option<Shutdown>>,
}

impl Controller {
    /// Creates a new controller that has not been shut down.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Returns a [handle](ShutdownHandle) to receive shutdown notifications.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.tx.subscribe())
    }

    /// Performs a graceful shutdown with the given timeout.
    ///
    /// This sends a [`Shutdown`] message to all handles. Only the first call has an effect.
    pub fn shutdown(&self, timeout: Option<Duration>) {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }

            *state = Some(Shutdown { timeout });
            true
        });
    }

    /// Returns `true` if a shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Waits for a termination signal sent to the process.
    ///
    /// `SIGINT` is handled as a forced shutdown, returning `None` as timeout. `SIGTERM` returns the
    /// graceful shutdown `timeout`. On non-unix platforms, only Ctrl-C is handled.
    pub async fn wait_for_signal(timeout: Duration) -> Option<Duration> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(signal) => signal,
                Err(error) => {
                    tally_log::error!(
                        error = &error as &dyn std::error::Error,
                        "failed to listen for SIGINT"
                    );
                    return None;
                }
            };

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(error) => {
                    tally_log::error!(
                        error = &error as &dyn std::error::Error,
                        "failed to listen for SIGTERM"
                    );
                    return None;
                }
            };

            tokio::select! {
                _ = sigint.recv() => {
                    tally_log::info!("SIGINT received, exiting");
                    None
                }
                _ = sigterm.recv() => {
                    tally_log::info!("SIGTERM received, stopping in {}s", timeout.as_secs());
                    Some(timeout)
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tally_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to listen for Ctrl-C"
                );
            }

            tally_log::info!("Ctrl-C received, exiting");
            None
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notified_after_shutdown() {
        let controller = Controller::new();
        let mut handle = controller.shutdown_handle();
        assert_eq!(handle.get(), None);

        let timeout = Some(Duration::from_secs(3));
        controller.shutdown(timeout);

        assert!(controller.is_shutting_down());
        assert_eq!(handle.notified().await, Shutdown { timeout });
    }

    #[tokio::test]
    async fn test_handle_created_after_shutdown() {
        let controller = Controller::new();
        controller.shutdown(None);

        let mut handle = controller.shutdown_handle();
        assert_eq!(handle.notified().await, Shutdown { timeout: None });
    }

    #[tokio::test]
    async fn test_only_first_shutdown_counts() {
        let controller = Controller::new();
        let handle = controller.shutdown_handle();

        controller.shutdown(Some(Duration::from_secs(1)));
        controller.shutdown(None);

        assert_eq!(
            handle.get(),
            Some(Shutdown {
                timeout: Some(Duration::from_secs(1))
            })
        );
    }

    #[tokio::test]
    async fn test_dropped_controller_forces_shutdown() {
        let controller = Controller::new();
        let mut handle = controller.shutdown_handle();
        drop(controller);

        assert_eq!(handle.notified().await, Shutdown { timeout: None });
    }

    #[tokio::test(start_paused = true)]
    async fn test_notified_waits() {
        let controller = Controller::new();
        let mut handle = controller.shutdown_handle();

        let waiter = tokio::spawn(async move { handle.notified().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        controller.shutdown(None);
        assert_eq!(waiter.await.unwrap(), Shutdown { timeout: None });
    }
}
