use std::net::SocketAddr;

use tally_metrics::{Aggregator, MergeMetrics, Metric};
use tally_statsd::metric;
use tally_system::{Addr, Receiver, Service, ShutdownHandle};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::statsd::ServerCounters;

/// Reads statsd datagrams from a UDP socket and forwards decoded metrics to the aggregator.
///
/// Each datagram may contain multiple newline separated lines. Lines that fail to decode are
/// logged and skipped, the rest of the datagram is still processed. The listener stops and closes
/// its socket once shutdown is signaled.
pub struct ListenerService {
    socket: UdpSocket,
    buffer_size: usize,
    aggregator: Addr<Aggregator>,
    shutdown: ShutdownHandle,
}

impl ListenerService {
    /// Creates a listener on an already bound socket.
    pub fn new(
        socket: UdpSocket,
        buffer_size: usize,
        aggregator: Addr<Aggregator>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            socket,
            buffer_size,
            aggregator,
            shutdown,
        }
    }

    fn handle_datagram(&self, data: &[u8], peer: SocketAddr) {
        metric!(counter(ServerCounters::Datagrams) += 1);

        let mut metrics = Vec::new();
        for result in Metric::parse_all(data) {
            match result {
                Ok(metric) => metrics.push(metric),
                Err(error) => {
                    metric!(counter(ServerCounters::ParseFailed) += 1);
                    tally_log::debug!(
                        error = &error as &dyn std::error::Error,
                        %peer,
                        "dropping invalid metric",
                    );
                }
            }
        }

        if !metrics.is_empty() {
            self.aggregator.send(MergeMetrics { metrics });
        }
    }
}

/// Drops the last line of a datagram that filled the whole receive buffer.
///
/// The datagram was possibly cut off by the receive, so its last line may still decode with a
/// different value.
fn strip_truncated(data: &[u8]) -> &[u8] {
    match data.iter().rposition(|&byte| byte == b'\n') {
        Some(end) => &data[..end],
        None => &[],
    }
}

impl Service for ListenerService {
    type Interface = ();

    fn spawn_handler(self, _rx: Receiver<Self::Interface>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buffer = vec![0u8; self.buffer_size];
            let mut shutdown = self.shutdown.clone();

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.notified() => break,
                    result = self.socket.recv_from(&mut buffer) => match result {
                        Ok((len, peer)) if len == buffer.len() => {
                            tally_log::warn!(
                                %peer,
                                buffer_size = len,
                                "datagram exceeds the receive buffer, dropping its last line",
                            );
                            self.handle_datagram(strip_truncated(&buffer), peer);
                        }
                        Ok((len, peer)) => self.handle_datagram(&buffer[..len], peer),
                        Err(error) => {
                            metric!(counter(ServerCounters::ReceiveFailed) += 1);
                            tally_log::error!(
                                error = &error as &dyn std::error::Error,
                                "failed to receive datagram",
                            );
                        }
                    },
                }
            }

            tally_log::info!("listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use tally_metrics::MetricValue;
    use tally_system::Controller;

    use super::*;

    #[tokio::test]
    async fn test_handle_datagram() {
        let controller = Controller::new();
        let (aggregator, mut rx) = tally_system::channel::<Aggregator>("aggregator");

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let listener = ListenerService::new(socket, 8192, aggregator, controller.shutdown_handle());

        let peer = "127.0.0.1:1234".parse::<SocketAddr>().unwrap();
        let captures = tally_statsd::with_capturing_test_client(|| {
            listener.handle_datagram(b"a:1|c\nbroken\nb:2|ms\n", peer);
            listener.handle_datagram(b"broken", peer);
        });

        assert_eq!(
            captures,
            [
                "server.datagrams:1|c",
                "metrics.parse_failed:1|c",
                "server.datagrams:1|c",
                "metrics.parse_failed:1|c",
            ]
        );

        let Some(Aggregator::MergeMetrics(MergeMetrics { metrics })) = rx.recv().await else {
            panic!("expected merge message");
        };
        let values: Vec<_> = metrics
            .iter()
            .map(|metric| (metric.name.as_str(), metric.value))
            .collect();
        assert_eq!(
            values,
            [("a", MetricValue::Counter(1.0)), ("b", MetricValue::Timer(2.0))]
        );

        // The second datagram had no valid lines and sent nothing.
        drop(listener);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_listener_shutdown() {
        tally_test::setup();

        let controller = Controller::new();
        let (aggregator, mut rx) = tally_system::channel::<Aggregator>("aggregator");

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let listener = ListenerService::new(socket, 8192, aggregator, controller.shutdown_handle());
        let (_, handle) = listener.start_joinable();

        controller.shutdown(None);
        handle.await.unwrap();

        // The socket and the aggregator address are released with the listener.
        assert!(rx.recv().await.is_none());
        assert!(UdpSocket::bind(addr).await.is_ok());
    }

    #[test]
    fn test_strip_truncated() {
        assert_eq!(strip_truncated(b"a:1|c\nb:1|c|@0.1"), b"a:1|c");
        assert_eq!(strip_truncated(b"a:1|c\nb:2|c\n"), b"a:1|c\nb:2|c");
        assert_eq!(strip_truncated(b"a:1|c|@0.1"), b"");
    }

    #[tokio::test]
    async fn test_truncated_datagram() {
        tally_test::setup();

        let controller = Controller::new();
        let (aggregator, mut rx) = tally_system::channel::<Aggregator>("aggregator");

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let listener = ListenerService::new(socket, 16, aggregator, controller.shutdown_handle());
        let (_, handle) = listener.start_joinable();

        // The buffer cuts the sample rate of the second line to `@0.1`.
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"x:1|c\nx:1|c|@0.12", addr).await.unwrap();

        let Some(Aggregator::MergeMetrics(MergeMetrics { metrics })) = rx.recv().await else {
            panic!("expected merge message");
        };
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].value, MetricValue::Counter(1.0));
        assert_eq!(metrics[0].sample_rate, None);

        controller.shutdown(None);
        handle.await.unwrap();
    }
}
