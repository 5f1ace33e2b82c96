use tally_statsd::{CounterMetric, TimerMetric};

/// Counter metrics used by the Tally server.
pub enum ServerCounters {
    /// Number of datagrams read from the listening socket.
    Datagrams,

    /// Number of errors returned by the socket while receiving.
    ReceiveFailed,

    /// Number of lines rejected by the metric decoder.
    ///
    /// The rejected line is logged at debug level along with the sender's address.
    ParseFailed,

    /// Number of failed deliveries, including panics inside a sink.
    ///
    /// This metric is tagged with:
    ///  - `sink`: The name of the sink.
    SinkFailed,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Datagrams => "server.datagrams",
            Self::ReceiveFailed => "server.receive_failed",
            Self::ParseFailed => "metrics.parse_failed",
            Self::SinkFailed => "sink.failed",
        }
    }
}

/// Timer metrics used by the Tally server.
pub enum ServerTimers {
    /// Time in milliseconds a sink spends on the delivery of one snapshot.
    ///
    /// This metric is tagged with:
    ///  - `sink`: The name of the sink.
    SinkDeliveryDuration,
}

impl TimerMetric for ServerTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::SinkDeliveryDuration => "sink.delivery_duration",
        }
    }
}
