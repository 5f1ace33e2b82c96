use std::fmt;
use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};

/// Type used for counter increments.
pub type CounterType = f64;

/// Type used for gauge values.
pub type GaugeType = f64;

/// Type used for timing samples, in milliseconds.
pub type TimerType = f64;

/// The [typed value](Metric::value) of a metric.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum MetricValue {
    /// Adds a signed delta to a counter. See [`MetricType::Counter`].
    #[serde(rename = "c")]
    Counter(CounterType),
    /// Overwrites the value of a gauge. See [`MetricType::Gauge`].
    #[serde(rename = "g")]
    Gauge(GaugeType),
    /// Appends a duration sample to a timer. See [`MetricType::Timer`].
    #[serde(rename = "ms")]
    Timer(TimerType),
}

impl MetricValue {
    /// Returns the type of this value.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::Counter,
            Self::Gauge(_) => MetricType::Gauge,
            Self::Timer(_) => MetricType::Timer,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Counter(value) => value.fmt(f),
            MetricValue::Gauge(value) => value.fmt(f),
            MetricValue::Timer(value) => value.fmt(f),
        }
    }
}

/// The type of a [`MetricValue`], determining its aggregation and reduction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MetricType {
    /// Counts instances of an event.
    ///
    /// Counters are adjusted by signed deltas. A delta submitted with a sample rate `r` is scaled
    /// by `1 / r` before it is added.
    Counter,
    /// Stores the last reported value.
    Gauge,
    /// Collects duration samples in milliseconds.
    ///
    /// On flush, timers are reduced to their minimum, maximum, mean, count and a percentile value.
    Timer,
}

impl MetricType {
    /// Return the shortcode for this metric type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
            MetricType::Timer => "ms",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricType {
    type Err = ParseMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "c" => Self::Counter,
            "g" => Self::Gauge,
            "ms" => Self::Timer,
            _ => return Err(ParseMetricError::UnknownType),
        })
    }
}

/// An error returned by [`Metric::parse`] and [`Metric::parse_all`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseMetricError {
    /// The line is not valid UTF-8.
    #[error("metric line is not valid utf-8")]
    InvalidUtf8,
    /// There is no `:` separating the name from the value.
    #[error("missing value separator")]
    MissingValue,
    /// There is no `|` separating the value from the type.
    #[error("missing type separator")]
    MissingType,
    /// The name is empty after normalization.
    #[error("invalid metric name")]
    InvalidName,
    /// The value is not a finite number, or a timer value is negative.
    #[error("invalid metric value")]
    InvalidValue,
    /// The type is not one of `c`, `g` or `ms`.
    #[error("unknown metric type")]
    UnknownType,
    /// The sample rate of a counter is not within `(0, 1]`.
    #[error("invalid sample rate")]
    InvalidSampleRate,
}

/// Sanitizes a metric name.
///
/// Slashes are replaced with dashes, runs of whitespace collapse into a single underscore, and all
/// remaining characters outside of `[A-Za-z0-9_.-]` are removed. The result may be empty.
///
/// # Example
///
/// ```
/// use tally_metrics::normalize_key;
///
/// assert_eq!(normalize_key("api/users  latency"), "api-users_latency");
/// assert_eq!(normalize_key("ok!"), "ok");
/// ```
pub fn normalize_key(key: &str) -> String {
    let mut normalized = String::with_capacity(key.len());
    let mut in_whitespace = false;

    for c in key.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                normalized.push('_');
            }
            in_whitespace = true;
            continue;
        }

        in_whitespace = false;
        let c = if c == '/' { '-' } else { c };
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
            normalized.push(c);
        }
    }

    normalized
}

/// Parses a counter sample rate, which must be within `(0, 1]`.
fn parse_sample_rate(string: &str) -> Result<f64, ParseMetricError> {
    let rate = string
        .parse::<f64>()
        .map_err(|_| ParseMetricError::InvalidSampleRate)?;

    if rate > 0.0 && rate <= 1.0 {
        Ok(rate)
    } else {
        Err(ParseMetricError::InvalidSampleRate)
    }
}

/// A single metric value decoded from the statsd line protocol.
///
/// The protocol is line based. Each line has the format:
///
/// ```text
/// <name>:<value>|<type>[|@<sample_rate>][|<extra>]
/// ```
///
/// Lines are separated by `\n` or `\r\n` within a datagram.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Metric {
    /// The normalized name of the metric.
    ///
    /// See [`normalize_key`] for the character set. Counters, gauges and timers with the same name
    /// are aggregated independently.
    pub name: String,
    /// The value of the metric.
    #[serde(flatten)]
    pub value: MetricValue,
    /// The sample rate of a counter, in `(0, 1]`.
    ///
    /// Submitted with a leading `@`, for example `requests:1|c|@0.1`. Only counters honor the
    /// sample rate, it is always `None` for gauges and timers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
}

impl Metric {
    fn parse_str(string: &str) -> Result<Self, ParseMetricError> {
        let (raw_name, rest) = string
            .split_once(':')
            .ok_or(ParseMetricError::MissingValue)?;

        let mut components = rest.split('|');
        let raw_value = components.next().unwrap_or_default();
        let ty: MetricType = components
            .next()
            .ok_or(ParseMetricError::MissingType)?
            .parse()?;

        let name = normalize_key(raw_name);
        if name.is_empty() {
            return Err(ParseMetricError::InvalidName);
        }

        let value = raw_value
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or(ParseMetricError::InvalidValue)?;

        let value = match ty {
            MetricType::Counter => MetricValue::Counter(value),
            MetricType::Gauge => MetricValue::Gauge(value),
            MetricType::Timer if value < 0.0 => return Err(ParseMetricError::InvalidValue),
            MetricType::Timer => MetricValue::Timer(value),
        };

        let mut sample_rate = None;
        if ty == MetricType::Counter {
            for component in components {
                if let Some(rate) = component.strip_prefix('@') {
                    sample_rate = Some(parse_sample_rate(rate)?);
                }
            }
        }

        Ok(Self {
            name,
            value,
            sample_rate,
        })
    }

    /// Returns the value to apply to the aggregate, scaled by the inverse sample rate.
    pub fn scaled_value(&self) -> f64 {
        match self.value {
            MetricValue::Counter(value) => match self.sample_rate {
                Some(rate) => value / rate,
                None => value,
            },
            MetricValue::Gauge(value) | MetricValue::Timer(value) => value,
        }
    }

    /// Parses a single metric value from the raw protocol.
    ///
    /// See the [`Metric`] for more information on the protocol.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_metrics::Metric;
    ///
    /// let metric = Metric::parse(b"response_time:57|ms").expect("metric should parse");
    /// ```
    pub fn parse(slice: &[u8]) -> Result<Self, ParseMetricError> {
        let string = std::str::from_utf8(slice).or(Err(ParseMetricError::InvalidUtf8))?;
        Self::parse_str(string)
    }

    /// Parses a set of metric values from the raw protocol.
    ///
    /// Returns a metric result for each line in `slice`, ignoring empty lines. Both UNIX newlines
    /// (`\n`) and Windows newlines (`\r\n`) are supported.
    ///
    /// It is possible to continue consuming the iterator after `Err` is yielded.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_metrics::Metric;
    ///
    /// let data = br#"
    /// endpoint.response_time:57|ms
    /// endpoint.hits:1|c
    /// "#;
    ///
    /// for metric_result in Metric::parse_all(data) {
    ///     let metric = metric_result.expect("metric should parse");
    ///     assert!(metric.name.starts_with("endpoint."));
    /// }
    /// ```
    pub fn parse_all(slice: &[u8]) -> ParseMetrics<'_> {
        ParseMetrics { slice }
    }
}

/// Iterator over parsed metrics returned from [`Metric::parse_all`].
#[derive(Clone, Debug, Default)]
pub struct ParseMetrics<'a> {
    slice: &'a [u8],
}

impl Iterator for ParseMetrics<'_> {
    type Item = Result<Metric, ParseMetricError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            let string = match std::str::from_utf8(current) {
                Ok(string) => string.strip_suffix('\r').unwrap_or(string),
                Err(_) => return Some(Err(ParseMetricError::InvalidUtf8)),
            };

            if !string.is_empty() {
                return Some(Metric::parse_str(string));
            }
        }
    }
}

impl FusedIterator for ParseMetrics<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("a/b c"), "a-b_c");
        assert_eq!(normalize_key("a \t\n b"), "a_b");
        assert_eq!(normalize_key("sys.cpu_load-1"), "sys.cpu_load-1");
        assert_eq!(normalize_key("ðŸ˜Ž!#$%"), "");
        assert_eq!(normalize_key(""), "");
    }

    #[test]
    fn test_normalize_key_whitespace_around_dropped() {
        // Dropped characters split whitespace runs.
        assert_eq!(normalize_key("a \0 b"), "a__b");
    }

    #[test]
    fn test_parse_garbage() {
        let s = "x23-408j17z4232@#34d\nc3456y7^ðŸ˜Ž";
        let result = Metric::parse(s.as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_counter() {
        let s = "transactions/foo:42|c";
        let metric = Metric::parse(s.as_bytes()).unwrap();
        insta::assert_debug_snapshot!(metric, @r###"
        Metric {
            name: "transactions-foo",
            value: Counter(
                42.0,
            ),
            sample_rate: None,
        }
        "###);
    }

    #[test]
    fn test_parse_counter_sample_rate() {
        let s = "gorets:1|c|@0.1";
        let metric = Metric::parse(s.as_bytes()).unwrap();
        insta::assert_debug_snapshot!(metric, @r###"
        Metric {
            name: "gorets",
            value: Counter(
                1.0,
            ),
            sample_rate: Some(
                0.1,
            ),
        }
        "###);
        assert_eq!(metric.scaled_value(), 10.0);
    }

    #[test]
    fn test_parse_negative_counter() {
        let metric = Metric::parse(b"balance:-3.5|c").unwrap();
        assert_eq!(metric.value, MetricValue::Counter(-3.5));
    }

    #[test]
    fn test_parse_gauge() {
        let s = "gaugor:333|g";
        let metric = Metric::parse(s.as_bytes()).unwrap();
        insta::assert_debug_snapshot!(metric, @r###"
        Metric {
            name: "gaugor",
            value: Gauge(
                333.0,
            ),
            sample_rate: None,
        }
        "###);
    }

    #[test]
    fn test_parse_timer() {
        let s = "glork:320|ms";
        let metric = Metric::parse(s.as_bytes()).unwrap();
        insta::assert_debug_snapshot!(metric, @r###"
        Metric {
            name: "glork",
            value: Timer(
                320.0,
            ),
            sample_rate: None,
        }
        "###);
    }

    #[test]
    fn test_parse_sample_rate_ignored_for_gauges_and_timers() {
        let gauge = Metric::parse(b"g:1|g|@0.5").unwrap();
        assert_eq!(gauge.sample_rate, None);
        assert_eq!(gauge.scaled_value(), 1.0);

        let timer = Metric::parse(b"t:1|ms|@7").unwrap();
        assert_eq!(timer.sample_rate, None);
    }

    #[test]
    fn test_parse_ignores_unknown_extras() {
        let metric = Metric::parse(b"hits:2|c|#region:eu|@0.5").unwrap();
        assert_eq!(metric.value, MetricValue::Counter(2.0));
        assert_eq!(metric.sample_rate, Some(0.5));
    }

    #[test]
    fn test_parse_invalid_sample_rate() {
        for rate in ["@0", "@-0.5", "@1.5", "@abc", "@"] {
            let line = format!("hits:1|c|{rate}");
            assert_eq!(
                Metric::parse(line.as_bytes()),
                Err(ParseMetricError::InvalidSampleRate),
                "{line}"
            );
        }
    }

    #[test]
    fn test_parse_sample_rate_one() {
        let metric = Metric::parse(b"hits:4|c|@1").unwrap();
        assert_eq!(metric.scaled_value(), 4.0);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Metric::parse(b"foo|c"),
            Err(ParseMetricError::MissingValue)
        );
        assert_eq!(Metric::parse(b"foo:1"), Err(ParseMetricError::MissingType));
        assert_eq!(Metric::parse(b":1|c"), Err(ParseMetricError::InvalidName));
        assert_eq!(Metric::parse(b"!!:1|c"), Err(ParseMetricError::InvalidName));
        assert_eq!(Metric::parse(b"foo:|c"), Err(ParseMetricError::InvalidValue));
        assert_eq!(
            Metric::parse(b"foo:bar|c"),
            Err(ParseMetricError::InvalidValue)
        );
        assert_eq!(
            Metric::parse(b"foo:inf|g"),
            Err(ParseMetricError::InvalidValue)
        );
        assert_eq!(
            Metric::parse(b"foo:NaN|g"),
            Err(ParseMetricError::InvalidValue)
        );
        assert_eq!(
            Metric::parse(b"foo:-1|ms"),
            Err(ParseMetricError::InvalidValue)
        );
        assert_eq!(Metric::parse(b"foo:1|d"), Err(ParseMetricError::UnknownType));
        assert_eq!(
            Metric::parse(b"foo:1|\xff"),
            Err(ParseMetricError::InvalidUtf8)
        );
    }

    #[test]
    fn test_parse_name_normalized() {
        let metric = Metric::parse(b"api/users  latency!:12|ms").unwrap();
        assert_eq!(metric.name, "api-users_latency");
    }

    #[test]
    fn test_parse_all() {
        let s = "transactions/foo:42|c\nbar:17|ms";
        let metrics: Vec<Metric> = Metric::parse_all(s.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name, "transactions-foo");
        assert_eq!(metrics[1].value, MetricValue::Timer(17.0));
    }

    #[test]
    fn test_parse_all_crlf() {
        let s = "transactions/foo:42|c\r\nbar:17|ms";
        let metrics: Vec<Metric> = Metric::parse_all(s.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(metrics.len(), 2);
    }

    #[test]
    fn test_parse_all_empty_lines() {
        let s = "transactions/foo:42|c\n\n\nbar:17|ms\n";
        let count = Metric::parse_all(s.as_bytes()).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_parse_all_continues_after_error() {
        let s = "a:1|c\nbroken\nb:2|g\nc:x|ms\nd:3|ms";
        let results: Vec<_> = Metric::parse_all(s.as_bytes()).collect();

        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
        assert_eq!(results[1], Err(ParseMetricError::MissingValue));
        assert_eq!(results[3], Err(ParseMetricError::InvalidValue));
    }

    #[test]
    fn test_parse_all_fused() {
        let mut iter = Metric::parse_all(b"a:1|c");
        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_serialize_metric() {
        let metric = Metric::parse(b"gorets:1|c|@0.5").unwrap();
        let json = serde_json::to_string(&metric).unwrap();
        insta::assert_snapshot!(json, @r###"{"name":"gorets","type":"c","value":1.0,"sample_rate":0.5}"###);
    }
}
