//! Delivery reports and the stream that carries them back to producers.

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Completion codes reserved by the engine. Stages may use any other
/// non-zero code for their own failure taxonomy.
pub mod code {
    /// The message reached the end of the pipeline.
    pub const SUCCESS: i32 = 0;

    /// A stage dropped its completion handle without resolving it.
    pub const ABANDONED: i32 = -1;
}

/// The terminal outcome of one injected message.
///
/// Exactly one report is emitted per accepted message, carrying back
/// the producer's opaque value for correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// The correlation value supplied at injection, returned verbatim.
    pub opaque: Value,
    /// Zero for success, any other value identifies the failure.
    pub code: i32,
    /// Human-readable outcome description.
    pub status: String,
}

impl Report {
    /// Returns `true` when the message traversed the whole pipeline.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == code::SUCCESS
    }
}

/// The consumer side of the report channel.
///
/// Obtained once from [`ForwarderBuilder::run`] and owned by the
/// producer. The channel is bounded by `queue_size`; a producer that
/// stops consuming eventually stalls the engine the same way a full
/// intake does. The stream ends after shutdown once every pending
/// report has been read.
///
/// [`ForwarderBuilder::run`]: crate::forwarder::ForwarderBuilder::run
#[derive(Debug)]
pub struct ReportStream {
    reports: mpsc::Receiver<Report>,
}

impl ReportStream {
    pub(crate) fn new(reports: mpsc::Receiver<Report>) -> Self {
        Self { reports }
    }

    /// Receives the next report, or `None` once the engine has stopped
    /// and the channel is drained.
    pub async fn recv(&mut self) -> Option<Report> {
        self.reports.recv().await
    }
}

impl Stream for ReportStream {
    type Item = Report;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().reports.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    fn report(code: i32) -> Report {
        Report { opaque: json!("op"), code, status: String::new() }
    }

    #[test]
    fn test_success_is_code_zero() {
        assert!(report(code::SUCCESS).is_success());
        assert!(!report(500).is_success());
        assert!(!report(code::ABANDONED).is_success());
    }

    #[test]
    fn test_report_serialize() {
        let r = Report { opaque: json!({"id": 9}), code: 0, status: "ok".into() };
        let json = serde_json::to_string(&r).unwrap();
        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_stream_yields_reports_then_ends() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = task::spawn(ReportStream::new(rx));

        assert_pending!(stream.poll_next());

        tx.try_send(report(0)).unwrap();
        assert!(stream.is_woken());
        let item = assert_ready!(stream.poll_next());
        assert_eq!(item, Some(report(0)));

        assert_pending!(stream.poll_next());
        drop(tx);
        assert_eq!(assert_ready!(stream.poll_next()), None);
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_close() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = ReportStream::new(rx);

        tx.try_send(report(7)).unwrap();
        drop(tx);

        assert_eq!(stream.recv().await, Some(report(7)));
        assert_eq!(stream.recv().await, None);
    }
}
