//! Report sinks for per-access outcomes.

use sieve_core::{AccessReport, ReportSink};
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// Emits each report as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn record(&self, report: &AccessReport) {
        tracing::info!(
            querier = %report.querier,
            outcome = %report.outcome,
            policy_count = report.policy_count,
            guard_parts = report.guard_parts,
            policy_retrieval_us = report.timings.policy_retrieval.as_micros() as u64,
            guard_generation_us = report.timings.guard_generation.as_micros() as u64,
            execution_us = report.timings.execution.as_micros() as u64,
            "Guarded access"
        );
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    reports: Mutex<Vec<AccessReport>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all reports recorded so far, oldest first.
    pub fn reports(&self) -> Vec<AccessReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return all reports.
    pub fn drain(&self) -> Vec<AccessReport> {
        std::mem::take(&mut *self.reports.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ReportSink for MemoryReportSink {
    fn record(&self, report: &AccessReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
    }
}

/// Forwards reports over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReportSink {
    tx: mpsc::UnboundedSender<AccessReport>,
}

impl ChannelReportSink {
    /// Create a sink and the receiving half of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AccessReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReportSink for ChannelReportSink {
    fn record(&self, report: &AccessReport) {
        if self.tx.send(report.clone()).is_err() {
            tracing::trace!(querier = %report.querier, "Report receiver dropped");
        }
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesReportSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesReportSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer, e.g. to read back a buffer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ReportSink for JsonLinesReportSink<W> {
    fn record(&self, report: &AccessReport) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let written = serde_json::to_writer(&mut *writer, report)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(e) = written {
            tracing::warn!(
                querier = %report.querier,
                error = %e,
                "Failed to write access report"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sieve_core::{AccessOutcome, AccessTimings, QuerierId};

    fn report(querier: &str, outcome: AccessOutcome) -> AccessReport {
        AccessReport {
            querier: QuerierId::new(querier),
            outcome,
            policy_count: 3,
            guard_parts: 1,
            timings: AccessTimings::default(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemoryReportSink::new();
        assert!(sink.is_empty());
        sink.record(&report("u1", AccessOutcome::Miss));
        sink.record(&report("u1", AccessOutcome::Hit));

        let outcomes: Vec<_> = sink.reports().iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![AccessOutcome::Miss, AccessOutcome::Hit]);
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelReportSink::new();
        sink.record(&report("u2", AccessOutcome::SoftHit));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.querier, QuerierId::new("u2"));
        assert_eq!(received.outcome, AccessOutcome::SoftHit);

        drop(rx);
        // Receiver gone: recording must not panic.
        sink.record(&report("u2", AccessOutcome::Hit));
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = JsonLinesReportSink::new(Vec::new());
        sink.record(&report("u1", AccessOutcome::Regenerate));
        sink.record(&report("u2", AccessOutcome::Hit));

        let buffer = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = buffer
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["outcome"], "regenerate");
        assert_eq!(lines[1]["querier"], "u2");
        assert_eq!(lines[1]["policy_count"], 3);
    }

    #[test]
    fn test_tracing_sink_accepts_reports() {
        TracingReportSink.record(&report("u1", AccessOutcome::Miss));
    }
}
