//! Engine counters exposed in Prometheus text format

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for sends, failures, replies and tracking hits
pub struct EngineMetrics {
    registry: Registry,
    pub runs: IntCounter,
    pub sends: IntCounter,
    pub processing_errors: IntCounter,
    pub replies_detected: IntCounter,
    pub tracking_events: IntCounterVec,
}

impl EngineMetrics {
    /// Create counters in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("cadence".to_string()), None)?;

        let runs = IntCounter::new("engine_runs_total", "Scheduler invocations")?;
        let sends = IntCounter::new("emails_sent_total", "Campaign emails handed to the transport")?;
        let processing_errors = IntCounter::new(
            "enrollment_errors_total",
            "Enrollments that failed during processing",
        )?;
        let replies_detected = IntCounter::new("replies_detected_total", "Replies detected in threads")?;
        let tracking_events = IntCounterVec::new(
            Opts::new("tracking_events_total", "Tracking endpoint hits"),
            &["event"],
        )?;

        registry.register(Box::new(runs.clone()))?;
        registry.register(Box::new(sends.clone()))?;
        registry.register(Box::new(processing_errors.clone()))?;
        registry.register(Box::new(replies_detected.clone()))?;
        registry.register(Box::new(tracking_events.clone()))?;

        Ok(Self {
            registry,
            runs,
            sends,
            processing_errors,
            replies_detected,
            tracking_events,
        })
    }

    /// Count a tracking endpoint hit (`opened`, `clicked`, `unsubscribed`)
    pub fn track(&self, event: &str) {
        self.tracking_events.with_label_values(&[event]).inc();
    }

    /// Render all counters in the text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.sends.inc();
        metrics.track("clicked");

        let text = metrics.render().unwrap();
        assert!(text.contains("cadence_emails_sent_total 1"));
        assert!(text.contains(r#"cadence_tracking_events_total{event="clicked"} 1"#));
    }
}
