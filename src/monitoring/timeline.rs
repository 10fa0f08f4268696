//! Execution Timeline
//!
//! Tracks stage start/retry/end times on the engine's synthetic clock for
//! the run summary and the ASCII Gantt chart.

use std::time::Duration;

use serde::Serialize;

use crate::execution::pipeline::Stage;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Stage started executing
    Started,
    /// Stage failed and was re-attempted
    Retried,
    /// Stage completed successfully
    Completed,
    /// Stage failed terminally
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEvent {
    pub stage: Stage,
    pub event_type: EventType,
    /// Offset from the start of the run
    #[serde(rename = "at_ms", serialize_with = "as_millis")]
    pub at: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Tracks the execution timeline of one engine run.
///
/// Time does not come from the wall clock: the engine advances it by each
/// delay it fires, so two identical runs produce identical timelines.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    now: Duration,
}

impl ExecutionTimeline {
    /// Creates a new timeline at offset zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the timeline clock forward.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Records an event for a stage at the current offset.
    pub fn add_event(&mut self, stage: Stage, event_type: EventType) {
        self.events.push(TimelineEvent {
            stage,
            event_type,
            at: self.now,
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Synthetic time elapsed since the run started.
    pub fn elapsed(&self) -> Duration {
        self.now
    }

    /// Number of retries recorded for a stage.
    pub fn retries(&self, stage: Stage) -> usize {
        self.events
            .iter()
            .filter(|e| e.stage == stage && e.event_type == EventType::Retried)
            .count()
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each stage is shown as a bar indicating when it ran relative to the
    /// total execution time. Retries are marked with `r`.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.now.as_millis();

        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        for stage in Stage::ALL {
            let Some((start, end)) = self.span(stage) else {
                continue;
            };
            let start = start.as_millis();
            let end = end.as_millis();
            if end <= start {
                continue;
            }

            let start_pos = (start as f64 * scale) as usize;
            let duration = ((end - start) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(duration));

            let retries = self.retries(stage);
            let marker = if retries > 0 {
                format!(" {}", "r".repeat(retries))
            } else {
                String::new()
            };

            output.push_str(&format!(
                "{:15} |{:50}| ({} ms){}\n",
                truncate(&stage.to_string(), 15),
                bar,
                end - start,
                marker
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns the start and terminal offsets of a stage, if it finished.
    fn span(&self, stage: Stage) -> Option<(Duration, Duration)> {
        let start = self
            .events
            .iter()
            .find(|e| e.stage == stage && e.event_type == EventType::Started)?
            .at;
        let end = self
            .events
            .iter()
            .rev()
            .find(|e| {
                e.stage == stage
                    && matches!(e.event_type, EventType::Completed | EventType::Failed)
            })?
            .at;
        Some((start, end))
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(900);

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.events.is_empty());
        assert_eq!(timeline.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_add_events() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(Stage::FetchContext, EventType::Started);
        timeline.advance(TICK);
        timeline.add_event(Stage::FetchContext, EventType::Completed);

        assert_eq!(timeline.events.len(), 2);
        assert_eq!(timeline.events[1].at, TICK);
    }

    #[test]
    fn test_span_covers_retries() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(Stage::FetchContext, EventType::Started);
        timeline.advance(TICK);
        timeline.add_event(Stage::FetchContext, EventType::Retried);
        timeline.advance(TICK);
        timeline.add_event(Stage::FetchContext, EventType::Completed);

        assert_eq!(timeline.span(Stage::FetchContext), Some((Duration::ZERO, TICK * 2)));
        assert_eq!(timeline.retries(Stage::FetchContext), 1);
    }

    #[test]
    fn test_unfinished_stage_has_no_span() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(Stage::LocateElement, EventType::Started);

        assert!(timeline.span(Stage::LocateElement).is_none());
        assert!(!timeline.gantt_chart().contains("locate-element"));
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event(Stage::FetchContext, EventType::Started);
        timeline.advance(TICK);
        timeline.add_event(Stage::FetchContext, EventType::Completed);

        timeline.add_event(Stage::LocateElement, EventType::Started);
        timeline.advance(TICK);
        timeline.add_event(Stage::LocateElement, EventType::Retried);
        timeline.advance(TICK);
        timeline.add_event(Stage::LocateElement, EventType::Failed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("fetch-context"));
        assert!(chart.contains("locate-element"));
        assert!(chart.contains("(1800 ms) r"));
        assert!(chart.contains("Total: 2700 ms"));
    }

    #[test]
    fn test_gantt_chart_empty() {
        let timeline = ExecutionTimeline::new();
        let chart = timeline.gantt_chart();
        assert!(chart.contains("Timeline"));
        assert!(!chart.contains("Total"));
    }

    #[test]
    fn test_event_serialization() {
        let mut timeline = ExecutionTimeline::new();
        timeline.advance(TICK);
        timeline.add_event(Stage::PerformAction, EventType::Started);

        let json = serde_json::to_string(&timeline.get_events()[0]).unwrap();
        assert_eq!(
            json,
            r#"{"stage":"perform-action","event_type":"started","at_ms":900}"#
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("validate-result-long", 10), "validat...");
    }
}
