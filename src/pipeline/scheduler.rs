//! Flush policies
//!
//! Decides, at each event boundary, whether the sink's buffered rows are
//! persisted. The default schedule is a pure function of the event index so
//! that repeated runs flush at the same points:
//!
//! - every 50th event (`id > 0`)
//! - every 10th event inside the open window `(700, 850)`
//!
//! `BufferedRowsThreshold` bounds memory by row count instead.

use std::fmt;

/// Event-boundary flush decision.
pub trait FlushPolicy: Send + Sync {
    /// The rule that triggers a flush after `event_id`, if any.
    fn flush_reason(&self, event_id: i32, buffered_rows: usize) -> Option<FlushReason>;

    fn should_flush(&self, event_id: i32, buffered_rows: usize) -> bool {
        self.flush_reason(event_id, buffered_rows).is_some()
    }

    /// Human-readable description for the startup banner.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Baseline,
    ElevatedWindow,
    RowThreshold,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushReason::Baseline => write!(f, "baseline"),
            FlushReason::ElevatedWindow => write!(f, "elevated window"),
            FlushReason::RowThreshold => write!(f, "row threshold"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventIndexSchedule {
    pub baseline_every: i32,
    /// Open interval of event ids with the denser cadence
    pub window: (i32, i32),
    pub window_every: i32,
}

impl Default for EventIndexSchedule {
    fn default() -> Self {
        Self {
            baseline_every: 50,
            window: (700, 850),
            window_every: 10,
        }
    }
}

impl EventIndexSchedule {
    /// Which rule triggers a flush after `event_id`, if any.
    pub fn reason(&self, event_id: i32) -> Option<FlushReason> {
        if event_id > 0 && event_id % self.baseline_every == 0 {
            return Some(FlushReason::Baseline);
        }
        if event_id > self.window.0 && event_id < self.window.1 && event_id % self.window_every == 0
        {
            return Some(FlushReason::ElevatedWindow);
        }
        None
    }
}

impl FlushPolicy for EventIndexSchedule {
    fn flush_reason(&self, event_id: i32, _buffered_rows: usize) -> Option<FlushReason> {
        self.reason(event_id)
    }

    fn describe(&self) -> String {
        format!(
            "every {} events, every {} in ({}, {})",
            self.baseline_every, self.window_every, self.window.0, self.window.1
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferedRowsThreshold {
    pub max_rows: usize,
}

impl FlushPolicy for BufferedRowsThreshold {
    fn flush_reason(&self, _event_id: i32, buffered_rows: usize) -> Option<FlushReason> {
        (buffered_rows >= self.max_rows).then_some(FlushReason::RowThreshold)
    }

    fn describe(&self) -> String {
        format!("when {} rows are buffered", self.max_rows)
    }
}

/// Flush policy selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicyKind {
    EventIndex,
    BufferedRows(usize),
}

impl FlushPolicyKind {
    pub fn build(&self) -> Box<dyn FlushPolicy> {
        match self {
            FlushPolicyKind::EventIndex => Box::new(EventIndexSchedule::default()),
            FlushPolicyKind::BufferedRows(max_rows) => Box::new(BufferedRowsThreshold {
                max_rows: *max_rows,
            }),
        }
    }
}

impl Default for FlushPolicyKind {
    fn default() -> Self {
        FlushPolicyKind::EventIndex
    }
}
