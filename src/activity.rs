//! Append-only activity log of one test execution.
//!
//! Every collected activity takes the next sequence number, so the log order is the evidence order. A log holds
//! at most one start, one end and one exception; collecting one of those again replaces the earlier entry, and
//! the replacement is appended with a fresh sequence number.

use unitrun_core::{ActivityKind, ActivityRecord, UnitTestId};

use crate::procedure::ProcedureError;

/// An activity collected during a test execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub sequence: u32,
    pub kind: ActivityKind,
}

impl Activity {
    pub fn is_failed_assertion(&self) -> bool {
        matches!(self.kind, ActivityKind::Assertion { result: false, .. })
    }

    fn to_record(&self, unit_test: UnitTestId) -> ActivityRecord {
        ActivityRecord { unit_test, sequence: self.sequence, kind: self.kind.clone() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Singleton {
    Start,
    End,
    Exception,
}

impl Singleton {
    fn matches(self, kind: &ActivityKind) -> bool {
        matches!(
            (self, kind),
            (Self::Start, ActivityKind::Start { .. })
                | (Self::End, ActivityKind::End { .. })
                | (Self::Exception, ActivityKind::Exception { .. })
        )
    }
}

/// Sequence-numbered activities, in collection order.
#[derive(Debug, Default)]
pub struct ActivityLog {
    next_sequence: u32,
    activities: Vec<Activity>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: ActivityKind) -> &Activity {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.activities.push(Activity { sequence, kind });
        &self.activities[self.activities.len() - 1]
    }

    fn replace(&mut self, singleton: Singleton, kind: ActivityKind) -> &Activity {
        if let Some(index) = self.activities.iter().position(|activity| singleton.matches(&activity.kind)) {
            tracing::debug!(activity = kind.label(), "replacing previously collected activity");
            self.activities.remove(index);
        }
        self.push(kind)
    }

    pub fn start(&mut self, result: bool, message: Option<String>) -> &Activity {
        self.replace(Singleton::Start, ActivityKind::Start { result, message })
    }

    pub fn end(&mut self, result: bool, message: Option<String>) -> &Activity {
        self.replace(Singleton::End, ActivityKind::End { result, message })
    }

    pub fn exception(&mut self, error: &ProcedureError) -> &Activity {
        let kind = ActivityKind::Exception {
            message: error.root_cause().message().to_string(),
            stack_trace: error.full_trace(),
        };
        self.replace(Singleton::Exception, kind)
    }

    /// Collect an assertion; the failure message is only kept for failed assertions.
    pub fn assertion(&mut self, name: impl Into<String>, result: bool, failure_message: Option<String>) -> &Activity {
        let message = if result { None } else { failure_message };
        self.push(ActivityKind::Assertion { name: name.into(), result, message })
    }

    pub fn step(&mut self, message: impl Into<String>) -> &Activity {
        self.push(ActivityKind::Step { message: message.into() })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Activity> {
        self.activities.iter()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn start_activity(&self) -> Option<&Activity> {
        self.find(Singleton::Start)
    }

    pub fn end_activity(&self) -> Option<&Activity> {
        self.find(Singleton::End)
    }

    pub fn exception_activity(&self) -> Option<&Activity> {
        self.find(Singleton::Exception)
    }

    fn find(&self, singleton: Singleton) -> Option<&Activity> {
        self.activities.iter().find(|activity| singleton.matches(&activity.kind))
    }

    pub fn last_step(&self) -> Option<&str> {
        self.activities.iter().rev().find_map(|activity| match &activity.kind {
            ActivityKind::Step { message } => Some(message.as_str()),
            _ => None,
        })
    }

    pub fn has_failed_assertion(&self) -> bool {
        self.activities.iter().any(Activity::is_failed_assertion)
    }

    /// Convert the log into persisted records tagged to `unit_test`.
    pub fn to_records(&self, unit_test: UnitTestId) -> Vec<ActivityRecord> {
        self.activities.iter().map(|activity| activity.to_record(unit_test)).collect()
    }
}
