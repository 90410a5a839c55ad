//! Composite status computation.
//!
//! Stage status is composed from its members, pipeline status from every
//! latest processable. Composition only looks at the multiset of
//! `(status, allow_failure)` pairs, so it is independent of evaluation order.

use crate::core::Status;

/// Accumulates child statuses and derives the composite.
///
/// Allow-failure discount: a failed child marked `allow_failure` counts as a
/// success with warnings; a canceled or manual child marked `allow_failure`
/// is ignored entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Composite {
    total: usize,
    ignored: usize,
    created: usize,
    pending: usize,
    running: usize,
    scheduled: usize,
    manual: usize,
    success: usize,
    warnings: usize,
    failed: usize,
    canceled: usize,
    skipped: usize,
}

impl Composite {
    /// Creates an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a composite from `(status, allow_failure)` pairs.
    #[must_use]
    pub fn from_pairs<I>(children: I) -> Self
    where
        I: IntoIterator<Item = (Status, bool)>,
    {
        let mut composite = Self::new();
        for (status, allow_failure) in children {
            composite.consume(status, allow_failure);
        }
        composite
    }

    /// Adds one child.
    pub fn consume(&mut self, status: Status, allow_failure: bool) {
        self.total += 1;
        match (status, allow_failure) {
            (Status::Failed, true) => self.warnings += 1,
            (Status::Canceled | Status::Manual, true) => self.ignored += 1,
            (Status::Created, _) => self.created += 1,
            (Status::Pending, _) => self.pending += 1,
            (Status::Running, _) => self.running += 1,
            (Status::Scheduled, _) => self.scheduled += 1,
            (Status::Manual, false) => self.manual += 1,
            (Status::Success, _) => self.success += 1,
            (Status::Failed, false) => self.failed += 1,
            (Status::Canceled, false) => self.canceled += 1,
            (Status::Skipped, _) => self.skipped += 1,
        }
    }

    /// Number of children consumed, ignored ones included.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.total
    }

    /// Returns true if nothing was consumed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }

    const fn relevant(&self) -> usize {
        self.total - self.ignored
    }

    /// Composite status of a stage or pipeline.
    #[must_use]
    pub const fn status(&self) -> Status {
        let relevant = self.relevant();
        if relevant == 0 {
            Status::Skipped
        } else if self.running + self.pending > 0 {
            Status::Running
        } else if self.failed > 0 {
            Status::Failed
        } else if self.canceled > 0 {
            Status::Canceled
        } else if self.manual > 0 {
            Status::Manual
        } else if self.scheduled > 0 {
            Status::Scheduled
        } else if self.created == relevant {
            Status::Created
        } else if self.created > 0 {
            Status::Running
        } else if self.skipped == relevant {
            Status::Skipped
        } else {
            Status::Success
        }
    }

    /// Composite status of a set of DAG needs.
    ///
    /// A need that will not run by itself (skipped, ignored or manual) makes
    /// the whole set `skipped`; any other incomplete need keeps it `running`.
    #[must_use]
    pub const fn needs_status(&self) -> Status {
        if self.skipped + self.ignored + self.manual > 0 {
            Status::Skipped
        } else if self.created + self.pending + self.running + self.scheduled > 0 {
            Status::Running
        } else {
            self.status()
        }
    }
}

/// Composes child statuses with their allow_failure flags.
///
/// Flags are matched positionally; a missing flag means `false`.
#[must_use]
pub fn compose_status(children: &[Status], allow_failure: &[bool]) -> Status {
    Composite::from_pairs(
        children
            .iter()
            .enumerate()
            .map(|(i, status)| (*status, allow_failure.get(i).copied().unwrap_or(false))),
    )
    .status()
}

/// Composes `(status, allow_failure)` pairs.
#[must_use]
pub fn compose_pairs(children: &[(Status, bool)]) -> Status {
    Composite::from_pairs(children.iter().copied()).status()
}

/// Composes `(status, allow_failure)` pairs of DAG needs.
#[must_use]
pub fn compose_needs(needs: &[(Status, bool)]) -> Status {
    Composite::from_pairs(needs.iter().copied()).needs_status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use Status::*;

    #[test]
    fn test_empty_is_skipped() {
        assert_eq!(compose_status(&[], &[]), Skipped);
    }

    #[test]
    fn test_running_wins_over_terminal() {
        assert_eq!(compose_status(&[Success, Failed, Pending], &[]), Running);
        assert_eq!(compose_status(&[Running, Manual], &[]), Running);
    }

    #[test]
    fn test_allow_failure_discount() {
        assert_eq!(compose_status(&[Failed, Success], &[true, false]), Success);
        assert_eq!(compose_status(&[Failed, Success], &[false, false]), Failed);
    }

    #[test]
    fn test_failed_precedes_canceled_and_manual() {
        assert_eq!(compose_status(&[Canceled, Failed], &[]), Failed);
        assert_eq!(compose_status(&[Manual, Failed], &[]), Failed);
        assert_eq!(compose_status(&[Manual, Canceled], &[]), Canceled);
        assert_eq!(compose_status(&[Canceled, Success], &[true, false]), Success);
    }

    #[test]
    fn test_blocked_statuses() {
        assert_eq!(compose_status(&[Success, Manual, Scheduled], &[]), Manual);
        assert_eq!(compose_status(&[Success, Scheduled], &[]), Scheduled);
    }

    #[test]
    fn test_optional_manual_is_ignored() {
        assert_eq!(compose_status(&[Manual], &[true]), Skipped);
        assert_eq!(compose_status(&[Success, Manual], &[false, true]), Success);
    }

    #[test]
    fn test_created_composites() {
        assert_eq!(compose_status(&[Created, Created], &[]), Created);
        assert_eq!(compose_status(&[Success, Created], &[]), Running);
        assert_eq!(compose_status(&[Manual, Created], &[]), Manual);
    }

    #[test]
    fn test_skipped_and_success() {
        assert_eq!(compose_status(&[Skipped, Skipped], &[]), Skipped);
        assert_eq!(compose_status(&[Skipped, Success], &[]), Success);
    }

    #[test]
    fn test_order_independent() {
        let children = [
            (Success, false),
            (Failed, true),
            (Manual, false),
            (Skipped, false),
            (Canceled, true),
        ];
        let forward = compose_pairs(&children);
        let mut reversed = children;
        reversed.reverse();
        assert_eq!(compose_pairs(&reversed), forward);
        assert_eq!(forward, Manual);
    }

    #[test]
    fn test_needs_status() {
        assert_eq!(compose_needs(&[(Success, false), (Skipped, false)]), Skipped);
        assert_eq!(compose_needs(&[(Manual, true)]), Skipped);
        assert_eq!(compose_needs(&[(Manual, false)]), Skipped);
        assert_eq!(compose_needs(&[(Success, false), (Scheduled, false)]), Running);
        assert_eq!(compose_needs(&[(Success, false), (Failed, true)]), Success);
        assert_eq!(compose_needs(&[(Failed, false), (Success, false)]), Failed);
    }
}
