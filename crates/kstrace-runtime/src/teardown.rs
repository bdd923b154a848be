//! Ordered teardown bookkeeping.
//!
//! Every resource a run creates registers the step that undoes it. Steps are
//! drained last-in first-out, so tracers stop before their pods are deleted
//! and the namespace goes last.

/// One undo action, referring to tracers by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    /// End capture for the tracer and finalize its artifacts.
    StopTracer(usize),
    /// Delete the tracer's helper pod.
    CleanupTracer(usize),
    /// Delete the run namespace.
    DeleteNamespace,
}

/// Stack of pending teardown steps.
#[derive(Debug, Default)]
pub struct TeardownList {
    steps: Vec<TeardownStep>,
}

impl TeardownList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Registers a step to run before everything registered so far.
    pub fn push(&mut self, step: TeardownStep) {
        self.steps.push(step);
    }

    /// Number of pending steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no steps are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Removes every step, most recently registered first.
    pub fn drain(&mut self) -> impl Iterator<Item = TeardownStep> + '_ {
        self.steps.drain(..).rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_reverse_registration_order() {
        let mut list = TeardownList::new();
        list.push(TeardownStep::DeleteNamespace);
        for i in 0..2 {
            list.push(TeardownStep::CleanupTracer(i));
            list.push(TeardownStep::StopTracer(i));
        }
        assert_eq!(list.len(), 5);

        let order: Vec<_> = list.drain().collect();
        assert_eq!(
            order,
            vec![
                TeardownStep::StopTracer(1),
                TeardownStep::CleanupTracer(1),
                TeardownStep::StopTracer(0),
                TeardownStep::CleanupTracer(0),
                TeardownStep::DeleteNamespace,
            ]
        );
        assert!(list.is_empty());
    }
}
