use std::ops::ControlFlow;

use super::Admission;
use super::Reason;

/// Stand-in for deployments that run without a guard.
///
/// Every acquire is granted and release does nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Unguarded;

impl Admission for Unguarded {
    fn name(&self) -> &str {
        "unguarded"
    }

    fn acquire(&self) -> ControlFlow<Reason> {
        ControlFlow::Continue(())
    }

    fn release(&self) {}
}
