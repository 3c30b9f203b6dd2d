use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use super::Admission;
use super::Reason;

/// A granted slot borrowed from an [`Admission`]. Released when dropped.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct Permit<'a, A>
where
    A: Admission + ?Sized,
{
    guard: &'a A,
}

impl<'a, A> Permit<'a, A>
where
    A: Admission + ?Sized,
{
    /// Claims a slot from `guard`.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if no slot is free.
    pub fn try_acquire(guard: &'a A) -> Result<Self, Reason> {
        match guard.acquire() {
            ControlFlow::Continue(()) => Ok(Self { guard }),
            ControlFlow::Break(reason) => Err(reason),
        }
    }
}

impl<A> Drop for Permit<'_, A>
where
    A: Admission + ?Sized,
{
    fn drop(&mut self) {
        self.guard.release();
    }
}

impl<A> fmt::Debug for Permit<'_, A>
where
    A: Admission + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("guard", &self.guard.name())
            .finish()
    }
}

/// A granted slot that keeps its guard alive. Released when dropped.
///
/// Use this when the slot has to outlive the borrow of the guard, for example
/// when it travels inside a response future.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct OwnedPermit<A>
where
    A: Admission + ?Sized,
{
    guard: Arc<A>,
}

impl<A> OwnedPermit<A>
where
    A: Admission + ?Sized,
{
    /// Claims a slot from `guard`.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if no slot is free.
    pub fn try_acquire(guard: Arc<A>) -> Result<Self, Reason> {
        match guard.acquire() {
            ControlFlow::Continue(()) => Ok(Self { guard }),
            ControlFlow::Break(reason) => Err(reason),
        }
    }

    /// The guard this slot belongs to.
    pub fn guard(&self) -> &Arc<A> {
        &self.guard
    }
}

impl<A> Drop for OwnedPermit<A>
where
    A: Admission + ?Sized,
{
    fn drop(&mut self) {
        self.guard.release();
    }
}

impl<A> fmt::Debug for OwnedPermit<A>
where
    A: Admission + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedPermit")
            .field("guard", &self.guard.name())
            .finish()
    }
}
