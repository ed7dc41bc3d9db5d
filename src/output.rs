use anyhow::Result;

use crate::vmupdate::Failure;

/// This enum encapsulates real time updates about a machine being updated.
///
/// This is essentially a state machine where on a successful update the
/// receiver should expect to see at least one of each `*Start`/`*End` pair
/// in order as defined.
///
/// Failure is defined as seeing an `Err` in one of the `*End` variants.
/// A failed stage is terminal for everything except shutdown: once boot
/// succeeded, the shutdown stage runs no matter how the middle stages went.
pub enum Output {
    /// Machine was skipped before boot for the given reason
    Skip(Failure),

    /// Machine boot begins
    BootStart,
    /// Output related to machine boot
    Boot(String),
    /// Boot finished with provided result
    BootEnd(Result<()>),

    /// Starting to dispatch the update command
    DispatchStart,
    /// Output related to dispatching the update command
    Dispatch(String),
    /// Dispatch finished with provided result
    DispatchEnd(Result<()>),

    /// Starting to wait for the completion signal
    WaitStart,
    /// Output related to waiting for completion
    Wait(String),
    /// Waiting finished with provided result
    WaitEnd(Result<()>),

    /// Machine shutdown begins
    ShutdownStart,
    /// Output related to machine shutdown
    Shutdown(String),
    /// Shutdown finished with provided result
    ShutdownEnd(Result<()>),
}
