/// Classification for dispatch retry policy.
///
/// Used to determine how the dispatcher responds to an error from a
/// dispatched upstream call.
///
/// # Behavior Summary
///
/// | Class | Requeued? | Surfaced to waiters? |
/// |-----------|----------------------------|----------------------|
/// | `Fatal`   | No                         | Yes, immediately     |
/// | `Requeue` | Yes, with bounded backoff  | Only when exhausted  |
/// | `Never`   | No                         | Yes                  |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Configuration problem. The scheduler refuses to dispatch until it
    /// is corrected; nothing about retrying can help.
    Fatal,

    /// The provider throttled us. The dispatcher puts the key back into
    /// the queue with the same priority and retries after an exponential
    /// backoff, up to the configured attempt bound.
    Requeue,

    /// Surface to the current waiters and forget. Callers decide whether
    /// to issue a fresh request, which re-enters the cache-miss path.
    Never,
}
