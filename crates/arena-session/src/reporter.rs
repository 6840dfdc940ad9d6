//! Status reporting seam between session units and the aggregator

/// Sink for per-unit status lines. Implementations must be callable from
/// every unit concurrently and must not block for long: units report on
/// every state transition.
pub trait Reporter: Send + Sync {
    fn report(&self, unit: &str, message: &str);

    /// Announce a unit before its first line. Reporting also registers.
    fn register(&self, _unit: &str) {}
}
