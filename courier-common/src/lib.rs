pub mod logging;

pub use tracing;

/// Lifecycle signals broadcast to long-running tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop accepting new work, finish what is in flight, then exit
    Shutdown,
    /// The host application has finished; handled the same way as `Shutdown`
    Finalised,
}
