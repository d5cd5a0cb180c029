// Worker process supervision: PTY launch, output drain, slot pool

pub mod output;
pub mod pool;
pub mod process;

pub use output::{scan_line, OutputSignal, SignalKind};
pub use pool::{ResourceLimits, SlotPool};
pub use process::{WorkerLaunchConfig, WorkerProcess};
