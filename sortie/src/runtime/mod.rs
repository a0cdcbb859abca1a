/// Time source used by retry loops.
pub mod clock;
/// Local process supervision and the monitoring loop.
pub mod supervisor;
/// Task identifiers and snapshots.
pub mod task;

pub use clock::{Clock, TokioClock};
pub use supervisor::{ShutdownToken, TaskSupervisor};
pub use task::{OutputDest, TaskId, TaskSnapshot, WaitOutput, exit_code};
