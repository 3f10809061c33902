//! Application layer: the scheduling loop and the wiring that runs it.

pub mod control_router;
pub mod executing_groups;
pub mod shutdown;
pub mod worker;
pub mod worker_scheduler;

pub use control_router::ControlRouter;
pub use executing_groups::{ExecutingGroups, GroupLease};
pub use shutdown::install_shutdown_handler;
pub use worker::{default_worker_id, Worker};
pub use worker_scheduler::{SchedulerSettings, WorkerScheduler};
