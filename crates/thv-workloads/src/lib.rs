//! Workload lifecycle orchestration: create, start, stop, delete and restart
//! across the runtime driver, the state store, the proxy and client configs.

mod manager;
mod name_mutex;
mod proxy_setup;
mod supervise;
mod wait_group;

pub use manager::{STOP_GRACE, WorkloadManager};
pub use supervise::run_supervisor;
pub use wait_group::WaitGroup;
