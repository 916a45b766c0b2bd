mod batch;
mod column_family;
mod failover;
mod pools;
mod thread_local;
pub(crate) mod utils;
