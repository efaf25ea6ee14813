//! Pool core: admission, dispatch and the join loop.
//!
//! - [`pool`]: owns tracked processes, the wait queue, the arena and the bus;
//! - [`builder`]: wires optional collaborators and maps the shared-state segment;
//! - [`join`]: supervision loop (stuck respawn, timeouts, exit aggregation);
//! - [`admission`]: concurrency limit and FIFO wait queue;
//! - [`status`]: pool lifecycle status.

mod admission;
mod builder;
mod join;
mod pool;
mod status;

pub use builder::PoolBuilder;
pub use pool::Pool;
pub use status::PoolStatus;
