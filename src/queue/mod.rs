pub mod memory;
pub mod pricing;
pub mod scheduler;
pub mod store;
pub mod system;

pub use memory::MemoryQueueStore;
pub use pricing::{calc_next_queue_status, QueueStatus};
pub use scheduler::{ArenaPool, BattleQueueScheduler};
pub use store::{QueueStore, StoreError};
pub use system::{BattleQueue, QueueError};
