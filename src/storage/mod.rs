pub mod persistence;
pub mod state;
pub mod table;

pub use persistence::{
    DEFAULT_CHECKPOINT_THRESHOLD, DurabilityBackend, DurabilityMode, FileDurability, NoDurability,
};
pub use state::{ForeignKeyPolicy, StoreState, WriteOutcome};
pub use table::Table;
