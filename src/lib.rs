// ============================================================================
// Timeledger Library
// ============================================================================
//
// Local-first data layer for a time-tracking client. Entities are created
// and mutated locally, optimistically usable before any sync completes, and
// kept consistent across every in-memory reference to the same record:
// every mutation is announced on a change bus, every live envelope converges
// on the announcements, and the one-running-entry-per-user invariant is
// enforced across the live cache and the backing store.

pub mod bus;
pub mod core;
pub mod data;
pub mod model;
pub mod store;

// Re-export main types for convenience
pub use core::{CommonFields, DataAction, DataError, EntityKind, Field, Result};

pub use bus::{ChangeHandler, ChangeHandlerFuture, DataChangeMessage, MessageBus, Subscription};
pub use data::{
    ChangePayload, Entity, ProjectData, TaskData, TimeEntryData, UserData, WorkspaceData,
};
pub use model::{
    DataContext, IS_SHARED, Model, ModelCache, ObserverId, TimeEntryModel,
    time_entry::{recent_entries, refresh_running_durations, running_entry, spawn_duration_refresh},
};
pub use store::{DataStore, InMemoryStore, RowComparator, RowFilter, StorePolicy};
