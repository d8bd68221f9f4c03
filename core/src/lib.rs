//! Client-side synchronization for Tally.
//!
//! # Architecture
//!
//! - [`cache`] - scoped cache keyed by (entity, owner, scope) with coalesced
//!   fetches and generation-checked invalidation
//! - [`Selection`] - the active folder scope, observable
//! - [`SessionStore`] - signed-in identity, persisted; the gateway's
//!   credential source
//! - [`Store`] - read side: session + selection -> cache key -> fetch
//! - [`MutationCoordinator`] - write side: gateway call, then invalidation
//! - [`TallyClient`] - wires the above together and handles login/logout
//!
//! Reads go through the cache; writes go through the coordinator and never
//! touch cached values directly. After a successful write the affected keys
//! are marked stale, and anything watching them refetches.

pub mod cache;
mod client;
mod context;
mod error;
mod mutation;
mod selection;
mod session;
mod store;

#[cfg(test)]
mod testing;

pub use cache::{CacheError, CacheKey, FetchStatus, KeyPrefix, ScopedCache, Snapshot, Subscription};
pub use client::TallyClient;
pub use context::{Caches, SyncContext};
pub use error::SyncError;
pub use mutation::MutationCoordinator;
pub use selection::Selection;
pub use session::{
    FileSessionStorage, MemorySessionStorage, Session, SessionError, SessionStorage, SessionStore,
};
pub use store::Store;

pub use tally_gateway;
pub use tally_types;
