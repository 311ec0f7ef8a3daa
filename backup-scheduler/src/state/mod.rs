//! Durable scheduler state: run timestamps and the last file snapshot.

pub mod store;

pub use store::StateStore;
