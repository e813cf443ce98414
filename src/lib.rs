//! Cluster-safe scheduled purge of old, orphaned content records.
//!
//! A pass walks the content store in time windows from the oldest record up
//! to `now - older_than_days`, deletes orphaned records batch by batch (one
//! transaction per batch) and then removes their on-disk assets. Passes run
//! under a cluster lease so at most one node mutates the store at a time.

pub mod config;
pub mod db;
pub mod lock;
pub mod observability;
pub mod purge;
