#![doc = include_str!("../README.md")]

pub mod bench;
pub mod database;
mod error;
mod manager;
mod pool;

pub use error::{PoolError, ReleaseError};
pub use manager::ManageConnection;
pub use pool::{Builder, DEFAULT_CAPACITY, Pool, PoolState, PoolStatus, Pooled};
