//! Application services: metadata mirroring, sweeping and reporting.

pub mod error;
pub mod management;
pub mod repos;
pub mod sweeper;
pub mod tracker;
