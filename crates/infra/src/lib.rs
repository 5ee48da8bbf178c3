//! Infrastructure layer: run executor, job functions, stores, worker client, config.

pub mod config;
pub mod db;
pub mod functions;
pub mod jobs;
pub mod records;
pub mod scheduler;
pub mod worker;

mod integration_tests;
