// Camwarden recording daemon library

pub mod cleanup;
pub mod constants;
pub mod db;
pub mod error;
pub mod events;
pub mod licensing;
pub mod motion;
pub mod orchestrator;
pub mod reconcile;
pub mod schedule;
pub mod storage;
pub mod tools;
pub mod workers;
