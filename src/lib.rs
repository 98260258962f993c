//! Workflow run lifecycle, checkpoint and rollback engine.
//!
//! A run walks an ordered pipeline of steps, each driving an external agent
//! against git work trees. This crate owns the run state machine, the
//! per-step execution records, checkpoints of the work trees and the
//! consistency discipline that keeps stores, directories and git in step.

pub mod app;
pub mod config;
pub mod domain;
pub mod infra;
pub mod paths;
pub mod ports;
pub mod structured_logger;
pub mod wiring;

#[cfg(test)]
pub mod testing;
