//! Core library: scanning, classification, matching, planning, execution.

pub mod classifier;
pub mod config;
pub mod executor;
pub mod matcher;
pub mod models;
pub mod naming;
pub mod pipeline;
pub mod planner;
pub mod scanner;
