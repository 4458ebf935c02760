pub mod config;
pub mod report;
pub mod runner;
pub mod workload;
