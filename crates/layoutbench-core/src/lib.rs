pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod db;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod model;
pub mod naming;
pub mod provision;

pub mod report;
pub mod storage;
