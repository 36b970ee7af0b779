pub mod agent;
pub mod aggregator;
pub mod audit;
pub mod cli;
pub mod config;
pub mod container;
pub mod db;
pub mod errors;
pub mod events;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod process;
pub mod queue;
pub mod repository;
pub mod safety;
pub mod session;
pub mod tools;
pub mod utils;
