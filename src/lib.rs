//! Buying-signal intelligence: call recordings and account news distilled
//! into scored, cached signals per account and opportunity.

pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod gong;
pub mod lookup;
mod migrations;
pub mod news;
pub mod orchestrator;
pub mod pipeline;
pub mod ranking;
pub mod scheduler;
pub mod scope;
pub mod types;
