//! ChainPulse Library
//!
//! Option-chain positioning analytics, guarded signal acceptance and a
//! paper-trade ledger for Indian index options

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod notifier;
pub mod oracle;
pub mod paper_trading;
pub mod persistence;
pub mod strategy;
pub mod tracker;
pub mod types;
