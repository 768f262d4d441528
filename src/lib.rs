//! Group Tip Bot Library
//!
//! Core of a Telegram group-management bot that cooperates with sibling
//! bot instances.
//!
//! This crate provides:
//! - Structured data exchange over a shared broadcast channel with
//!   one-way failover to a hidden fallback channel
//! - Lock-guarded registries for shared per-group state (tip message
//!   slots, invite links, admin/trust sets, regex counters)
//! - Periodic maintenance jobs that mutate those registries safely
//!   under concurrent triggers

pub mod config;
pub mod exchange;
pub mod jobs;
pub mod state;
pub mod telegram;
