//! Mech Arena Server Library
//!
//! Battle orchestration for a mech arena game: a fair three-faction battle
//! queue, a framed socket bridge to the simulation process, and timed
//! ability bribing during battles.
//!
//! # Features
//!
//! - `ai_control` - Server-side pilots for AI-owned war machines (enabled by default)
//! - `metrics_extended` - Extra gauges on the metrics endpoint (enabled by default)

pub mod arena;
pub mod battle;
pub mod config;
pub mod game;
pub mod metrics;
pub mod net;
pub mod queue;
pub mod services;
pub mod voting;
