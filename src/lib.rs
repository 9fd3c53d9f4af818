//! PadParty Server - room and simulation engine
//!
//! One display client hosts a room, any number of phone controllers join
//! over WebSocket. Each room runs an authoritative fixed-rate simulation in
//! its own task and broadcasts full snapshots to every bound session.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
