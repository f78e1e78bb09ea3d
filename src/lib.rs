//! Meter Bridge library
//! Lists and connects to BLE meters, builds command payloads from templates
//! and writes them to the meter's command characteristic.

pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;
