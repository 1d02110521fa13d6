//! EduBot API Library Crate
//!
//! This library contains all the logic for the EduBot revision web service,
//! including the application state, database access, API handlers, WebSocket
//! logic, and routing. The `bin/api.rs` binary is a thin wrapper around this
//! library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
