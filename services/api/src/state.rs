//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the flow controller and the database handle.

use crate::{config::Config, db::Db};
use edubot_core::flow::FlowController;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers. The flow controller carries immutable references to its three
/// collaborators; handlers never reach for service singletons.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<FlowController>,
    pub db: Arc<Db>,
    pub config: Arc<Config>,
}
