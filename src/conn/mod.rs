// =============================================================================
// SlideSync Room Sync Engine - Connection Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Connection identity and the registry of live sessions. Sessions register
//   with the dispatcher on creation and are unregistered when reaped idle.
//
// =============================================================================

mod state;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ruma::{OwnedDeviceId, UserId};
use tracing::debug;

pub use state::ConnState;

use crate::{config::EngineConfig, dispatcher::Dispatcher, GlobalCache};

/// Uniquely names a live streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub session_id: String,
    pub device_id: OwnedDeviceId,
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.device_id)
    }
}

/// Registry of live connections.
#[derive(Default)]
pub struct ConnMap {
    conns: RwLock<HashMap<ConnId, Arc<ConnState>>>,
}

impl ConnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conns.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.read().unwrap().is_empty()
    }

    pub fn get(&self, conn_id: &ConnId) -> Option<Arc<ConnState>> {
        self.conns.read().unwrap().get(conn_id).cloned()
    }

    /// Look up or create a session, registering new ones with the
    /// dispatcher. Returns the session and whether it was created.
    pub fn get_or_create(
        &self,
        conn_id: &ConnId,
        user_id: &UserId,
        dispatcher: &Dispatcher,
        global_cache: Arc<GlobalCache>,
        config: &EngineConfig,
    ) -> (Arc<ConnState>, bool) {
        if let Some(conn) = self.get(conn_id) {
            return (conn, false);
        }
        let mut conns = self.conns.write().unwrap();
        if let Some(conn) = conns.get(conn_id) {
            return (conn.clone(), false);
        }
        let conn = Arc::new(ConnState::new(
            conn_id.clone(),
            user_id.to_owned(),
            dispatcher.user_cache(user_id),
            global_cache,
            config.clone(),
        ));
        conns.insert(conn_id.clone(), conn.clone());
        dispatcher.register_session(conn.clone());
        debug!(conn = %conn_id, user = %user_id, "🔌 session registered");
        (conn, true)
    }

    /// Drop sessions idle for longer than `idle_timeout`. Returns how many
    /// were removed.
    pub fn cleanup_idle(&self, idle_timeout: Duration, dispatcher: &Dispatcher) -> usize {
        let mut conns = self.conns.write().unwrap();
        let before = conns.len();
        conns.retain(|conn_id, conn| {
            if conn.idle_for() > idle_timeout {
                dispatcher.unregister_session(conn.user_id(), conn_id);
                debug!(conn = %conn_id, "🧹 idle session reaped");
                false
            } else {
                true
            }
        });
        before - conns.len()
    }
}
