//! Per-worker connection cache
//!
//! Each worker owns its cache exclusively; nothing here is shared between
//! threads. Connections are opened lazily, reused while in use, and closed once
//! they have been idle longer than the configured timeout or when the worker
//! exits.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::collaborators::{PageConnection, PageSource};
use crate::error::Result;

struct CachedConnection {
    conn: Box<dyn PageConnection>,
    last_use: Instant,
}

/// Lazily opened page database connections keyed by database name
pub struct ConnectionCache {
    source: Arc<dyn PageSource>,
    idle_timeout: Duration,
    slots: HashMap<String, CachedConnection>,
}

impl ConnectionCache {
    pub fn new(source: Arc<dyn PageSource>, idle_timeout: Duration) -> Self {
        Self {
            source,
            idle_timeout,
            slots: HashMap::new(),
        }
    }

    /// Get the connection for `database`, opening it on first use
    pub fn get(&mut self, database: &str) -> Result<&mut dyn PageConnection> {
        let slot = match self.slots.entry(database.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!("opening connection to {}", database);
                let conn = self.source.connect(database)?;
                entry.insert(CachedConnection {
                    conn,
                    last_use: Instant::now(),
                })
            }
        };
        slot.last_use = Instant::now();
        Ok(slot.conn.as_mut())
    }

    /// Close connections idle for longer than the timeout. Returns how many
    /// were closed.
    pub fn sweep_idle(&mut self) -> usize {
        self.sweep_idle_at(Instant::now())
    }

    pub(crate) fn sweep_idle_at(&mut self, now: Instant) -> usize {
        let idle_timeout = self.idle_timeout;
        let stale: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| now.saturating_duration_since(slot.last_use) > idle_timeout)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            if let Some(mut slot) = self.slots.remove(key) {
                debug!("closing idle connection {}", key);
                slot.conn.close();
            }
        }
        stale.len()
    }

    /// Close every connection (worker exit)
    pub fn close_all(&mut self) {
        for (key, mut slot) in self.slots.drain() {
            debug!("closing connection {}", key);
            slot.conn.close();
        }
    }

    pub fn open_count(&self) -> usize {
        self.slots.len()
    }
}

impl Drop for ConnectionCache {
    fn drop(&mut self) {
        self.close_all();
    }
}
