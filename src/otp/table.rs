//! Session table and bounded-timeout guard
//!
//! A fixed-capacity slot arena of transfer contexts with a connection-id
//! index, protected by a single lock whose acquisition is bounded: events
//! arrive from several delivery contexts, and a stuck holder must fail
//! the current operation rather than wedge the stack.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::transport::gatt::ConnHandle;

use super::context::TransferContext;
use super::error::OtpError;

/// Default number of simultaneously tracked connections.
pub const DEFAULT_CAPACITY: usize = 4;

/// Slot arena of per-connection contexts with a rebuilt-on-change index,
/// so lookups stay O(1) instead of scanning every slot per event.
pub struct SessionTable {
    slots: Vec<Option<TransferContext>>,
    index: HashMap<ConnHandle, usize>,
}

impl SessionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Context for a connection, if tracked.
    pub fn get(&mut self, conn: ConnHandle) -> Option<&mut TransferContext> {
        let slot = *self.index.get(&conn)?;
        self.slots[slot].as_mut()
    }

    /// Context for a connection, lazily created in a free slot.
    ///
    /// Connection handle 0 is reserved; a full table fails the call.
    pub fn get_or_create(&mut self, conn: ConnHandle) -> Result<&mut TransferContext, OtpError> {
        if conn == 0 {
            return Err(OtpError::InvalidArgument("connection handle 0 is reserved"));
        }
        let slot = match self.index.get(&conn) {
            Some(&slot) => slot,
            None => {
                let slot = self
                    .slots
                    .iter()
                    .position(|s| s.is_none())
                    .ok_or(OtpError::InvalidState("session table full"))?;
                self.slots[slot] = Some(TransferContext::new(conn));
                self.index.insert(conn, slot);
                slot
            }
        };
        self.slots[slot]
            .as_mut()
            .ok_or(OtpError::InvalidState("session slot vacated"))
    }

    /// Drop a connection's context and free its slot.
    pub fn remove(&mut self, conn: ConnHandle) -> Option<TransferContext> {
        let slot = self.index.remove(&conn)?;
        self.slots[slot].take()
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Bounded-timeout mutual exclusion over the session table.
///
/// Acquisition is an explicit fallible operation: an elapsed timeout
/// fails the caller's operation with [`OtpError::LockTimeout`] and never
/// proceeds unlocked. Event emission must happen only after the returned
/// guard is dropped.
pub struct SessionGuard {
    table: Mutex<SessionTable>,
    timeout: Duration,
}

impl SessionGuard {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            table: Mutex::new(SessionTable::new(capacity)),
            timeout,
        }
    }

    /// Acquire the table lock within the configured bound.
    pub async fn lock(&self) -> Result<MutexGuard<'_, SessionTable>, OtpError> {
        match tokio::time::timeout(self.timeout, self.table.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                log::error!(
                    "session lock not acquired within {:?}, failing operation",
                    self.timeout
                );
                Err(OtpError::LockTimeout(self.timeout))
            }
        }
    }
}
