//! A bounded set of Connection workers with checkout/checkin, exponential
//! reconnect backoff, and liveness handling.

use std::collections::VecDeque;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::connection::Connection;
use crate::error::Result;
use crate::opts::PoolConfig;

enum WorkerSlot {
    Live(Connection),
    Dead,
}

/// Sleep applied before a reconnect attempt, indexed by the number of
/// consecutive failures already observed. Matches the tested sequence
/// `0, 0, 100, 300, 600, 1000, 2000, 3000, 4000` ms, clamped thereafter.
fn backoff_delay(consecutive_failures: u32) -> Duration {
    const SCHEDULE_MS: [u64; 9] = [0, 0, 100, 300, 600, 1000, 2000, 3000, 4000];
    let index = (consecutive_failures as usize).min(SCHEDULE_MS.len() - 1);
    Duration::from_millis(SCHEDULE_MS[index])
}

/// A bounded pool of `Connection` workers.
///
/// Checkout blocks the caller until a slot is free; if that slot was last
/// seen dead, one reconnect attempt runs inline (after the backoff delay
/// its consecutive-failure count implies) before the caller gets it.
pub struct Pool {
    config: PoolConfig,
    slots: Vec<Mutex<WorkerSlot>>,
    idle: Mutex<VecDeque<usize>>,
    available: Condvar,
    /// Consecutive worker-init failures across the whole pool; reset to 0
    /// on the first successful (re)connect, clamped at 11 to bound growth.
    failures: Mutex<u32>,
}

impl Pool {
    /// Creates the shared slot table and eagerly connects each worker.
    /// Workers that fail to connect at startup are left `Dead` and are
    /// retried - with backoff - the first time a caller's checkout lands on
    /// them.
    pub fn start(config: PoolConfig) -> Arc<Self> {
        let size = config.pool_size.max(1);

        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            slots.push(Mutex::new(WorkerSlot::Dead));
        }

        let pool = Arc::new(Self {
            config,
            slots,
            idle: Mutex::new((0..size).collect()),
            available: Condvar::new(),
            failures: Mutex::new(0),
        });

        for index in 0..size {
            match Connection::connect(&pool.config) {
                Ok(connection) => {
                    pool.reset_failures();
                    let mut guard = pool.lock_slot(index);
                    *guard = WorkerSlot::Live(connection);
                }
                Err(err) => {
                    pool.bump_failures();
                    tracing::error!(error = %err.to_user_string(), "worker failed to connect at startup");
                }
            }
        }

        tracing::info!(pool = %pool.config.name, size, "pool started");
        pool
    }

    fn lock_slot(&self, index: usize) -> std::sync::MutexGuard<'_, WorkerSlot> {
        self.slots[index].lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_failures(&self) {
        *self.failures.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }

    fn bump_failures(&self) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        *failures = failures.saturating_add(1).min(11);
    }

    fn current_failures(&self) -> u32 {
        *self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire_idle_index(&self) -> usize {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(index) = idle.pop_front() {
                return index;
            }
            idle = self.available.wait(idle).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn reconnect_with_backoff(&self) -> Result<Connection> {
        let failures = self.current_failures();
        let delay = backoff_delay(failures);
        if !delay.is_zero() {
            tracing::warn!(
                delay_ms = delay.as_millis() as u64,
                failures,
                "backing off before reconnect attempt"
            );
            std::thread::sleep(delay);
        }

        match Connection::connect(&self.config) {
            Ok(connection) => {
                self.reset_failures();
                tracing::info!(pool = %self.config.name, "worker replaced");
                Ok(connection)
            }
            Err(err) => {
                self.bump_failures();
                Err(err)
            }
        }
    }

    /// Blocking reservation of a live Connection.
    pub fn checkout(self: &Arc<Self>) -> Result<PooledConnection> {
        let index = self.acquire_idle_index();

        let is_dead = matches!(*self.lock_slot(index), WorkerSlot::Dead);

        if is_dead {
            match self.reconnect_with_backoff() {
                Ok(connection) => *self.lock_slot(index) = WorkerSlot::Live(connection),
                Err(err) => {
                    // Slot stays Dead; release it so a later checkout can retry.
                    self.idle.lock().unwrap_or_else(PoisonError::into_inner).push_back(index);
                    self.available.notify_one();
                    return Err(err);
                }
            }
        }

        let connection = match std::mem::replace(&mut *self.lock_slot(index), WorkerSlot::Dead) {
            WorkerSlot::Live(connection) => connection,
            WorkerSlot::Dead => unreachable!("checkout always leaves a live connection behind before reaching here"),
        };

        Ok(PooledConnection {
            pool: Arc::clone(self),
            slot_index: index,
            connection: ManuallyDrop::new(connection),
        })
    }

    fn checkin(&self, slot_index: usize, connection: Connection) {
        *self.lock_slot(slot_index) = if connection.is_poisoned() {
            tracing::error!(pool = %self.config.name, slot_index, "connection evicted after network-level error");
            WorkerSlot::Dead
        } else {
            WorkerSlot::Live(connection)
        };

        self.idle.lock().unwrap_or_else(PoisonError::into_inner).push_back(slot_index);
        self.available.notify_one();
    }
}

/// A `Connection` checked out from a [`Pool`]; returned to its slot on drop.
pub struct PooledConnection {
    pool: Arc<Pool>,
    slot_index: usize,
    connection: ManuallyDrop<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // SAFETY: `connection` is never accessed again after this take.
        let connection = unsafe { ManuallyDrop::take(&mut self.connection) };
        self.pool.checkin(self.slot_index, connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_tested_sequence() {
        let observed: Vec<u64> = (0..9).map(|n| backoff_delay(n).as_millis() as u64).collect();
        assert_eq!(observed, vec![0, 0, 100, 300, 600, 1000, 2000, 3000, 4000]);
    }

    #[test]
    fn backoff_clamps_beyond_cap() {
        assert_eq!(backoff_delay(11), Duration::from_millis(4000));
        assert_eq!(backoff_delay(1000), Duration::from_millis(4000));
    }
}
