//! Receiver port pool.
//!
//! Ports are handed out LIFO: the most recently released port is the next
//! one leased. The initial stack is built from the configured list so the
//! last configured port is leased first.
//!
//! Leased and available ports are always disjoint and together equal the
//! configured set.

use crate::errors::ReceiverError;
use std::collections::HashSet;

/// Fixed pool of receiver ports.
#[derive(Debug)]
pub struct PortPool {
    /// Stack of available ports (top = last element).
    available: Vec<u16>,
    /// Ports currently leased to sessions.
    leased: HashSet<u16>,
}

impl PortPool {
    /// Create a pool from the configured ports. Duplicates are ignored.
    #[must_use]
    pub fn new(ports: &[u16]) -> Self {
        let mut available = Vec::with_capacity(ports.len());
        for &port in ports {
            if !available.contains(&port) {
                available.push(port);
            }
        }
        Self {
            available,
            leased: HashSet::new(),
        }
    }

    /// Lease the port on top of the stack.
    ///
    /// # Errors
    ///
    /// Returns `ReceiverError::PortsExhausted` when every port is leased.
    pub fn lease(&mut self) -> Result<u16, ReceiverError> {
        let port = self.available.pop().ok_or(ReceiverError::PortsExhausted {
            capacity: self.capacity(),
        })?;
        self.leased.insert(port);
        Ok(port)
    }

    /// Return a leased port to the top of the stack.
    ///
    /// # Errors
    ///
    /// Returns `ReceiverError::PortNotLeased` if the port is not currently
    /// leased; the pool is left untouched.
    pub fn release(&mut self, port: u16) -> Result<(), ReceiverError> {
        if !self.leased.remove(&port) {
            return Err(ReceiverError::PortNotLeased(port));
        }
        self.available.push(port);
        Ok(())
    }

    /// Number of ports ready to be leased.
    #[must_use]
    pub fn available(&self) -> usize {
        self.available.len()
    }

    /// Number of ports currently leased.
    #[must_use]
    pub fn leased(&self) -> usize {
        self.leased.len()
    }

    /// Total number of configured ports.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.available.len() + self.leased.len()
    }

    #[must_use]
    pub fn is_leased(&self, port: u16) -> bool {
        self.leased.contains(&port)
    }
}
