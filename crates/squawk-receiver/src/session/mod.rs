//! Per-broadcaster session state.
//!
//! - [`PortPool`] - fixed LIFO pool of receiver ports
//! - [`SessionRegistry`] - one [`StreamingSession`] per broadcaster
//! - [`PendingRequests`] - negotiation request id to broadcaster mapping
//!
//! All three are owned by the signaling machine and mutated only from its
//! single dispatch task, so none of them lock.

pub mod correlator;
pub mod port_pool;
pub mod registry;
pub mod types;

pub use correlator::PendingRequests;
pub use port_pool::PortPool;
pub use registry::SessionRegistry;
pub use types::StreamingSession;
