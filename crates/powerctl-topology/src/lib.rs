//! Topology Syncer: reconciles node -> BMC -> endpoint mappings from
//! the inventory service into the Store. Split into a pure derivation
//! module (testable without I/O) and the periodic/on-demand loop around it.

pub mod derive;
pub mod syncer;

pub use derive::{derive_desired_topology, fingerprint_interfaces, merge_with_prior_endpoints, DerivedTopology};
pub use syncer::{Syncer, SyncerStatus};
