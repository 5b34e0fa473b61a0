//! # herd-id
//!
//! Typed identifiers for the herd replication controller.
//!
//! ## Design Principles
//!
//! - Controller IDs are system-generated and sortable; node and pod names
//!   are external labels that the controller validates but never invents
//! - All identifiers have a canonical string representation with strict
//!   parsing and roundtrip serialization (parse → format → parse)
//! - Identifiers are typed to prevent mixing different resource kinds
//!
//! ## Formats
//!
//! - `RcId`: `rc_{ulid}`, e.g. `rc_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `NodeName`: a hostname, e.g. `node1.example.com`
//! - `PodId`: a workload name taken from its manifest, e.g. `web`
//!
//! `NodeName` and `PodId` reject `/` because placement keys join them with
//! it (`intent/<node>/<pod_id>`).

mod error;
mod types;

pub use error::IdError;
pub use types::{NodeName, PodId, RcId};

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
