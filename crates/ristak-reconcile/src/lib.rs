//! Identity resolution and retroactive tracking-link reconciliation.
//!
//! - [`IdentityGraph`] unifies typed identifiers under a primary identity.
//! - [`RetroactiveLinker`] stitches anonymous tracking sessions onto CRM
//!   contacts that arrived after the visit.
//! - [`Scheduler`] drives any [`Job`] on a fixed interval, one run at a time.
//!
//! All three are generic over the store traits in [`ristak_core::store`].

pub mod error;
pub mod identity_graph;
pub mod linker;
pub mod scheduler;

pub use error::{Error, Result};
pub use identity_graph::IdentityGraph;
pub use linker::{LinkStats, LinkerConfig, RetroactiveLinker};
pub use scheduler::{Job, JobState, RunOutcome, ScheduleSpec, Scheduler};
