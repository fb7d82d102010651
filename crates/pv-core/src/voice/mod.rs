//! Private voice room lifecycle.
//!
//! ## Lifecycle
//!
//! ```text
//! !meet <title>
//!   │
//!   ├─► Validate name length, parent channel, one room per parent
//!   │
//!   ├─► Fetch parent roster, create voice channel, register record
//!   │
//!   └─► Deny @everyone, allow every member who can see the parent
//!
//! Sweep (every tick)
//!   │
//!   └─► Expired && nobody connected ─► delete channel, drop record, notify parent
//!
//! Channel deleted out-of-band
//!   │
//!   └─► Drop record, notify parent (once)
//! ```
//!
//! Room states: `Active → Expired&Unoccupied → Deleted` via the sweep, or
//! `Active → Deleted` via an external deletion. Both end states are terminal.
//!
//! Records live only in memory. After a restart, rooms created by the
//! previous process are no longer tracked and must be removed by hand.

mod lifecycle;
mod sweep;

pub use lifecycle::*;
pub use sweep::*;
