//! Optional best-effort persisted-state snapshot (§6 "Persisted state").
//!
//! Not a durable queue or a general key-value store — this is a single JSON
//! document written on a clean shutdown (and optionally read back at
//! startup) so a restarted process can resume with the same agent roster,
//! tree placement, and intervention history instead of starting cold. A
//! missing or unreadable file is never a startup failure; the core simply
//! starts empty, matching the Non-goal that durability across restart is
//! best-effort only.

mod snapshot;

pub use snapshot::CoreSnapshot;
