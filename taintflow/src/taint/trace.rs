//! Trace info: the provenance chain of a taint element.

use crate::access_path::{AccessPath, Root};
use crate::target::Target;
use crate::utils::Location;

/// Where a taint element came from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TraceInfo {
    /// Asserted in a user-written model; not yet attached to a site.
    Declaration,
    /// Introduced at a concrete location in analyzed code.
    Origin(Location),
    /// Flowed through a call.
    CallSite {
        /// The formal port the taint entered the callee through.
        port: Root,
        /// The subpath under that port.
        path: AccessPath,
        /// The call-site location in the caller.
        location: Location,
        /// The candidate callees at the site, in canonical order.
        callees: Vec<Target>,
        /// Cumulative hop count, capped to keep traces bounded.
        length: u32,
    },
}

impl TraceInfo {
    /// The hop count of this trace (0 for declarations and origins).
    #[must_use]
    pub fn length(&self) -> u32 {
        match self {
            TraceInfo::Declaration | TraceInfo::Origin(_) => 0,
            TraceInfo::CallSite { length, .. } => *length,
        }
    }

    /// Advances the trace across a call site.
    ///
    /// Declarations reify into origins at the site; origins become
    /// call sites of length 1; call sites grow by one hop up to `cap`.
    #[must_use]
    pub fn apply_call(
        &self,
        location: Location,
        callees: &[Target],
        port: &Root,
        path: &AccessPath,
        cap: u32,
    ) -> TraceInfo {
        match self {
            TraceInfo::Declaration => TraceInfo::Origin(location),
            TraceInfo::Origin(_) => TraceInfo::CallSite {
                port: port.clone(),
                path: path.clone(),
                location,
                callees: callees.to_vec(),
                length: 1,
            },
            TraceInfo::CallSite { length, .. } => TraceInfo::CallSite {
                port: port.clone(),
                path: path.clone(),
                location,
                callees: callees.to_vec(),
                length: length.saturating_add(1).min(cap),
            },
        }
    }
}
