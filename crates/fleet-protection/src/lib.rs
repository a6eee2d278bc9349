//! fleet-protection: anomaly checks for the container fleet.
//!
//! - **`layer`**: [`ProtectionLayer`]: host status, lost containers, host
//!   operation validation, rematch over live discovery
//! - **`ports`**: port conflict precheck and free-port suggestions
//! - **`rematch`**: normalized weighted container matching
//!
//! Every check reports; none of them repairs or deletes state.

pub mod error;
pub mod layer;
pub mod ports;
pub mod rematch;

pub use error::{ProtectionError, ProtectionResult};
pub use layer::{Connectivity, HostStatusReport, HostValidation, LostContainer, LostReason, ProtectionLayer};
pub use ports::{PortConflict, PortPrecheck, RESERVED_PORTS, precheck};
pub use rematch::{Confidence, RematchCandidate, suggest_rematch};
