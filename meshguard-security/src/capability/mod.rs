//! The capability model (spec §4.1): unforgeable, signed permission
//! tokens with scoped constraints and monotonically-narrowing delegation.

pub mod constraints;
pub mod model;
pub mod signing;

pub use constraints::{Constraints, MaxDelegations};
pub use model::{Capability, DelegationError, ResourceType};
