//! Capability types, store paths and the endpoint descriptors decoded from
//! store entries.

mod capability;
mod descriptor;

pub use capability::*;
pub use descriptor::*;
