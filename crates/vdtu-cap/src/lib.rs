/*
 * This file is part of the vdtu kernel emulation.
 *
 * vdtu is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License version 2 as
 * published by the Free Software Foundation.
 *
 * vdtu is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
 * General Public License version 2 for more details.
 */

//! Capability tables, the distributed index, and recursive cross-kernel
//! revocation.

pub mod core;
pub mod ids;
pub mod index;
pub mod kobject;
pub mod revocation;
pub mod table;

pub use core::{CapabilityCore, KernelLink, RevokeWait, REMOTE_BATCH_CAP};
pub use ids::{CapId, CapSpace, KernelId, Selector, VpeId};
pub use index::{DistributedIndex, IndexRecord};
pub use kobject::{EpState, KObject};
pub use revocation::RevocationList;
pub use table::{CapState, Capability, CapTable};
