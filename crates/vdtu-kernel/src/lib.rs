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

//! Kernel control plane (spec §4.3, §4.4, §6): wires the data-plane
//! [`vdtu_core::endpoint::EndpointTable`], the capability system
//! ([`vdtu_cap::CapabilityCore`]) and the [`vdtu_bridge::InterNodeBridge`]
//! together behind the control interface and syscall surface spec.md §6
//! enumerates, plus the single-threaded cooperative poll loop spec §5
//! describes.

pub mod config;
pub mod kernel;
pub mod kernelcall;
pub mod syscall;

pub use config::KernelConfig;
pub use kernel::Kernel;
