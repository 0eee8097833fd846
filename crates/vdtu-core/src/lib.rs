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

//! vDTU data and control plane: wire format, SPSC ring buffers, the channel
//! pool, and the per-tile endpoint table.

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod log;
pub mod ring;
pub mod wire;

pub use error::{Code, Error, Result};
