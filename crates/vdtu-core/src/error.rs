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

//! Error codes shared across the vDTU data and control planes.
//!
//! Mirrors the `Code` / `Error` split used throughout the M3 kernel
//! (`base::errors`), minus the no_std backtrace capture: callers match on
//! [`Code`], and [`Error`] carries an optional human-readable message for
//! logging.

use thiserror::Error;

/// The error codes returned at the core boundary (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    InvalidArgs,
    Full,
    E2Big,
    NoSpace,
    NoPerm,
    NoDest,
    OutOfMem,
    NotFound,
    Exists,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::InvalidArgs => "INVALID_ARGS",
            Code::Full => "FULL",
            Code::E2Big => "E2BIG",
            Code::NoSpace => "NO_SPACE",
            Code::NoPerm => "NO_PERM",
            Code::NoDest => "NO_DEST",
            Code::OutOfMem => "OUT_OF_MEM",
            Code::NotFound => "NOT_FOUND",
            Code::Exists => "EXISTS",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code:?}: {msg}")]
pub struct Error {
    code: Code,
    msg: String,
}

impl Error {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            msg: code.as_str().to_string(),
        }
    }

    pub fn with_msg(code: Code, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }
}

pub type Result<T> = core::result::Result<T, Error>;
