/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! The capability surface the manager needs from the kernel tracing
//! subsystem.
//!
//! Verification, attachment and event delivery all happen in the kernel. The
//! manager only sequences four calls, so they are modelled as a trait that
//! [`super::AyaKernel`] implements for real and tests replace.

use super::{ProbeKind, ProgramImage};
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Kernel registration of a loaded program image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramToken(pub(crate) u64);

impl Display for ProgramToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

/// A live probe-to-symbol binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentId(pub(crate) u64);

impl Display for AttachmentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "attachment#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel symbol '{symbol}' does not exist")]
    UnknownSymbol { symbol: String },
    #[error("insufficient privileges to {operation}: {source}")]
    PermissionDenied { operation: &'static str, source: BoxError },
    #[error("the kernel rejected program '{program}': {source}")]
    Rejected { program: String, source: BoxError },
    #[error("program '{program}' is not a kprobe in the loaded object")]
    ProgramNotFound { program: String },
    #[error("{0} is not loaded")]
    UnknownToken(ProgramToken),
    #[error("{0} is not attached")]
    UnknownAttachment(AttachmentId),
    #[error("failed to {operation}: {source}")]
    Failed { operation: &'static str, source: BoxError },
}

impl KernelError {
    /// Wrap an error from the loader, recognising the two conditions the
    /// manager reports on their own.
    pub(crate) fn classify(
        operation: &'static str,
        error: impl Into<BoxError>,
    ) -> Self {
        let source = error.into();
        match io_error_kind(&*source) {
            Some(ErrorKind::PermissionDenied) => {
                Self::PermissionDenied { operation, source }
            }
            _ => Self::Failed { operation, source },
        }
    }
}

/// First [`std::io::Error`] kind found in the source chain of `error`.
pub(crate) fn io_error_kind(
    error: &(dyn std::error::Error + 'static),
) -> Option<ErrorKind> {
    let mut current = Some(error);
    while let Some(e) = current {
        if let Some(io_error) = e.downcast_ref::<std::io::Error>() {
            return Some(io_error.kind());
        }
        current = e.source();
    }
    None
}

pub trait KernelTracing {
    /// Register the image's selected program with the kernel. Runs the
    /// verifier; nothing is attached yet.
    fn load(&mut self, image: &ProgramImage)
        -> Result<ProgramToken, KernelError>;

    fn attach(
        &mut self,
        token: ProgramToken,
        symbol: &str,
        kind: ProbeKind,
    ) -> Result<AttachmentId, KernelError>;

    fn detach(&mut self, attachment: AttachmentId) -> Result<(), KernelError>;

    fn unload(&mut self, token: ProgramToken) -> Result<(), KernelError>;
}
