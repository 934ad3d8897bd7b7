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

use super::ProbeState;
use crate::ebpf::{ImageError, KernelError, ProbeKind};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("kernel rejected program image '{}': {source}", path.display())]
    Rejected { path: PathBuf, source: KernelError },
    #[error("insufficient privileges to load '{}': {source}", path.display())]
    PermissionDenied { path: PathBuf, source: KernelError },
    #[error("cannot load a program image while the probe is {state}")]
    InvalidState { state: ProbeState },
}

impl LoadError {
    pub(crate) fn from_kernel(path: PathBuf, source: KernelError) -> Self {
        match source {
            KernelError::PermissionDenied { .. } => {
                Self::PermissionDenied { path, source }
            }
            _ => Self::Rejected { path, source },
        }
    }
}

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("kernel symbol '{symbol}' does not exist")]
    UnknownSymbol { symbol: String },
    #[error("insufficient privileges to attach to '{symbol}': {source}")]
    PermissionDenied { symbol: String, source: KernelError },
    #[error("a probe is already attached to '{symbol}'")]
    AlreadyAttached { symbol: String },
    #[error("cannot attach while the probe is {state}")]
    NotLoaded { state: ProbeState },
    #[error(
        "program '{program}' is declared as a {declared} probe, not {requested}"
    )]
    KindMismatch { program: String, declared: ProbeKind, requested: ProbeKind },
    #[error("no target symbol given and program '{program}' does not name one")]
    UnspecifiedSymbol { program: String },
    #[error("failed to attach to '{symbol}': {source}")]
    Kernel { symbol: String, source: KernelError },
}

impl AttachError {
    pub(crate) fn from_kernel(symbol: &str, source: KernelError) -> Self {
        let symbol = symbol.to_string();
        match source {
            KernelError::UnknownSymbol { .. } => Self::UnknownSymbol { symbol },
            KernelError::PermissionDenied { .. } => {
                Self::PermissionDenied { symbol, source }
            }
            _ => Self::Kernel { symbol, source },
        }
    }
}

/// One step of the shutdown sequence that did not succeed.
#[derive(Debug, Error)]
pub enum ShutdownFailure {
    #[error("failed to detach probe from '{symbol}': {source}")]
    Detach { symbol: String, source: KernelError },
    #[error("failed to unload '{}': {source}", path.display())]
    Unload { path: PathBuf, source: KernelError },
    #[error("cannot shut down while the probe is {state}")]
    InvalidState { state: ProbeState },
}

/// Every failure seen while shutting down. Both steps always run, so there
/// may be more than one.
#[derive(Debug, Error)]
#[error("probe shutdown failed: {}", join(.failures))]
pub struct ShutdownError {
    pub failures: Vec<ShutdownFailure>,
}

fn join(failures: &[ShutdownFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
