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

//! Loading eBPF kprobe programs into the kernel.

pub use aya_kernel::AyaKernel;
pub use host::{bump_memlock_rlimit, trace_pipe};
pub use kernel::{
    AttachmentId, BoxError, KernelError, KernelTracing, ProgramToken,
};
pub use kernel_symbols::{KernelSymbols, KernelSymbolsError};
pub use probe_kind::{ParseProbeKindError, ProbeKind};
pub use program_image::{ImageError, ImageSection, ProbeProgram, ProgramImage};

mod aya_kernel;
mod host;
mod kernel;
mod kernel_symbols;
mod probe_kind;
mod program_image;
