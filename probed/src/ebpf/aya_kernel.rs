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

use super::{
    kernel::{AttachmentId, KernelError, KernelTracing, ProgramToken},
    KernelSymbols, ProbeKind, ProgramImage,
};
use aya::programs::{kprobe::KProbeLinkId, KProbe, ProgramError};
use aya::Ebpf;
use std::collections::HashMap;
use std::io::ErrorKind;
use tracing::{debug, trace, warn};

// The Ebpf object owns the map and program file descriptors, so it has to
// stay in memory for as long as the program is loaded.
struct LoadedProgram {
    ebpf: Ebpf,
    program: String,
}

struct Attachment {
    token: ProgramToken,
    link: KProbeLinkId,
    symbol: String,
}

/// [`KernelTracing`] backed by the aya loader.
pub struct AyaKernel {
    symbols: Option<KernelSymbols>,
    programs: HashMap<ProgramToken, LoadedProgram>,
    attachments: HashMap<AttachmentId, Attachment>,
    next_id: u64,
}

impl std::fmt::Debug for AyaKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AyaKernel")
            .field("symbols", &self.symbols.as_ref().map(KernelSymbols::len))
            .field("programs", &self.programs.len())
            .field("attachments", &self.attachments.len())
            .finish()
    }
}

impl AyaKernel {
    /// Reads `/proc/kallsyms` so unknown symbols are rejected before the
    /// kernel is asked to attach. Without it the kernel's answer decides.
    pub fn new() -> Self {
        let symbols = match KernelSymbols::from_proc() {
            Ok(symbols) if !symbols.is_empty() => Some(symbols),
            Ok(_) => {
                warn!("/proc/kallsyms is empty, skipping symbol checks");
                None
            }
            Err(e) => {
                warn!(
                    "Unable to read kernel symbols, skipping symbol checks: {e}"
                );
                None
            }
        };
        Self::with_symbols(symbols)
    }

    pub fn with_symbols(symbols: Option<KernelSymbols>) -> Self {
        Self {
            symbols,
            programs: HashMap::new(),
            attachments: HashMap::new(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn kprobe<'a>(
        ebpf: &'a mut Ebpf,
        program: &str,
    ) -> Result<&'a mut KProbe, KernelError> {
        let kprobe: &mut KProbe = ebpf
            .program_mut(program)
            .ok_or_else(|| KernelError::ProgramNotFound {
                program: program.to_string(),
            })?
            .try_into()
            .map_err(|_| KernelError::ProgramNotFound {
                program: program.to_string(),
            })?;
        Ok(kprobe)
    }
}

impl Default for AyaKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelTracing for AyaKernel {
    fn load(
        &mut self,
        image: &ProgramImage,
    ) -> Result<ProgramToken, KernelError> {
        let program = image.program().name.clone();
        trace!("Loading eBPF program: {program}");

        let mut ebpf = Ebpf::load(image.bytes())
            .map_err(|e| KernelError::classify("load eBPF object", e))?;

        match Self::kprobe(&mut ebpf, &program)?.load() {
            Ok(()) => {}
            Err(ProgramError::AlreadyLoaded) => {
                warn!("Already loaded eBPF program {program}");
            }
            Err(e) => {
                let error = KernelError::classify("load eBPF program", e);
                return Err(match error {
                    KernelError::Failed { source, .. } => {
                        KernelError::Rejected { program, source }
                    }
                    other => other,
                });
            }
        }

        let token = ProgramToken(self.next_id());
        let _ = self.programs.insert(token, LoadedProgram { ebpf, program });
        Ok(token)
    }

    fn attach(
        &mut self,
        token: ProgramToken,
        symbol: &str,
        kind: ProbeKind,
    ) -> Result<AttachmentId, KernelError> {
        let target = match &self.symbols {
            Some(symbols) => symbols.resolve(symbol).ok_or_else(|| {
                KernelError::UnknownSymbol { symbol: symbol.to_string() }
            })?,
            None => symbol.to_string(),
        };
        if target != symbol {
            debug!("Resolved '{symbol}' to kernel symbol '{target}'");
        }

        let loaded = self
            .programs
            .get_mut(&token)
            .ok_or(KernelError::UnknownToken(token))?;
        trace!("Attaching {kind} probe {} to {target}", loaded.program);

        let link = Self::kprobe(&mut loaded.ebpf, &loaded.program)?
            .attach(target.as_str(), 0)
            .map_err(|e| {
                let error = KernelError::classify("attach kprobe", e);
                match error {
                    KernelError::Failed { ref source, .. }
                        if super::kernel::io_error_kind(&**source)
                            == Some(ErrorKind::NotFound) =>
                    {
                        KernelError::UnknownSymbol {
                            symbol: symbol.to_string(),
                        }
                    }
                    other => other,
                }
            })?;

        let id = AttachmentId(self.next_id());
        let _ = self
            .attachments
            .insert(id, Attachment { token, link, symbol: target });
        Ok(id)
    }

    fn detach(&mut self, attachment: AttachmentId) -> Result<(), KernelError> {
        let Attachment { token, link, symbol } = self
            .attachments
            .remove(&attachment)
            .ok_or(KernelError::UnknownAttachment(attachment))?;
        let loaded = self
            .programs
            .get_mut(&token)
            .ok_or(KernelError::UnknownToken(token))?;
        trace!("Detaching {} from {symbol}", loaded.program);

        Self::kprobe(&mut loaded.ebpf, &loaded.program)?
            .detach(link)
            .map_err(|e| KernelError::classify("detach kprobe", e))
    }

    fn unload(&mut self, token: ProgramToken) -> Result<(), KernelError> {
        let mut loaded = self
            .programs
            .remove(&token)
            .ok_or(KernelError::UnknownToken(token))?;
        trace!("Unloading eBPF program: {}", loaded.program);

        // Links left behind are owned by the program and go with it.
        self.attachments.retain(|_, a| a.token != token);

        let result =
            Self::kprobe(&mut loaded.ebpf, &loaded.program).and_then(|kprobe| {
                kprobe.unload().map_err(|e| {
                    KernelError::classify("unload eBPF program", e)
                })
            });
        drop(loaded);
        result
    }
}
