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

//! Fixtures shared by the unit tests: BPF objects written with `object` and
//! a kernel that records calls instead of making them.

use crate::ebpf::{
    AttachmentId, KernelError, KernelTracing, ProbeKind, ProgramImage,
    ProgramToken,
};
use object::write::{Object, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags,
    SymbolKind, SymbolScope,
};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// mov r0, 0; exit
const RETURN_ZERO: [u8; 16] = [
    0xb7, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x95, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

pub(crate) struct ObjectLayout {
    /// (section, function) pairs.
    pub programs: Vec<(&'static str, &'static str)>,
    pub license: Option<&'static str>,
}

impl ObjectLayout {
    pub fn hello() -> Self {
        Self {
            programs: vec![("kprobe/SyS_clone", "kprobe__sys_clone")],
            license: Some("GPL"),
        }
    }
}

pub(crate) fn bpf_object(layout: &ObjectLayout) -> Vec<u8> {
    object_for(Architecture::Bpf, layout)
}

/// A well-formed ELF object for the host, not for the BPF VM.
pub(crate) fn native_object() -> Vec<u8> {
    object_for(Architecture::X86_64, &ObjectLayout::hello())
}

pub(crate) fn write_hello_object(dir: &Path) -> PathBuf {
    let path = dir.join("hello.o");
    std::fs::write(&path, bpf_object(&ObjectLayout::hello()))
        .expect("write hello.o");
    path
}

fn object_for(architecture: Architecture, layout: &ObjectLayout) -> Vec<u8> {
    let mut object =
        Object::new(BinaryFormat::Elf, architecture, Endianness::Little);

    for (section, function) in &layout.programs {
        let id = object.add_section(
            Vec::new(),
            section.as_bytes().to_vec(),
            SectionKind::Text,
        );
        let offset = object.append_section_data(id, &RETURN_ZERO, 8);
        let _ = object.add_symbol(Symbol {
            name: function.as_bytes().to_vec(),
            value: offset,
            size: RETURN_ZERO.len() as u64,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(id),
            flags: SymbolFlags::None,
        });
    }

    if let Some(license) = layout.license {
        let id = object.add_section(
            Vec::new(),
            b"license".to_vec(),
            SectionKind::Data,
        );
        let mut data = license.as_bytes().to_vec();
        data.push(0);
        let _ = object.append_section_data(id, &data, 1);
    }

    object.write().expect("write ELF object")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KernelCall {
    Load { program: String, token: ProgramToken },
    Attach { token: ProgramToken, symbol: String, kind: ProbeKind },
    Detach { attachment: AttachmentId },
    Unload { token: ProgramToken },
}

/// Shared view of the calls a [`RecordingKernel`] received. Survives the
/// manager that owns the kernel.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<KernelCall>>>);

impl CallLog {
    fn push(&self, call: KernelCall) {
        self.0.lock().expect("call log").push(call);
    }

    /// The calls so far, leaving the log as it is.
    pub fn snapshot(&self) -> Vec<KernelCall> {
        self.0.lock().expect("call log").clone()
    }

    pub fn take(&self) -> Vec<KernelCall> {
        std::mem::take(&mut *self.0.lock().expect("call log"))
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingKernel {
    calls: CallLog,
    symbols: HashSet<String>,
    next_id: u64,
    pub reject_load: bool,
    pub deny_attach: bool,
    pub fail_detach: bool,
    pub fail_unload: bool,
    /// Runs inside `load`, before the program is registered.
    pub on_load: Option<fn()>,
}

impl RecordingKernel {
    pub fn with_symbols(symbols: &[&str]) -> Self {
        Self {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

fn io_error(kind: ErrorKind) -> std::io::Error {
    std::io::Error::from(kind)
}

impl KernelTracing for RecordingKernel {
    fn load(
        &mut self,
        image: &ProgramImage,
    ) -> Result<ProgramToken, KernelError> {
        if let Some(on_load) = self.on_load {
            on_load();
        }

        let program = image.program().name.clone();
        if self.reject_load {
            return Err(KernelError::Rejected {
                program,
                source: io_error(ErrorKind::InvalidInput).into(),
            });
        }

        let token = ProgramToken(self.next_id());
        self.calls.push(KernelCall::Load { program, token });
        Ok(token)
    }

    fn attach(
        &mut self,
        token: ProgramToken,
        symbol: &str,
        kind: ProbeKind,
    ) -> Result<AttachmentId, KernelError> {
        self.calls.push(KernelCall::Attach {
            token,
            symbol: symbol.to_string(),
            kind,
        });

        if !self.symbols.contains(symbol) {
            return Err(KernelError::UnknownSymbol {
                symbol: symbol.to_string(),
            });
        }
        if self.deny_attach {
            return Err(KernelError::PermissionDenied {
                operation: "attach kprobe",
                source: io_error(ErrorKind::PermissionDenied).into(),
            });
        }

        Ok(AttachmentId(self.next_id()))
    }

    fn detach(&mut self, attachment: AttachmentId) -> Result<(), KernelError> {
        self.calls.push(KernelCall::Detach { attachment });
        if self.fail_detach {
            return Err(KernelError::UnknownAttachment(attachment));
        }
        Ok(())
    }

    fn unload(&mut self, token: ProgramToken) -> Result<(), KernelError> {
        self.calls.push(KernelCall::Unload { token });
        if self.fail_unload {
            return Err(KernelError::Failed {
                operation: "unload eBPF program",
                source: io_error(ErrorKind::Other).into(),
            });
        }
        Ok(())
    }
}
