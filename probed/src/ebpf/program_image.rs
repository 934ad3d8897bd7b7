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

//! Program images: compiled eBPF ELF objects read from disk.
//!
//! The image is validated before it is handed to the kernel so that a bad
//! path or a non-BPF object never reaches the `bpf(2)` syscall.

use super::ProbeKind;
use object::{
    Architecture, BinaryFormat, Object, ObjectSection, ObjectSymbol,
    SectionIndex, SymbolKind,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::trace;

const KPROBE_SECTION: &str = "kprobe";
const KRETPROBE_SECTION: &str = "kretprobe";
const LICENSE_SECTION: &str = "license";

// Section index, name, declared kind and target symbol.
type ProbeSection = (SectionIndex, String, ProbeKind, Option<String>);

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to read program image '{}': {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("program image '{}' is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error(
        "program image '{}' has no probe program named '{name}'",
        path.display()
    )]
    ProgramNotFound { path: PathBuf, name: String },
}

/// One entry of the ELF section table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSection {
    pub name: String,
    pub size: u64,
}

/// A function placed in a `kprobe` or `kretprobe` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeProgram {
    /// Function name, which is also the name the loader knows the program by.
    pub name: String,
    pub section: String,
    pub kind: ProbeKind,
    /// Symbol named by the section, as in `kprobe/SyS_clone`.
    pub target: Option<String>,
}

/// An eBPF object file read into memory.
///
/// Immutable once it has been registered with the kernel; the manager owns
/// it for as long as the program stays loaded.
#[derive(Debug)]
pub struct ProgramImage {
    path: PathBuf,
    bytes: Vec<u8>,
    sections: Vec<ImageSection>,
    programs: Vec<ProbeProgram>,
    license: Option<String>,
    selected: usize,
}

impl ProgramImage {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        trace!("Reading program image: {}", path.display());

        let bytes = std::fs::read(path).map_err(|source| ImageError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(path, bytes)
    }

    pub fn parse(
        path: impl Into<PathBuf>,
        bytes: Vec<u8>,
    ) -> Result<Self, ImageError> {
        let path = path.into();
        let malformed = |reason: String| ImageError::Malformed {
            path: path.clone(),
            reason,
        };

        let (sections, programs, license) = {
            let file = object::File::parse(bytes.as_slice())
                .map_err(|e| malformed(e.to_string()))?;

            if file.format() != BinaryFormat::Elf {
                return Err(malformed(format!(
                    "expected an ELF object, found {:?}",
                    file.format()
                )));
            }
            if file.architecture() != Architecture::Bpf {
                return Err(malformed(format!(
                    "expected a BPF object, found {:?}",
                    file.architecture()
                )));
            }

            let mut sections = Vec::new();
            let mut probe_sections: Vec<ProbeSection> = Vec::new();
            let mut license = None;

            for section in file.sections() {
                let name =
                    section.name().map_err(|e| malformed(e.to_string()))?;

                if name == LICENSE_SECTION {
                    let data =
                        section.data().map_err(|e| malformed(e.to_string()))?;
                    license = Some(c_string(data));
                }

                if let Some((kind, target)) = probe_section(name) {
                    probe_sections.push((
                        section.index(),
                        name.to_string(),
                        kind,
                        target,
                    ));
                }

                sections.push(ImageSection {
                    name: name.to_string(),
                    size: section.size(),
                });
            }

            let mut programs = Vec::new();
            for symbol in file.symbols() {
                if symbol.kind() != SymbolKind::Text
                    || !symbol.is_definition()
                {
                    continue;
                }
                let Some(index) = symbol.section_index() else {
                    continue;
                };
                let Some((_, section, kind, target)) =
                    probe_sections.iter().find(|(i, ..)| *i == index)
                else {
                    continue;
                };
                let name = symbol.name().map_err(|e| malformed(e.to_string()))?;
                if name.is_empty() {
                    continue;
                }

                programs.push(ProbeProgram {
                    name: name.to_string(),
                    section: section.clone(),
                    kind: *kind,
                    target: target.clone(),
                });
            }

            if programs.is_empty() {
                return Err(malformed(
                    "no kprobe or kretprobe program found".to_string(),
                ));
            }

            (sections, programs, license)
        };

        Ok(Self { path, bytes, sections, programs, license, selected: 0 })
    }

    /// Choose the program to load when the object defines more than one.
    pub fn select_program(&mut self, name: &str) -> Result<(), ImageError> {
        match self.programs.iter().position(|p| p.name == name) {
            Some(index) => {
                self.selected = index;
                Ok(())
            }
            None => Err(ImageError::ProgramNotFound {
                path: self.path.clone(),
                name: name.to_string(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn sections(&self) -> &[ImageSection] {
        &self.sections
    }

    pub fn programs(&self) -> &[ProbeProgram] {
        &self.programs
    }

    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    /// The program that will be loaded. Parsing guarantees there is one.
    pub fn program(&self) -> &ProbeProgram {
        &self.programs[self.selected]
    }
}

fn probe_section(name: &str) -> Option<(ProbeKind, Option<String>)> {
    let (prefix, target) = match name.split_once('/') {
        Some((prefix, target)) => (prefix, Some(target)),
        None => (name, None),
    };

    let kind = match prefix {
        KPROBE_SECTION => ProbeKind::Entry,
        KRETPROBE_SECTION => ProbeKind::Return,
        _ => return None,
    };

    Some((kind, target.filter(|t| !t.is_empty()).map(str::to_string)))
}

fn c_string(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bpf_object, ObjectLayout};
    use pretty_assertions::assert_eq;

    #[test]
    fn must_parse_kprobe_section_target() {
        let bytes = bpf_object(&ObjectLayout::hello());
        let image = ProgramImage::parse("hello.o", bytes).unwrap();

        assert_eq!(
            image.program(),
            &ProbeProgram {
                name: "kprobe__sys_clone".into(),
                section: "kprobe/SyS_clone".into(),
                kind: ProbeKind::Entry,
                target: Some("SyS_clone".into()),
            }
        );
        assert_eq!(image.license(), Some("GPL"));
        assert!(image.sections().iter().any(|s| s.name == "kprobe/SyS_clone"));
        assert_eq!(image.path(), Path::new("hello.o"));
    }

    #[test]
    fn must_parse_kretprobe_without_target() {
        let layout = ObjectLayout {
            programs: vec![("kretprobe", "on_return")],
            license: None,
        };
        let image =
            ProgramImage::parse("ret.o", bpf_object(&layout)).unwrap();

        assert_eq!(image.program().kind, ProbeKind::Return);
        assert_eq!(image.program().target, None);
        assert_eq!(image.license(), None);
    }

    #[test]
    fn must_select_named_program() {
        let layout = ObjectLayout {
            programs: vec![
                ("kprobe/do_sys_openat2", "trace_open"),
                ("kretprobe/do_sys_openat2", "trace_open_ret"),
            ],
            license: Some("GPL"),
        };
        let mut image =
            ProgramImage::parse("open.o", bpf_object(&layout)).unwrap();
        assert_eq!(image.programs().len(), 2);

        image.select_program("trace_open_ret").unwrap();
        assert_eq!(image.program().name, "trace_open_ret");
        assert_eq!(image.program().kind, ProbeKind::Return);

        let err = image.select_program("nope").unwrap_err();
        assert!(matches!(
            err,
            ImageError::ProgramNotFound { name, .. } if name == "nope"
        ));
    }

    #[test]
    fn must_reject_object_without_probe_program() {
        let layout = ObjectLayout {
            programs: vec![("tracepoint/syscalls/sys_enter_open", "trace")],
            license: Some("GPL"),
        };
        let err =
            ProgramImage::parse("tp.o", bpf_object(&layout)).unwrap_err();

        assert!(matches!(err, ImageError::Malformed { .. }));
    }

    #[test]
    fn must_reject_non_bpf_object() {
        let bytes = crate::test_support::native_object();
        let err = ProgramImage::parse("native.o", bytes).unwrap_err();

        assert!(
            matches!(
                &err,
                ImageError::Malformed { reason, .. } if reason.contains("BPF")
            ),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn must_reject_garbage() {
        let err = ProgramImage::parse("junk.o", b"not an elf".to_vec())
            .unwrap_err();

        assert!(matches!(err, ImageError::Malformed { .. }));
    }

    #[test]
    fn must_report_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            ProgramImage::read(dir.path().join("missing.o")).unwrap_err();

        assert!(matches!(err, ImageError::Read { .. }));
    }
}
