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

//! Kernel symbol table lookups backed by `/proc/kallsyms`.

use std::collections::HashSet;
use thiserror::Error;

const KALLSYMS: &str = "/proc/kallsyms";

/// Prefix the kernel puts in front of syscall entry points since 4.17.
#[cfg(target_arch = "x86_64")]
pub(super) const SYSCALL_WRAPPER_PREFIX: &str = "__x64_";
#[cfg(target_arch = "aarch64")]
pub(super) const SYSCALL_WRAPPER_PREFIX: &str = "__arm64_";
#[cfg(target_arch = "s390x")]
pub(super) const SYSCALL_WRAPPER_PREFIX: &str = "__s390x_";
#[cfg(target_arch = "riscv64")]
pub(super) const SYSCALL_WRAPPER_PREFIX: &str = "__riscv_";
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "s390x",
    target_arch = "riscv64"
)))]
pub(super) const SYSCALL_WRAPPER_PREFIX: &str = "";

#[derive(Debug, Error)]
pub enum KernelSymbolsError {
    #[error("failed to read /proc/kallsyms: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid kallsyms line {line}: '{content}'")]
    InvalidLine { line: usize, content: String },
}

#[derive(Debug, Default)]
pub struct KernelSymbols {
    names: HashSet<String>,
}

impl KernelSymbols {
    pub fn from_proc() -> Result<Self, KernelSymbolsError> {
        Self::parse(&std::fs::read_to_string(KALLSYMS)?)
    }

    /// Parse kallsyms text: `<address> <type> <name>[\t[module]]` per line.
    pub fn parse(kallsyms: &str) -> Result<Self, KernelSymbolsError> {
        let mut names = HashSet::new();

        for (index, line) in kallsyms.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let invalid = || KernelSymbolsError::InvalidLine {
                line: index + 1,
                content: line.to_string(),
            };

            let mut fields = line.split_whitespace();
            let (Some(address), Some(_kind), Some(name)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(invalid());
            };
            if u64::from_str_radix(address, 16).is_err() {
                return Err(invalid());
            }

            let _ = names.insert(name.to_string());
        }

        Ok(Self { names })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Map a requested probe target to a symbol present in the table.
    ///
    /// Legacy syscall names (`SyS_clone`, `sys_clone`) are retried with the
    /// architecture's syscall wrapper prefix (`__x64_sys_clone`).
    pub fn resolve(&self, name: &str) -> Option<String> {
        if self.contains(name) {
            return Some(name.to_string());
        }

        let syscall = name
            .strip_prefix("SyS_")
            .or_else(|| name.strip_prefix("sys_"))?;

        [
            format!("{SYSCALL_WRAPPER_PREFIX}sys_{syscall}"),
            format!("sys_{syscall}"),
        ]
        .into_iter()
        .find(|candidate| self.contains(candidate))
    }
}
