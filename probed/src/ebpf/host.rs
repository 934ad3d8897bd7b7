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

//! Host settings the loader depends on but does not manage itself.

use std::path::{Path, PathBuf};

/// Locked memory allowed for BPF maps and programs.
const MEMLOCK_LIMIT: libc::rlim_t = 128 << 20;

/// Mount points of tracefs, newest first.
const TRACEFS_MOUNTS: [&str; 2] =
    ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

/// Kernels before 5.11 charge BPF memory against `RLIMIT_MEMLOCK`, which
/// defaults to a few pages. Limits that are already high enough, including
/// unlimited, are left alone.
pub fn bump_memlock_rlimit() -> std::io::Result<()> {
    let mut current = libc::rlimit { rlim_cur: 0, rlim_max: 0 };

    // SAFETY: getrlimit only writes into the struct passed by reference.
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut current) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let Some(rlimit) = raised_memlock(current) else {
        return Ok(());
    };

    // SAFETY: setrlimit only reads the struct passed by reference.
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlimit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}

/// The limit to set, if `current` is below [`MEMLOCK_LIMIT`]. The hard limit
/// never goes down.
fn raised_memlock(current: libc::rlimit) -> Option<libc::rlimit> {
    if current.rlim_cur >= MEMLOCK_LIMIT {
        return None;
    }

    Some(libc::rlimit {
        rlim_cur: MEMLOCK_LIMIT,
        rlim_max: current.rlim_max.max(MEMLOCK_LIMIT),
    })
}

/// Where `bpf_printk` output can be read, if tracefs is mounted.
pub fn trace_pipe() -> Option<PathBuf> {
    trace_pipe_in(TRACEFS_MOUNTS.iter().map(Path::new))
}

fn trace_pipe_in<'a>(
    mounts: impl IntoIterator<Item = &'a Path>,
) -> Option<PathBuf> {
    mounts
        .into_iter()
        .map(|mount| mount.join("trace_pipe"))
        .find(|pipe| pipe.exists())
}
