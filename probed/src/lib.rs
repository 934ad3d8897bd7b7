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

//! Kernel probe lifecycle daemon.
//!
//! Loads a compiled eBPF object, attaches its kprobe (or kretprobe) to a
//! kernel symbol, keeps the probe attached until SIGINT, SIGTERM or SIGHUP
//! arrives, then detaches it and unloads the program.
//!
//! ```text
//! probed --image hello.o --symbol SyS_clone
//! ```

// Lint groups: https://doc.rust-lang.org/rustc/lints/groups.html
#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
#![warn(clippy::unwrap_used)]

use clap::Parser;
use config::{
    LoggingConfig, ProbeConfig, ProbeSettings, ProbedConfig, ShutdownConfig,
};
use ebpf::{AyaKernel, KernelTracing, ProbeKind};
use manager::{
    listen_for_signals, AttachError, LoadError, ProbeManager, ShutdownError,
    StopReason,
};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

pub mod config;
pub mod ebpf;
pub mod logging;
pub mod manager;
#[cfg(test)]
mod test_support;

const EXIT_OKAY: i32 = 0;
const EXIT_ERROR: i32 = 1;

/// Command line options for probed.
///
/// Every option overrides the matching value of the config file.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct ProbedOptions {
    /// The eBPF object to load. Defaults to hello.o
    #[clap(short, long, value_parser)]
    image: Option<PathBuf>,
    /// Kernel symbol to attach to. Defaults to the symbol named by the
    /// program's section, as in `kprobe/SyS_clone`.
    #[clap(short, long)]
    symbol: Option<String>,
    /// `entry` (kprobe) or `return` (kretprobe). Defaults to the program's
    /// declared kind.
    #[clap(short, long, value_parser)]
    kind: Option<ProbeKind>,
    /// Program to load when the object holds more than one.
    #[clap(short, long)]
    program: Option<String>,
    /// Config file. Defaults to ~/.probed/config, then /etc/probed/config
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,
    /// Exit non-zero when the probe cannot be detached or unloaded.
    #[clap(long)]
    strict_shutdown: bool,
    /// Toggle verbosity. Default false
    #[clap(short, long)]
    verbose: bool,
}

impl ProbedOptions {
    fn into_config(self) -> ProbedConfig {
        ProbedConfig {
            probe: ProbeConfig {
                image: self.image,
                symbol: self.symbol,
                kind: self.kind,
                program: self.program,
            },
            shutdown: ShutdownConfig { strict: self.strict_shutdown },
            logging: LoggingConfig { verbose: self.verbose },
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Attach(#[from] AttachError),
    #[error("failed to register signal handlers: {0}")]
    Signals(#[source] std::io::Error),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Parse the command line, run one probe to completion and return the
/// process exit code.
pub async fn daemon() -> i32 {
    let options = ProbedOptions::parse();

    let file_config = match &options.config {
        Some(path) => ProbedConfig::parse_from_toml_file(path),
        None => ProbedConfig::try_default(),
    };
    let file_config = match file_config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return EXIT_ERROR;
        }
    };
    let settings = file_config.merge(options.into_config()).settings();

    if let Err(e) = logging::init(settings.verbose) {
        eprintln!("warning: failed to initialize logging: {e}");
    }

    info!("Starting probed");
    info!("Settings: {settings:#?}");
    info!("probed is pid {}", std::process::id());

    if let Err(e) = ebpf::bump_memlock_rlimit() {
        warn!("Failed to raise RLIMIT_MEMLOCK: {e}");
    }

    let mut manager = ProbeManager::new(AyaKernel::new());
    let result = run(&mut manager, &settings).await;
    exit_code(result, settings.strict_shutdown)
}

/// Load, attach, wait for a stop request, then shut down.
///
/// A load or attach failure returns at once. Whatever was already registered
/// with the kernel is released when `manager` is dropped.
///
/// Signal handlers are in place before anything is loaded. A signal that
/// arrives while loading or attaching ends the wait as soon as it starts.
pub async fn run<K: KernelTracing>(
    manager: &mut ProbeManager<K>,
    settings: &ProbeSettings,
) -> Result<StopReason, RunError> {
    let _listener =
        listen_for_signals(manager.stop_trigger()).map_err(RunError::Signals)?;

    let program = manager
        .load_program(&settings.image, settings.program.as_deref())?
        .program()
        .clone();

    let symbol = settings
        .symbol
        .clone()
        .or(program.target)
        .ok_or_else(|| AttachError::UnspecifiedSymbol {
            program: program.name.clone(),
        })?;
    let kind = settings.kind.unwrap_or(program.kind);

    let _ = manager.attach(&symbol, kind)?;

    match ebpf::trace_pipe() {
        Some(pipe) => info!(
            "Run `sudo cat {}` in another terminal to see the probe's output",
            pipe.display()
        ),
        None => info!("tracefs is not mounted, probe output is not readable"),
    }

    if let Some(reason) = manager.stop_reason() {
        info!("{reason} arrived during startup, detaching at once");
    }

    let reason = manager.wait_for_stop().await;
    info!("Stopping after {reason}");

    manager.shutdown()?;
    Ok(reason)
}

fn exit_code(
    result: Result<StopReason, RunError>,
    strict_shutdown: bool,
) -> i32 {
    match result {
        Ok(_) => EXIT_OKAY,
        Err(RunError::Shutdown(e)) if !strict_shutdown => {
            error!("{e}");
            EXIT_OKAY
        }
        Err(e) => {
            error!("{e}");
            EXIT_ERROR
        }
    }
}
