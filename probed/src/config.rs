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

//! Configuration for probed.
//!
//! Settings come from a TOML file and from command line flags; flags win.
//! Without `--config`, [`ProbedConfig::try_default()`] looks in order at
//!
//! 1. ${HOME}/.probed/config
//! 2. /etc/probed/config
//!
//! and falls back to built-in defaults when neither exists.

use crate::ebpf::ProbeKind;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

/// Image loaded when neither the config file nor the command line name one.
pub const DEFAULT_IMAGE: &str = "hello.o";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbedConfig {
    pub probe: ProbeConfig,
    pub shutdown: ShutdownConfig,
    pub logging: LoggingConfig,
}

/// What to load and where to attach it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    /// Path to the eBPF object.
    pub image: Option<PathBuf>,
    /// Kernel symbol. Defaults to the one named by the program's section.
    pub symbol: Option<String>,
    /// Defaults to the kind the program's section declares.
    pub kind: Option<ProbeKind>,
    /// Program to load when the object holds several.
    pub program: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    /// Exit non-zero when detaching or unloading fails.
    pub strict: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub verbose: bool,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub image: PathBuf,
    pub symbol: Option<String>,
    pub kind: Option<ProbeKind>,
    pub program: Option<String>,
    pub strict_shutdown: bool,
    pub verbose: bool,
}

impl ProbedConfig {
    /// Load the first config file found in the well-known locations.
    pub fn try_default() -> Result<Self> {
        let mut search_paths = Vec::new();
        if let Ok(home) = std::env::var("HOME") {
            search_paths.push(PathBuf::from(format!("{home}/.probed/config")));
        }
        search_paths.push(PathBuf::from("/etc/probed/config"));

        match search_paths.iter().find(|path| path.is_file()) {
            Some(path) => Self::parse_from_toml_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Attempt to parse a config file into memory.
    pub fn parse_from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config_toml = String::new();
        let mut file = File::open(path).with_context(|| {
            format!("failed to open config file '{}'", path.display())
        })?;

        if file
            .read_to_string(&mut config_toml)
            .with_context(|| format!("could not read '{}'", path.display()))?
            == 0
        {
            return Err(anyhow!("empty config '{}'", path.display()));
        }

        Self::parse_from_toml(&config_toml)
            .with_context(|| format!("invalid config '{}'", path.display()))
    }

    pub fn parse_from_toml(config_toml: &str) -> Result<Self> {
        Ok(toml::from_str(config_toml)?)
    }

    /// Layer `overrides` on top of this config. Values set in `overrides`
    /// win; flags are enabled if either side enables them.
    pub fn merge(self, overrides: ProbedConfig) -> Self {
        Self {
            probe: ProbeConfig {
                image: overrides.probe.image.or(self.probe.image),
                symbol: overrides.probe.symbol.or(self.probe.symbol),
                kind: overrides.probe.kind.or(self.probe.kind),
                program: overrides.probe.program.or(self.probe.program),
            },
            shutdown: ShutdownConfig {
                strict: overrides.shutdown.strict || self.shutdown.strict,
            },
            logging: LoggingConfig {
                verbose: overrides.logging.verbose || self.logging.verbose,
            },
        }
    }

    pub fn settings(self) -> ProbeSettings {
        ProbeSettings {
            image: self
                .probe
                .image
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE)),
            symbol: self.probe.symbol,
            kind: self.probe.kind,
            program: self.probe.program,
            strict_shutdown: self.shutdown.strict,
            verbose: self.logging.verbose,
        }
    }
}
