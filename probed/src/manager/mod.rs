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

//! The probe lifecycle manager.
//!
//! A manager walks a single program through
//! `Unloaded → Loaded → Attached → Detaching → Unloaded`. Load, attach and
//! shutdown run to completion on the caller's thread; waiting for a stop
//! request is the only suspension point.
//!
//! Once attached, [`ProbeManager::shutdown`] detaches and then unloads,
//! attempting both steps even if the first fails. A manager dropped before
//! shutting down releases whatever it still holds in the same order, so a
//! probe is never left attached by an early return.

pub use error::{AttachError, LoadError, ShutdownError, ShutdownFailure};
pub use probe_handle::{AttachmentState, ProbeHandle};
pub use stop::{listen_for_signals, StopReason, StopSignal, StopTrigger};

use crate::ebpf::{KernelTracing, ProbeKind, ProgramImage, ProgramToken};
use std::fmt::{Display, Formatter};
use std::path::Path;
use tracing::{error, info, warn};

mod error;
mod probe_handle;
mod stop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Unloaded,
    Loaded,
    Attached,
    Detaching,
}

impl Display for ProbeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => f.write_str("unloaded"),
            Self::Loaded => f.write_str("loaded"),
            Self::Attached => f.write_str("attached"),
            Self::Detaching => f.write_str("detaching"),
        }
    }
}

#[derive(Debug)]
struct LoadedImage {
    image: ProgramImage,
    token: ProgramToken,
}

#[derive(Debug)]
pub struct ProbeManager<K: KernelTracing> {
    kernel: K,
    state: ProbeState,
    image: Option<LoadedImage>,
    handle: Option<ProbeHandle>,
    stop: StopSignal,
    // Set by shutdown; the final Unloaded state accepts no further loads.
    retired: bool,
}

impl<K: KernelTracing> ProbeManager<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            kernel,
            state: ProbeState::Unloaded,
            image: None,
            handle: None,
            stop: StopSignal::new(),
            retired: false,
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn image(&self) -> Option<&ProgramImage> {
        self.image.as_ref().map(|loaded| &loaded.image)
    }

    pub fn handle(&self) -> Option<&ProbeHandle> {
        self.handle.as_ref()
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Read, validate and register the first probe program of the image at
    /// `path`.
    pub fn load(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<&ProgramImage, LoadError> {
        self.load_program(path, None)
    }

    /// Like [`Self::load`], choosing the program by name when given.
    ///
    /// The kernel is only called once the file has been read and parsed.
    pub fn load_program(
        &mut self,
        path: impl AsRef<Path>,
        program: Option<&str>,
    ) -> Result<&ProgramImage, LoadError> {
        if self.retired || self.state != ProbeState::Unloaded {
            return Err(LoadError::InvalidState { state: self.state });
        }

        let mut image = ProgramImage::read(path)?;
        if let Some(name) = program {
            image.select_program(name)?;
        }

        let token = self
            .kernel
            .load(&image)
            .map_err(|e| {
                LoadError::from_kernel(image.path().to_path_buf(), e)
            })?;

        info!(
            "Loaded {} program '{}' from {} (license: {})",
            image.program().kind,
            image.program().name,
            image.path().display(),
            image.license().unwrap_or("none"),
        );

        self.state = ProbeState::Loaded;
        let loaded = self.image.insert(LoadedImage { image, token });
        Ok(&loaded.image)
    }

    /// Attach the loaded program to `symbol`.
    pub fn attach(
        &mut self,
        symbol: &str,
        kind: ProbeKind,
    ) -> Result<&ProbeHandle, AttachError> {
        let (token, program) = match (&self.state, &self.image, &self.handle) {
            (ProbeState::Attached, _, Some(handle)) => {
                return Err(AttachError::AlreadyAttached {
                    symbol: handle.symbol().to_string(),
                })
            }
            (ProbeState::Loaded, Some(loaded), None) => {
                (loaded.token, loaded.image.program())
            }
            (state, ..) => return Err(AttachError::NotLoaded { state: *state }),
        };

        if program.kind != kind {
            return Err(AttachError::KindMismatch {
                program: program.name.clone(),
                declared: program.kind,
                requested: kind,
            });
        }

        let attachment = self
            .kernel
            .attach(token, symbol, kind)
            .map_err(|e| AttachError::from_kernel(symbol, e))?;

        info!("Attached {kind} probe to {symbol}");

        self.state = ProbeState::Attached;
        Ok(self.handle.insert(ProbeHandle::new(symbol, kind, attachment)))
    }

    /// A handle for ending [`Self::wait_for_stop`] from elsewhere, such as a
    /// signal listener.
    pub fn stop_trigger(&self) -> StopTrigger {
        self.stop.trigger()
    }

    /// The stop request received so far, if any.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop.reason()
    }

    pub async fn wait_for_stop(&self) -> StopReason {
        self.stop.wait().await
    }

    /// Detach the probe, then unload the program.
    ///
    /// Only valid while attached. Ends in [`ProbeState::Unloaded`] whether or
    /// not the kernel calls succeed; their failures are returned together.
    pub fn shutdown(&mut self) -> Result<(), ShutdownError> {
        if self.state != ProbeState::Attached {
            return Err(ShutdownError {
                failures: vec![ShutdownFailure::InvalidState {
                    state: self.state,
                }],
            });
        }

        self.state = ProbeState::Detaching;
        let failures = self.release();
        self.state = ProbeState::Unloaded;
        self.retired = true;

        if failures.is_empty() {
            info!("Probe detached and program unloaded");
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }

    fn release(&mut self) -> Vec<ShutdownFailure> {
        let mut failures = Vec::new();

        if let Some(mut handle) = self.handle.take() {
            handle.begin_detach();
            if let Err(source) = self.kernel.detach(handle.attachment()) {
                failures.push(ShutdownFailure::Detach {
                    symbol: handle.symbol().to_string(),
                    source,
                });
            }
        }

        if let Some(LoadedImage { image, token }) = self.image.take() {
            if let Err(source) = self.kernel.unload(token) {
                failures.push(ShutdownFailure::Unload {
                    path: image.path().to_path_buf(),
                    source,
                });
            }
        }

        failures
    }
}

impl<K: KernelTracing> Drop for ProbeManager<K> {
    fn drop(&mut self) {
        if matches!(self.state, ProbeState::Loaded | ProbeState::Attached) {
            warn!("Releasing {} probe that was not shut down", self.state);
            for failure in self.release() {
                error!("{failure}");
            }
            self.state = ProbeState::Unloaded;
        }
    }
}
