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

use crate::ebpf::{AttachmentId, ProbeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Attached,
    Detaching,
}

/// A live kernel attachment. At most one exists per manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHandle {
    symbol: String,
    kind: ProbeKind,
    attachment: AttachmentId,
    state: AttachmentState,
}

impl ProbeHandle {
    pub(crate) fn new(
        symbol: impl Into<String>,
        kind: ProbeKind,
        attachment: AttachmentId,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            attachment,
            state: AttachmentState::Attached,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn attachment(&self) -> AttachmentId {
        self.attachment
    }

    pub fn state(&self) -> AttachmentState {
        self.state
    }

    pub(crate) fn begin_detach(&mut self) {
        self.state = AttachmentState::Detaching;
    }
}
