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

//! Stop requests.
//!
//! The process-wide signal handlers only feed a [`StopTrigger`]; whoever
//! waits on the [`StopSignal`] never touches signal state directly.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP
    Hangup,
    /// Triggered from code through a [`StopTrigger`].
    Requested,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
            Self::Hangup => f.write_str("SIGHUP"),
            Self::Requested => f.write_str("stop request"),
        }
    }
}

/// Receiving side of a stop request. Owned by the manager.
#[derive(Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<Option<StopReason>>>,
}

/// Cloneable handle that ends the wait on a [`StopSignal`].
#[derive(Debug, Clone)]
pub struct StopTrigger {
    tx: Arc<watch::Sender<Option<StopReason>>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) -> StopTrigger {
        StopTrigger { tx: self.tx.clone() }
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.tx.borrow()
    }

    /// Waits without a timeout until a trigger fires. Returns at once if one
    /// already has.
    pub async fn wait(&self) -> StopReason {
        let mut rx = self.tx.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            // The sender lives in self, so the channel cannot close here.
            Err(_) => None,
        };
        reason.unwrap_or(StopReason::Requested)
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopTrigger {
    /// Records `reason` unless an earlier stop was already recorded.
    /// Returns whether this call was the one that stopped.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }
}

/// Registers SIGINT, SIGTERM and SIGHUP and fires `trigger` on the first
/// one received.
pub fn listen_for_signals(
    trigger: StopTrigger,
) -> std::io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        let reason = tokio::select! {
            _ = interrupt.recv() => StopReason::Interrupt,
            _ = terminate.recv() => StopReason::Terminate,
            _ = hangup.recv() => StopReason::Hangup,
        };

        info!("Received {reason}...");
        let _ = trigger.stop(reason);
    }))
}
