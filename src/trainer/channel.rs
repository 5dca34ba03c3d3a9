//! Transport seam between the control engine and a machine.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::types::{CommandResponse, EncodedCommand};

/// Sends encoded commands to a machine and reports the outcome.
///
/// Implementations wrap a BLE characteristic write plus indication, or an
/// ANT+ acknowledged message. The caller bounds the wait with its own
/// timeout.
pub trait ControlChannel: Send + Sync + 'static {
    fn send(&self, command: EncodedCommand) -> impl Future<Output = CommandResponse> + Send;
}

/// In-process channel that records commands and answers from a script.
///
/// Used for headless replay and tests. Responses default to `Ack` once the
/// script runs out.
#[derive(Debug, Default)]
pub struct LoopbackChannel {
    sent: Mutex<Vec<EncodedCommand>>,
    script: Mutex<VecDeque<CommandResponse>>,
    delay: Option<Duration>,
}

impl LoopbackChannel {
    /// Channel that acknowledges everything immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel that answers with `responses` in order, then `Ack`.
    pub fn scripted(responses: impl IntoIterator<Item = CommandResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Delay every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Commands sent so far.
    pub fn sent(&self) -> Vec<EncodedCommand> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ControlChannel for LoopbackChannel {
    fn send(&self, command: EncodedCommand) -> impl Future<Output = CommandResponse> + Send {
        tracing::debug!("Loopback command #{}: {:?}", command.id, command.command);
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
        let response = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(CommandResponse::Ack);
        let delay = self.delay;

        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            response
        }
    }
}
