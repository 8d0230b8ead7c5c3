//! A speaker stand-in that acknowledges every command.
//!
//! Lets the hub run end to end without switches attached: installs and
//! removals succeed and verifies report the rule exactly as requested.

use flowhs::{SpeakerCommand, SpeakerResponse};
use tokio::sync::mpsc;

use crate::dispatch::HubMessage;

/// Answers commands until either channel closes.
pub async fn run_loopback_speaker(
    mut commands: mpsc::UnboundedReceiver<SpeakerCommand>,
    inbound: mpsc::Sender<HubMessage>,
) {
    tracing::info!("loopback speaker started");
    while let Some(command) = commands.recv().await {
        tracing::trace!(
            switch_id = %command.switch_id,
            action = %command.action,
            command_id = %command.command_id,
            "acknowledging command"
        );
        let response = SpeakerResponse::success(&command);
        if inbound
            .send(HubMessage::SpeakerResponse(response))
            .await
            .is_err()
        {
            break;
        }
    }
    tracing::info!("loopback speaker stopped");
}
