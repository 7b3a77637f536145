use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::controller::{ControllerStatus, SessionController, SessionEvent, StartOutcome, StopOutcome};
use super::error::{CaptureError, LaunchError};
use super::launch::LaunchSpec;

const COMMAND_CAPACITY: usize = 32;

enum Command {
    Start {
        spec: LaunchSpec,
        reply: oneshot::Sender<Result<StartOutcome, LaunchError>>,
    },
    Stop {
        reply: oneshot::Sender<StopOutcome>,
    },
    Status {
        reply: oneshot::Sender<ControllerStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a controller running on its own task.
///
/// The task owns the controller exclusively and reacts to commands and
/// process events as they arrive.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl ControllerHandle {
    pub fn spawn(controller: SessionController) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let events = controller.event_sender();
        let task = tokio::spawn(run(controller, rx));

        (Self { commands, events }, task)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn start(&self, spec: LaunchSpec) -> Result<StartOutcome, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { spec, reply }).await?;
        let outcome = rx.await.map_err(|_| CaptureError::ControllerStopped)??;
        Ok(outcome)
    }

    pub async fn stop(&self) -> Result<StopOutcome, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| CaptureError::ControllerStopped)
    }

    pub async fn status(&self) -> Result<ControllerStatus, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        rx.await.map_err(|_| CaptureError::ControllerStopped)
    }

    /// Kill any running engine and end the controller task
    pub async fn shutdown(&self) -> Result<(), CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| CaptureError::ControllerStopped)
    }

    async fn send(&self, command: Command) -> Result<(), CaptureError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CaptureError::ControllerStopped)
    }
}

async fn run(mut controller: SessionController, mut commands: mpsc::Receiver<Command>) {
    info!("Capture controller started");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Start { spec, reply }) => {
                    let _ = reply.send(controller.start(&spec));
                }
                Some(Command::Stop { reply }) => {
                    let _ = reply.send(controller.stop().await);
                }
                Some(Command::Status { reply }) => {
                    let _ = reply.send(controller.status());
                }
                Some(Command::Shutdown { reply }) => {
                    controller.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                None => {
                    debug!("All controller handles dropped");
                    controller.shutdown().await;
                    break;
                }
            },

            Some(event) = controller.wait_process_event(), if controller.is_active() => {
                controller.handle_process_event(event).await;
            }
        }
    }

    info!("Capture controller stopped");
}
