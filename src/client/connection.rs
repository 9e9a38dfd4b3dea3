use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::client::sync::WeatherInbox;
use crate::server::protocol::{AdminCommand, AdminRequest};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection to the weather server is closed")]
    Closed,
    #[error("no admin token set for this connection")]
    NoAdminToken,
}

/// Live link to a weather server. Incoming messages go straight into the
/// inbox; the game tick applies them.
pub struct WeatherConnection {
    commands: mpsc::UnboundedSender<AdminRequest>,
    admin_token: Option<String>,
    task: JoinHandle<()>,
}

impl WeatherConnection {
    pub async fn connect(url: &str, inbox: WeatherInbox) -> Result<Self, ClientError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        info!(%url, "Connected to weather server");

        let (commands, mut command_rx) = mpsc::unbounded_channel::<AdminRequest>();
        let (mut write, mut read) = ws.split();
        let url = url.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => match inbox.push_json(text.as_str()) {
                                Ok(true) => {}
                                Ok(false) => break,
                                Err(e) => warn!(%url, "Ignoring unreadable server message: {}", e),
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                warn!(%url, "WebSocket read failed: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    command = command_rx.recv() => {
                        let Some(command) = command else { break };
                        debug!(command = ?command.command, "Sending admin command");
                        if write.send(Message::Text(command.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = write.close().await;
            info!(%url, "Disconnected from weather server");
        });

        Ok(WeatherConnection {
            commands,
            admin_token: None,
            task,
        })
    }

    /// Token sent with every admin command; the server drops commands
    /// without the one it was configured with.
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    pub fn send_command(&self, command: AdminCommand) -> Result<(), ClientError> {
        let token = self.admin_token.clone().ok_or(ClientError::NoAdminToken)?;
        self.commands
            .send(AdminRequest::new(token, command))
            .map_err(|_| ClientError::Closed)
    }

    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn close(self) {
        self.task.abort();
    }
}
