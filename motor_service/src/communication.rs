use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context as _, Result, anyhow};
use motion_engine::{Controller, ControllerRegistry};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
};
use tracing::{debug, info, warn};

use crate::commands::{AxisProperty, Command, Request, Response, parse_command};

fn resolve<'a>(registry: &'a ControllerRegistry, card: &str) -> Result<&'a Controller> {
    let id = match card.parse::<usize>() {
        Ok(index) => registry.id(index)?,
        Err(_) => registry
            .find(card)
            .ok_or_else(|| anyhow!("Card {card:?} not found"))?,
    };
    Ok(registry.get(id)?)
}

/// Runs one request against the registry. Blocks on controller I/O.
pub fn execute(registry: &ControllerRegistry, request: &Request) -> Result<Response> {
    let controller = resolve(registry, &request.card)?;

    match request.command {
        Command::Get { axis, property } => {
            let status = controller.read_status(axis)?;
            Ok(match property {
                AxisProperty::Position => Response::Position(status.position),
                AxisProperty::Done => Response::Done(status.is_done()),
                AxisProperty::Status => Response::Status(status),
            })
        }
        Command::Period { moving_ms, idle_ms } => {
            controller.set_poll_period(
                Duration::from_millis(moving_ms),
                Duration::from_millis(idle_ms),
            );
            Ok(Response::Success)
        }
        _ => {
            let (axis, primitives) = request
                .command
                .primitives()
                .ok_or_else(|| anyhow!("Command carries no motion"))?;

            let mut transaction = controller.start_transaction(axis)?;
            for primitive in primitives {
                transaction.append(primitive)?;
            }
            let accepted = transaction.end()?;
            debug!(
                "{}: axis {} accepted {:?} ({} bytes)",
                controller.name(),
                axis,
                accepted.kind,
                accepted.bytes_written
            );
            Ok(Response::Success)
        }
    }
}

async fn reply(registry: &Arc<ControllerRegistry>, line: &str) -> String {
    let Some(request) = parse_command(line) else {
        return "Error: Invalid command format".to_string();
    };

    let registry = registry.clone();
    let result = tokio::task::spawn_blocking(move || execute(&registry, &request)).await;

    match result {
        Ok(Ok(response)) => response.to_string(),
        Ok(Err(e)) => format!("Error: {e}"),
        Err(e) => format!("Error: {e}"),
    }
}

async fn serve(socket: UnixStream, registry: Arc<ControllerRegistry>) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = reply(&registry, &line).await;
        writer.write_all(format!("{response}\n").as_bytes()).await?;
    }

    Ok(())
}

pub async fn run_communication_layer(
    socket_path: &Path,
    registry: Arc<ControllerRegistry>,
) -> Result<()> {
    // a stale socket from a previous run makes bind fail
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("Failed to remove {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind to {}", socket_path.display()))?;
    info!("Listening on {}", socket_path.display());

    loop {
        let (socket, _) = listener
            .accept()
            .await
            .context("Failed to accept connection")?;

        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(socket, registry).await {
                warn!("Client connection closed with error: {}", e);
            }
        });
    }
}
