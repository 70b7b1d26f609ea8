//! WebSocket endpoint: text commands in, telemetry JSON out.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use crate::arm::ArmHandle;
use crate::command::parse_command;
use crate::web::models::ErrorResponse;

pub async fn ws_handler(ws: WebSocketUpgrade, State(handle): State<ArmHandle>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, handle))
}

async fn handle_socket(socket: WebSocket, handle: ArmHandle) {
    tracing::info!("WebSocket client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut telemetry_rx = handle.subscribe();
    let (error_tx, mut error_rx) = mpsc::unbounded_channel::<String>();

    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                record = telemetry_rx.recv() => match record {
                    Ok(record) => match serde_json::to_string(&record) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("Failed to encode telemetry: {}", e);
                            continue;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("WebSocket client lagged, skipped {} records", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(text) = error_rx.recv() => text,
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let intent = match parse_command(text.as_str()) {
                Ok(intent) => intent,
                Err(e) => {
                    let body = ErrorResponse { error: e.name().to_string(), message: e.to_string() };
                    if let Ok(json) = serde_json::to_string(&body) {
                        let _ = error_tx.send(json);
                    }
                    continue;
                }
            };
            // Results reach the client as telemetry.
            if let Err(e) = handle.submit(intent) {
                tracing::warn!("WebSocket command {} not accepted: {}", intent.name(), e);
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::info!("WebSocket client disconnected");
}
