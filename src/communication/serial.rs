// src/communication/serial.rs - One command per line over serial or stdio
use serial2_tokio::SerialPort;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use crate::arm::{ArmError, ArmHandle, Outcome};
use crate::command::{parse_command, Intent};

const USAGE: &str = "[ERROR] Invalid input. Use: x:#,y:#,z:# or base:#,elbow:#,claw:#,z:# or 'calibrate', 'stop', 'resume'";

/// Reply for a finished command.
pub fn reply_line(intent: &Intent, result: &Result<Outcome, ArmError>) -> String {
    match result {
        Err(e) => format!("[ERROR] {}", e),
        Ok(Outcome::Interrupted) => "[INFO] Motion interrupted".to_string(),
        Ok(Outcome::Superseded) => "[INFO] Superseded by a newer command".to_string(),
        Ok(Outcome::Completed) => match intent {
            Intent::MoveTo(request) => format!("Reached: {:.1},{:.1},{}", request.x, request.y, request.z),
            Intent::Calibrate => "Calibration complete".to_string(),
            Intent::Stop => "[STOP] All movement halted".to_string(),
            Intent::Resume => "[INFO] Resumed".to_string(),
            Intent::DirectControl(command) => format!(
                "Reached joints: base={} elbow={} claw={} z={}",
                command.base, command.elbow, command.claw, command.z
            ),
        },
    }
}

/// Open the configured serial port for the line transport.
pub fn open_serial(path: &str, baud: u32) -> std::io::Result<SerialPort> {
    let port = SerialPort::open(path, baud)?;
    tracing::info!("Serial command port {} @ {} baud", path, baud);
    Ok(port)
}

/// Read commands line by line and write one reply per command.
///
/// Commands run concurrently with reading, so a `stop` line is acted on while
/// a move from an earlier line is still converging.
pub async fn serve_lines<R, W>(
    reader: R,
    writer: W,
    handle: ArmHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(write_replies(writer, reply_rx));
    let _ = reply_tx.send("=== Robotic Arm Ready ===".to_string());

    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = shutdown_rx.recv() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            tracing::info!("Command stream closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        tracing::debug!("RECV: {}", line.trim());

        let intent = match parse_command(&line) {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!("{}", e);
                let _ = reply_tx.send(USAGE.to_string());
                continue;
            }
        };
        match handle.submit(intent) {
            Ok(rx) => {
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    let result = match rx.await {
                        Ok(result) => result,
                        Err(_) => Err(ArmError::ControlLoopClosed),
                    };
                    let _ = reply_tx.send(reply_line(&intent, &result));
                });
            }
            Err(e) => {
                let _ = reply_tx.send(reply_line(&intent, &Err(e)));
            }
        }
    }

    drop(reply_tx);
    if let Err(e) = writer_task.await {
        tracing::error!("Reply writer ended abnormally: {}", e);
    }
    Ok(())
}

async fn write_replies<W>(mut writer: W, mut reply_rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = reply_rx.recv().await {
        let line = format!("{}\n", reply);
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::error!("Failed to write reply: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::error!("Failed to flush reply: {}", e);
            break;
        }
    }
}

/// Serve an already opened serial port.
pub async fn serve_serial(port: SerialPort, handle: ArmHandle, shutdown_rx: broadcast::Receiver<()>) -> std::io::Result<()> {
    let (read_half, write_half) = tokio::io::split(port);
    serve_lines(BufReader::new(read_half), write_half, handle, shutdown_rx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DirectCommand;
    use crate::motion::MoveRequest;

    #[test]
    fn test_reply_lines() {
        let move_to = Intent::MoveTo(MoveRequest { x: 10.0, y: 5.0, z: 3 });
        assert_eq!(reply_line(&move_to, &Ok(Outcome::Completed)), "Reached: 10.0,5.0,3");
        assert_eq!(reply_line(&Intent::Stop, &Ok(Outcome::Completed)), "[STOP] All movement halted");
        assert_eq!(
            reply_line(&Intent::Calibrate, &Err(ArmError::Halted)),
            "[ERROR] Arm is stopped; send resume first"
        );
        let direct = Intent::DirectControl(DirectCommand { base: 1, elbow: 2, claw: 3, z: 4 });
        assert_eq!(
            reply_line(&direct, &Ok(Outcome::Completed)),
            "Reached joints: base=1 elbow=2 claw=3 z=4"
        );
    }
}
