//! Control-channel listeners.
//!
//! Two std threads feed one bounded command queue: a UDP text listener (the
//! primary control surface) and a stdin reader on the hosting terminal.
//! Replies flow back over a std mpsc channel drained by the UDP thread,
//! which also owns the socket; replies without a requester address go to
//! the log instead. Neither thread ever blocks the executor: the bridge
//! into async land is `try_send` on an embassy channel, exactly like every
//! other queue in the system.

use anyhow::Context;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use std::io::BufRead;
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc;
use std::time::Duration;

use super::command::{ControlRequest, parse_line};

/// Commands buffered between the listener threads and the router task.
pub const CONTROL_QUEUE_SIZE: usize = 100;

/// A parsed request plus where its replies should go.
#[derive(Debug, Clone)]
pub struct InboundControl {
    pub request: ControlRequest,
    pub reply_to: Option<SocketAddr>,
}

/// One reply line on its way back to a requester.
#[derive(Debug, Clone)]
pub struct ControlReply {
    pub addr: Option<SocketAddr>,
    pub text: String,
}

/// Bounded queue of inbound control requests.
pub type ControlQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, InboundControl, CONTROL_QUEUE_SIZE>;
/// Receiver side of the control queue.
pub type ControlQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    InboundControl,
    CONTROL_QUEUE_SIZE,
>;
/// Sender side of the control queue.
pub type ControlQueueSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    InboundControl,
    CONTROL_QUEUE_SIZE,
>;

/// Sender half of the reply path handed to the router task.
pub type ReplySender = mpsc::Sender<ControlReply>;

/// How long the UDP thread sleeps in `recv_from` before checking for
/// replies to deliver.
const SOCKET_POLL: Duration = Duration::from_millis(50);

/// Bind the control socket and start the UDP listener thread.
pub fn start_udp_server(
    port: u16,
    commands: ControlQueueSender,
    replies: mpsc::Receiver<ControlReply>,
) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .with_context(|| format!("binding control port {}", port))?;
    socket
        .set_read_timeout(Some(SOCKET_POLL))
        .context("setting control socket timeout")?;
    log::info!("control channel listening on udp/{}", port);

    std::thread::Builder::new()
        .name("control-udp".into())
        .spawn(move || udp_loop(socket, commands, replies))
        .context("spawning control listener thread")?;
    Ok(())
}

fn udp_loop(socket: UdpSocket, commands: ControlQueueSender, replies: mpsc::Receiver<ControlReply>) {
    let mut buf = [0u8; 512];
    loop {
        while let Ok(reply) = replies.try_recv() {
            match reply.addr {
                Some(addr) => {
                    let _ = socket.send_to(reply.text.as_bytes(), addr);
                }
                None => log::info!("control reply: {}", reply.text),
            }
        }

        let (len, addr) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                log::error!("control socket error: {}", err);
                continue;
            }
        };

        let line = String::from_utf8_lossy(&buf[..len]);
        match parse_line(line.trim()) {
            Ok(request) => {
                log::debug!("control from {}: {}", addr, request.command);
                if commands
                    .try_send(InboundControl { request, reply_to: Some(addr) })
                    .is_err()
                {
                    let _ = socket.send_to(b"ERR busy\n", addr);
                }
            }
            Err(err) => {
                let _ = socket.send_to(format!("ERR {}\n", err).as_bytes(), addr);
            }
        }
    }
}

/// Start the stdin reader thread. Lines typed at the hosting terminal use
/// the same grammar; their replies land in the log.
pub fn start_stdin_listener(commands: ControlQueueSender) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("control-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line) {
                    Ok(request) => {
                        if commands
                            .try_send(InboundControl { request, reply_to: None })
                            .is_err()
                        {
                            log::warn!("control queue full, command dropped");
                        }
                    }
                    Err(err) => log::warn!("control: {}", err),
                }
            }
        })
        .context("spawning stdin listener thread")?;
    Ok(())
}
