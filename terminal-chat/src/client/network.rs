//! Background connection to the chat server.
//!
//! Runs on the tokio runtime and talks to the render loop through two
//! channels: requests come in on a tokio mpsc, and everything the user should
//! see goes out as [`NetEvent`]s on a crossbeam channel the render loop drains
//! without blocking. Connection problems are reported, never fatal.

use std::net::SocketAddr;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedReadHalf},
    select,
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::message::{ClientEvent, ServerEvent, is_malformed, read_message, write_message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    Connected,
    ConnectFailed(String),
    Disconnected,
    SendFailed(String),
    /// A request was dropped because there is no connection.
    Offline,
    Server(ServerEvent),
}

/// Both ends of the render loop's link to the network task.
pub struct Connection {
    pub requests: mpsc::UnboundedSender<ClientEvent>,
    pub events: Receiver<NetEvent>,
}

/// Starts the network task. Must be called from within a tokio runtime.
///
/// The task ends once every clone of `requests` has been dropped.
pub fn spawn(server: SocketAddr) -> Connection {
    let (requests, outgoing) = mpsc::unbounded_channel();
    let (notify, events) = unbounded();
    tokio::spawn(run_connection(server, outgoing, notify));
    Connection { requests, events }
}

async fn run_connection(
    server: SocketAddr,
    mut outgoing: mpsc::UnboundedReceiver<ClientEvent>,
    notify: Sender<NetEvent>,
) {
    let stream = match TcpStream::connect(server).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%server, error = %err, "connection failed");
            let _ = notify.send(NetEvent::ConnectFailed(err.to_string()));
            report_offline(&mut outgoing, &notify).await;
            return;
        }
    };
    info!(%server, "connected");
    let _ = notify.send(NetEvent::Connected);

    let (reader, mut writer) = stream.into_split();
    let mut reader_task = tokio::spawn(forward_server_events(
        BufReader::new(reader),
        notify.clone(),
    ));

    loop {
        select! {
            _ = &mut reader_task => break,
            request = outgoing.recv() => {
                let Some(request) = request else {
                    reader_task.abort();
                    if let Err(err) = writer.shutdown().await {
                        debug!(?err, "failed to shut down connection cleanly");
                    }
                    return;
                };
                if let Err(err) = write_message(&mut writer, &request).await {
                    warn!(event = request.name(), error = %err, "send failed");
                    let _ = notify.send(NetEvent::SendFailed(err.to_string()));
                }
            }
        }
    }

    report_offline(&mut outgoing, &notify).await;
}

async fn forward_server_events(mut reader: BufReader<OwnedReadHalf>, notify: Sender<NetEvent>) {
    loop {
        match read_message::<_, ServerEvent>(&mut reader).await {
            Ok(Some(event)) => {
                if notify.send(NetEvent::Server(event)).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(err) if is_malformed(&err) => {
                warn!(error = %err, "ignoring malformed server event");
            }
            Err(err) => {
                warn!(error = %err, "connection lost");
                break;
            }
        }
    }
    info!("disconnected");
    let _ = notify.send(NetEvent::Disconnected);
}

async fn report_offline(
    outgoing: &mut mpsc::UnboundedReceiver<ClientEvent>,
    notify: &Sender<NetEvent>,
) {
    while let Some(request) = outgoing.recv().await {
        debug!(event = request.name(), "dropping request while offline");
        let _ = notify.send(NetEvent::Offline);
    }
}
