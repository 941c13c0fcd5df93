//! TCP front end for the chat server.
//!
//! One task owns the [`Engine`] and applies commands from an mpsc queue one
//! at a time. Connection tasks only translate between the socket and that
//! queue: inbound lines become [`EngineCommand`]s, and the engine task pushes
//! resulting events into each session's outbox in the order it produced them.
//! A per-connection writer task drains the outbox onto the socket.
//!
//! The engine task holds the only sender of every outbox. On shutdown it
//! queues the notice and drops them all, so each writer flushes what is left
//! and exits, and the server waits for connection tasks before returning.

pub mod engine;
pub mod error;
pub mod registry;
pub mod sessions;

use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::{mpsc, oneshot},
    task::{JoinError, JoinSet},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::message::{ClientEvent, ServerEvent, is_malformed, read_message, write_message};
pub use engine::{Delivery, Engine};
pub use error::ChatError;
pub use registry::{Room, RoomKind, RoomRegistry};
pub use sessions::{Session, SessionId, SessionTable};

/// How long shutdown waits for connections to flush before abandoning them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Work items for the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    Connect { id: SessionId, outbox: Outbox },
    Event { id: SessionId, event: ClientEvent },
    /// A line from the session that could not be turned into an event.
    Reject { id: SessionId, error: ChatError },
    Disconnect { id: SessionId },
    /// Notifies every session, closes all outboxes and stops the engine.
    Shutdown { done: oneshot::Sender<()> },
}

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    engine: tokio::task::JoinHandle<()>,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let engine = tokio::spawn(run_engine(Engine::new(), inbox));
        Self {
            listener,
            state: Arc::new(ServerState::new(commands)),
            engine,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            state,
            engine,
        } = self;
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                biased;
                _ = &mut shutdown => {
                    handle_shutdown(&state).await;
                    break;
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_connection_exit(joined);
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state, &mut connections);
                }
            }
        }

        drop(listener);
        if let Err(err) = engine.await {
            warn!(error = ?err, "engine task failed");
        }
        drain_connections(connections).await;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(state: &Arc<ServerState>) {
    info!("server shutting down");
    let (done, flushed) = oneshot::channel();
    if state.send(EngineCommand::Shutdown { done }) {
        let _ = flushed.await;
    }
}

async fn drain_connections(mut connections: JoinSet<()>) {
    let remaining = connections.len();
    let drained = timeout(SHUTDOWN_GRACE, async {
        while let Some(joined) = connections.join_next().await {
            log_connection_exit(joined);
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "connections did not close in time"
        );
        connections.abort_all();
    } else {
        debug!(connections = remaining, "all connections closed");
    }
}

fn log_connection_exit(joined: Result<(), JoinError>) {
    match joined {
        Err(err) if err.is_panic() => warn!(error = ?err, "connection task panicked"),
        _ => {}
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
    connections: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state, connections),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    state: &Arc<ServerState>,
    connections: &mut JoinSet<()>,
) {
    let state = Arc::clone(state);
    connections.spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

/// Shared by every connection task: the way into the engine plus id allocation.
struct ServerState {
    commands: mpsc::UnboundedSender<EngineCommand>,
    next_id: AtomicU64,
}

impl ServerState {
    fn new(commands: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self {
            commands,
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns false once the engine has stopped.
    fn send(&self, command: EngineCommand) -> bool {
        if let Err(error) = self.commands.send(command) {
            debug!(?error, "engine task is gone");
            return false;
        }
        true
    }
}

/// Applies engine commands in arrival order and routes the resulting deliveries.
pub async fn run_engine<R>(
    mut engine: Engine<R>,
    mut inbox: mpsc::UnboundedReceiver<EngineCommand>,
) where
    R: rand::Rng,
{
    let mut outboxes: HashMap<SessionId, Outbox> = HashMap::new();

    while let Some(command) = inbox.recv().await {
        let deliveries = match command {
            EngineCommand::Connect { id, outbox } => {
                outboxes.insert(id, outbox);
                engine.connect(id)
            }
            EngineCommand::Event { id, event } => engine.handle(id, event),
            EngineCommand::Reject { id, error } => engine.reject(id, error),
            EngineCommand::Disconnect { id } => {
                outboxes.remove(&id);
                engine.disconnect(id)
            }
            EngineCommand::Shutdown { done } => {
                deliver(&outboxes, engine.shutdown_notice());
                outboxes.clear();
                let _ = done.send(());
                break;
            }
        };
        deliver(&outboxes, deliveries);
    }
    debug!("engine task stopped");
}

fn deliver(outboxes: &HashMap<SessionId, Outbox>, deliveries: Vec<Delivery>) {
    for Delivery { recipients, event } in deliveries {
        for id in recipients {
            let Some(outbox) = outboxes.get(&id) else {
                continue;
            };
            if outbox.send(event.clone()).is_err() {
                debug!(session = id, "outbox closed before delivery");
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let id = state.next_id();
    let (outbox, inbox) = mpsc::unbounded_channel();
    if !state.send(EngineCommand::Connect { id, outbox }) {
        return Ok(());
    }
    info!(%peer, session = id, "client connected");

    // Reads and writes run separately so a partially read line is never dropped.
    let mut writer_task = tokio::spawn(write_outgoing(writer, inbox));
    let result = select! {
        result = read_events(&state, id, &mut reader) => result,
        _ = &mut writer_task => Ok(()),
    };

    // The engine drops the outbox on disconnect, which ends the writer.
    state.send(EngineCommand::Disconnect { id });
    if !writer_task.is_finished() {
        let _ = writer_task.await;
    }
    info!(%peer, session = id, "client disconnected");

    result
}

async fn read_events<R>(state: &ServerState, id: SessionId, reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let command = match read_message::<_, ClientEvent>(reader).await {
            Ok(Some(event)) => EngineCommand::Event { id, event },
            Ok(None) => return Ok(()),
            Err(err) if is_malformed(&err) => {
                debug!(session = id, error = %err, "malformed event");
                EngineCommand::Reject {
                    id,
                    error: ChatError::MalformedEvent,
                }
            }
            Err(err) => return Err(err.into()),
        };
        if !state.send(command) {
            return Ok(());
        }
    }
}

async fn write_outgoing<W>(mut writer: W, mut inbox: mpsc::UnboundedReceiver<ServerEvent>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = inbox.recv().await {
        if let Err(err) = write_message(&mut writer, &event).await {
            debug!(?err, "failed to deliver event to client");
            return;
        }
    }
}
