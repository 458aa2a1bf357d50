//! The scope session: connection lifecycle, command pumping, reply
//! dispatch and the materialized mount state.
//!
//! A [`Scope`] runs three tasks:
//!
//! 1. A writer that drains the outbound queue in FIFO order onto the
//!    socket, pacing frames so the bridge's UART keeps up.
//! 2. A reader that reassembles frames from the byte stream and dispatches
//!    them into [`MountState`].
//! 3. A poller that keeps the state fresh: positions every tick, battery
//!    voltage every 16th, slew-done whichever axes still have a slew
//!    pending.
//!
//! Shutdown travels the same path as data: [`Scope::close`] enqueues a
//! marker, the writer drains up to it and exits, and its exit cancels the
//! token the reader and poller select on. Socket errors and EOF take the
//! same route, with the first error retained for [`Scope::closed`].

use std::{
    collections::HashMap,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use bytes::{Buf, BytesMut};
use futures_util::Stream;
use parking_lot::{Mutex, MutexGuard};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::ToSocketAddrs,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::{
    angle,
    aux::{self, CommandId, Message, TargetId, registry},
    transport::Transport,
};

/// outbound queue depth; motion plus the poller never get close
const COMMAND_QUEUE_SIZE: usize = 64;

/// per-monitor buffering before a lagging observer starts losing frames
const MONITOR_QUEUE_SIZE: usize = 64;

/// read granularity from the socket
const READ_BUFFER_SIZE: usize = 1024;

/// spacing between outbound frames so the bridge keeps up
const WRITE_THROTTLE: Duration = Duration::from_millis(50);

/// status refresh cadence
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// battery voltage goes out once every this many poll ticks
const VOLTAGE_POLL_PERIOD: u32 = 16;

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connect failed")]
    Connect(#[source] std::io::Error),
    #[error("socket i/o failed")]
    Io(#[from] std::io::Error),
    #[error("session closed")]
    Closed,
    #[error(transparent)]
    RateOutOfRange(#[from] angle::FractionOutOfRange),
}

/// One of the two motor axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Alt,
    Azm,
}

impl Axis {
    pub fn target(self) -> TargetId {
        match self {
            Axis::Alt => TargetId::ALT,
            Axis::Azm => TargetId::AZM,
        }
    }
}

/// Materialized view of the mount, updated by inbound replies and read by
/// the motion layer.
#[derive(Clone, Default, derive_more::Debug)]
pub struct MountState {
    /// altitude as a fraction of a full turn, normalized to `[-0.5, 0.5)`
    pub alt: f64,
    /// azimuth as a fraction of a full turn, normalized to `[-0.5, 0.5)`
    pub azm: f64,
    /// a slew is commanded on the altitude axis and not yet reported done
    pub slew_alt_pending: bool,
    /// a slew is commanded on the azimuth axis and not yet reported done
    pub slew_azm_pending: bool,
    /// a guide rate is active on at least one axis
    pub guiding: bool,
    /// last commanded goto target, informational
    pub target_alt: f64,
    /// last commanded goto target, informational
    pub target_azm: f64,
    /// volts, from the last battery report
    pub battery_voltage: f64,
    pub connected: bool,
    #[debug(skip)]
    last_replies: HashMap<(TargetId, CommandId), Vec<u8>>,
}

impl MountState {
    /// Raw payload of the most recent reply for a `(target, command)` pair
    /// that has no dedicated handler.
    pub fn last_reply(&self, target: TargetId, id: CommandId) -> Option<&[u8]> {
        self.last_replies.get(&(target, id)).map(Vec::as_slice)
    }

    pub fn slew_pending(&self, axis: Axis) -> bool {
        match axis {
            Axis::Alt => self.slew_alt_pending,
            Axis::Azm => self.slew_azm_pending,
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Frame(Message),
    /// drain marker: the writer exits when it dequeues this
    Shutdown,
}

/// A live session with the mount.
///
/// Cheaply cloneable; all clones share the same connection and state.
#[derive(Clone, Debug)]
pub struct Scope {
    state: Arc<Mutex<MountState>>,
    command_sender: mpsc::Sender<Outbound>,
    monitors: Arc<Mutex<Vec<mpsc::Sender<Message>>>>,
    shutdown: CancellationToken,
    fault: Arc<Mutex<Option<Error>>>,
}

impl Scope {
    /// Connect to the bridge, run the command-mode escape, start the
    /// session tasks and queue the init sequence.
    pub async fn connect<A: ToSocketAddrs>(address: A) -> Result<Self, Error> {
        let transport = Transport::connect(address).await.map_err(Error::Connect)?;
        let scope = Self::start(transport.into_inner());
        for message in startup_commands() {
            scope.send(message).await?;
        }
        Ok(scope)
    }

    /// Spin up the writer, reader and poller on an already transparent
    /// byte channel.
    pub(crate) fn start<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);

        let state = Arc::new(Mutex::new(MountState {
            connected: true,
            ..Default::default()
        }));
        let monitors: Arc<Mutex<Vec<mpsc::Sender<Message>>>> = Arc::default();
        let (command_sender, command_receiver) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let shutdown = CancellationToken::new();
        let fault: Arc<Mutex<Option<Error>>> = Arc::default();

        tokio::spawn({
            let state = state.clone();
            let shutdown = shutdown.clone();
            let fault = fault.clone();
            async move {
                if let Err(error) = run_writer(command_receiver, write_half).await {
                    tracing::error!(?error, "writer failed");
                    record_fault(&fault, error);
                }
                state.lock().connected = false;
                shutdown.cancel();
                tracing::debug!("writer done");
            }
        });

        tokio::spawn({
            let state = state.clone();
            let monitors = monitors.clone();
            let shutdown = shutdown.clone();
            let fault = fault.clone();
            async move {
                if let Err(error) = run_reader(read_half, &state, &monitors, &shutdown).await {
                    tracing::error!(?error, "reader failed");
                    record_fault(&fault, error);
                }
                state.lock().connected = false;
                shutdown.cancel();
                tracing::debug!("reader done");
            }
        });

        tokio::spawn(run_poller(
            command_sender.clone(),
            state.clone(),
            shutdown.clone(),
        ));

        Self {
            state,
            command_sender,
            monitors,
            shutdown,
            fault,
        }
    }

    /// Queue a raw message for transmission. Messages go out in the order
    /// they were queued.
    pub async fn send(&self, message: Message) -> Result<(), Error> {
        self.command_sender
            .send(Outbound::Frame(message))
            .await
            .map_err(|_| Error::Closed)
    }

    /// Queue a command from us (`APP`) to the given bus node.
    pub async fn send_command(
        &self,
        destination: TargetId,
        id: CommandId,
        payload: Vec<u8>,
    ) -> Result<(), Error> {
        self.send(Message::command(destination, id, payload)).await
    }

    /// Snapshot of the materialized mount state.
    pub fn state(&self) -> MountState {
        self.state.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub(crate) fn state_mut(&self) -> MutexGuard<'_, MountState> {
        self.state.lock()
    }

    /// Observe every parsed inbound frame, command echoes included.
    pub fn monitor(&self) -> FrameMonitor {
        let (sender, receiver) = mpsc::channel(MONITOR_QUEUE_SIZE);
        self.monitors.lock().push(sender);
        FrameMonitor { receiver }
    }

    /// Request an orderly shutdown. Everything queued before this call
    /// still goes out; the connection then winds down.
    pub async fn close(&self) {
        let _ = self.command_sender.send(Outbound::Shutdown).await;
    }

    /// Wait for the session to wind down. Returns the first transport
    /// fault if the session ended on one rather than on [`Scope::close`].
    pub async fn closed(&self) -> Result<(), Error> {
        self.shutdown.cancelled().await;
        match self.fault.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Stream of every inbound frame the reader parses, echoes included.
/// Obtained from [`Scope::monitor`].
#[derive(Debug)]
pub struct FrameMonitor {
    receiver: mpsc::Receiver<Message>,
}

impl FrameMonitor {
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

impl Stream for FrameMonitor {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.receiver.poll_recv(cx)
    }
}

fn record_fault(fault: &Mutex<Option<Error>>, error: Error) {
    let mut fault = fault.lock();
    if fault.is_none() {
        *fault = Some(error);
    }
}

async fn run_writer<W>(mut receiver: mpsc::Receiver<Outbound>, mut writer: W) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = receiver.recv().await {
        match outbound {
            Outbound::Frame(message) => {
                tracing::trace!(?message, "send");
                writer.write_all(&message.to_bytes()).await?;
                writer.flush().await?;
                tokio::time::sleep(WRITE_THROTTLE).await;
            }
            Outbound::Shutdown => break,
        }
    }
    writer.shutdown().await?;
    Ok(())
}

async fn run_reader<R>(
    mut reader: R,
    state: &Mutex<MountState>,
    monitors: &Mutex<Vec<mpsc::Sender<Message>>>,
    shutdown: &CancellationToken,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    let mut pending = BytesMut::new();
    let mut chunk = [0u8; READ_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = reader.read(&mut chunk) => result?,
        };
        if read == 0 {
            tracing::debug!("bridge closed the connection");
            break;
        }
        pending.extend_from_slice(&chunk[..read]);

        let (messages, consumed) = drain_frames(&pending);
        pending.advance(consumed);
        for message in messages {
            handle_frame(state, monitors, message);
        }
    }

    Ok(())
}

/// Split and parse everything complete in `pending`; malformed frames are
/// logged and dropped, the stream carries on.
fn drain_frames(pending: &[u8]) -> (Vec<Message>, usize) {
    let (frames, remainder) = aux::split_stream(pending);
    let consumed = pending.len() - remainder.len();

    let mut messages = Vec::with_capacity(frames.len());
    for frame in frames {
        match Message::parse(frame) {
            Ok(message) => messages.push(message),
            Err(error) => tracing::warn!(%error, "dropping frame"),
        }
    }
    (messages, consumed)
}

fn handle_frame(
    state: &Mutex<MountState>,
    monitors: &Mutex<Vec<mpsc::Sender<Message>>>,
    message: Message,
) {
    fan_out(monitors, &message);

    if message.destination != TargetId::APP {
        // an echo of one of our own commands bouncing off the bridge;
        // it carries no reply payload
        return;
    }

    // replies come back with the addresses swapped, so the node we asked
    // is the source
    let target = if message.destination.is_controller() {
        message.source
    } else {
        message.destination
    };

    match (target, message.id) {
        (TargetId::ALT | TargetId::AZM, CommandId::MC_GET_POSITION) => {
            let Some(bytes) = message.payload.first_chunk::<3>() else {
                return;
            };
            let fraction = angle::normalize_fraction(angle::unpack_fraction(*bytes));
            let mut state = state.lock();
            if target == TargetId::ALT {
                state.alt = fraction;
            } else {
                state.azm = fraction;
            }
        }
        (TargetId::ALT | TargetId::AZM, CommandId::MC_SLEW_DONE) => {
            // 0x00 while the axis is still moving; anything else is done.
            // To be validated against hardware: some references read the
            // polarity the other way around.
            let still_moving = message.payload == [0x00];
            let mut state = state.lock();
            if target == TargetId::ALT {
                state.slew_alt_pending = still_moving;
            } else {
                state.slew_azm_pending = still_moving;
            }
        }
        (TargetId::BAT, CommandId::GET_VOLTAGE) => {
            // micro-volts, big-endian, starting at payload offset 2
            let Some(bytes) = message
                .payload
                .get(2..)
                .and_then(|tail| tail.first_chunk::<4>())
            else {
                tracing::warn!(?message, "malformed voltage reply");
                return;
            };
            let volts = i32::from_be_bytes(*bytes) as f64 / 1e6;
            state.lock().battery_voltage = volts;
            tracing::debug!(volts, "battery");
        }
        _ => {
            if registry::command_name(target, message.id).is_some() {
                state
                    .lock()
                    .last_replies
                    .insert((target, message.id), message.payload);
            } else {
                tracing::debug!(?message, "no handler");
            }
        }
    }
}

fn fan_out(monitors: &Mutex<Vec<mpsc::Sender<Message>>>, message: &Message) {
    let mut monitors = monitors.lock();
    if monitors.is_empty() {
        return;
    }
    monitors.retain(|monitor| {
        match monitor.try_send(message.clone()) {
            Ok(()) => true,
            // a lagging observer loses this frame but stays subscribed
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    });
}

async fn run_poller(
    sender: mpsc::Sender<Outbound>,
    state: Arc<Mutex<MountState>>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let mut until_voltage = 0u32;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let mut refresh = Vec::new();
        if until_voltage == 0 {
            refresh.push(Message::command(TargetId::BAT, CommandId::GET_VOLTAGE, vec![]));
            until_voltage = VOLTAGE_POLL_PERIOD - 1;
        } else {
            until_voltage -= 1;
        }
        for axis in [TargetId::ALT, TargetId::AZM] {
            refresh.push(Message::command(axis, CommandId::MC_GET_POSITION, vec![]));
        }
        {
            let state = state.lock();
            if state.slew_alt_pending {
                refresh.push(Message::command(TargetId::ALT, CommandId::MC_SLEW_DONE, vec![]));
            }
            if state.slew_azm_pending {
                refresh.push(Message::command(TargetId::AZM, CommandId::MC_SLEW_DONE, vec![]));
            }
        }

        for message in refresh {
            if sender.send(Outbound::Frame(message)).await.is_err() {
                // writer is gone, nothing left to poll for
                return;
            }
        }
    }
}

/// Commands issued once right after the bridge goes transparent: version
/// probes, a stop on both axes, configuration reads, and cord-wrap setup
/// with the limit just shy of half a turn from home.
fn startup_commands() -> Vec<Message> {
    let axes = [TargetId::ALT, TargetId::AZM];
    let mut commands = Vec::new();

    for axis in axes {
        commands.push(Message::command(axis, CommandId::GET_VER, vec![]));
    }
    commands.push(Message::command(TargetId::AZM, CommandId::MC_UNKNOWN_05, vec![]));

    for axis in axes {
        commands.push(Message::command(axis, CommandId::MC_MOVE_POS, vec![0x00]));
        commands.push(Message::command(axis, CommandId::MC_GET_APPROACH, vec![]));
        commands.push(Message::command(axis, CommandId::MC_GET_POS_BACKLASH, vec![]));
        commands.push(Message::command(axis, CommandId::MC_GET_MAXRATE, vec![]));
        commands.push(Message::command(axis, CommandId::MC_MAXRATE_ENABLED, vec![]));
        commands.push(Message::command(axis, CommandId::MC_GET_AUTOGUIDE_RATE, vec![]));
        commands.push(Message::command(
            axis,
            CommandId::MC_SET_POS_GUIDERATE,
            vec![0x00, 0x00, 0x00],
        ));
    }

    commands.push(Message::command(TargetId::LIGHT, CommandId::GET_SET_LEVEL, vec![0x02]));
    commands.push(Message::command(TargetId::LIGHT, CommandId::GET_SET_LEVEL, vec![0x00]));
    commands.push(Message::command(TargetId::CHG, CommandId::GET_SET_MODE, vec![]));
    commands.push(Message::command(TargetId::BAT, CommandId::GET_SET_CURRENT, vec![]));
    commands.push(Message::command(TargetId::BAT, CommandId::GET_VOLTAGE, vec![]));
    commands.push(Message::command(TargetId::AZM, CommandId::MC_ENABLE_CORDWRAP, vec![]));
    commands.push(Message::command(
        TargetId::AZM,
        CommandId::MC_SET_CORDWRAP_POS,
        vec![0x7f, 0xff, 0xff],
    ));

    commands
}
