use crate::layout::DeviceLayout;
use crate::pipe::{Connection, MessageReader};
use crate::protocol::{MessageId, ProtocolVersion};
use crate::state::DeviceState;
use crate::types::TimeStamp;
use crate::{ProtocolError, Result};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Called on the receiver thread after every packet, outside the state lock.
pub type PacketCallback = Box<dyn FnMut(&StateReader) + Send>;
/// Called on the receiver thread at most once, when streaming fails.
pub type ErrorCallback = Box<dyn FnOnce(ProtocolError) + Send>;

pub(crate) struct Snapshot {
    state: DeviceState,
    /// Packets published so far.
    sequence: u64,
    dead: bool,
}

pub(crate) struct Shared {
    snapshot: Mutex<Snapshot>,
    packet_signal: Condvar,
}

impl Shared {
    pub(crate) fn new(layout: DeviceLayout) -> Arc<Shared> {
        Arc::new(Shared {
            snapshot: Mutex::new(Snapshot {
                state: DeviceState::new(layout),
                sequence: 0,
                dead: false,
            }),
            packet_signal: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        // The snapshot is only ever replaced wholesale, so it stays whole
        // even if a holder panicked.
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap a freshly decoded state in and wake every waiter.
    ///
    /// `scratch` receives the previous snapshot.
    pub(crate) fn publish(&self, scratch: &mut DeviceState) -> u64 {
        let sequence = {
            let mut snap = self.lock();
            std::mem::swap(&mut snap.state, scratch);
            snap.sequence += 1;
            snap.sequence
        };
        self.packet_signal.notify_all();
        sequence
    }

    pub(crate) fn mark_dead(&self) {
        self.lock().dead = true;
        self.packet_signal.notify_all();
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.lock().dead
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    /// Block until a packet newer than `after` is published.
    ///
    /// `None` waits without bound.
    pub(crate) fn wait_newer(&self, after: u64, timeout: Option<Duration>) -> Result<u64> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut snap = self.lock();
        loop {
            if snap.sequence > after {
                return Ok(snap.sequence);
            }
            if snap.dead {
                return Err(ProtocolError::ConnectionDead);
            }
            snap = match deadline {
                None => self
                    .packet_signal
                    .wait(snap)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ProtocolError::Timeout("device state packet"));
                    }
                    self.packet_signal
                        .wait_timeout(snap, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

/// Read-only view of the current device state.
///
/// Derefs to the snapshot; holds the state lock while alive.
pub struct StateGuard<'a> {
    guard: MutexGuard<'a, Snapshot>,
}

impl Deref for StateGuard<'_> {
    type Target = DeviceState;

    fn deref(&self) -> &DeviceState {
        &self.guard.state
    }
}

impl StateGuard<'_> {
    /// Number of packets published before this snapshot was taken.
    pub fn packet_count(&self) -> u64 {
        self.guard.sequence
    }
}

/// Cloneable handle for reading device state from any thread.
#[derive(Clone)]
pub struct StateReader {
    shared: Arc<Shared>,
}

impl StateReader {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Lock the current snapshot. Keep the guard short-lived; the receiver
    /// waits on the same lock to publish.
    pub fn lock_state(&self) -> StateGuard<'_> {
        StateGuard {
            guard: self.shared.lock(),
        }
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> DeviceState {
        self.shared.lock().state.clone()
    }

    pub fn packet_count(&self) -> u64 {
        self.shared.sequence()
    }

    pub fn is_dead(&self) -> bool {
        self.shared.is_dead()
    }

    /// Block until the next packet arrives, the connection dies, or `timeout` expires.
    pub fn wait_for_packet(&self, timeout: Duration) -> Result<DeviceState> {
        let after = self.shared.sequence();
        self.shared.wait_newer(after, Some(timeout))?;
        Ok(self.snapshot())
    }
}

/// Microseconds since `epoch`, used when the server sends no timestamps.
pub(crate) fn host_time_stamp(epoch: Instant) -> TimeStamp {
    epoch.elapsed().as_micros() as TimeStamp
}

/// Handle to the background receiver thread of a streaming session.
pub(crate) struct StreamReceiver<C: Connection> {
    thread: JoinHandle<MessageReader<C>>,
    /// Disconnects when the receiver thread exits.
    exited: crossbeam_channel::Receiver<()>,
}

impl<C: Connection> StreamReceiver<C> {
    /// Spawn the receiver thread. It owns the read half until it exits.
    pub(crate) fn spawn(
        reader: MessageReader<C>,
        shared: Arc<Shared>,
        version: ProtocolVersion,
        epoch: Instant,
        on_packet: PacketCallback,
        on_error: ErrorCallback,
    ) -> Result<Self> {
        let (exit_guard, exited) = crossbeam_channel::bounded(0);
        let thread = std::thread::Builder::new()
            .name("vrdevice-receiver".into())
            .spawn(move || {
                receiver_loop(reader, shared, version, epoch, on_packet, on_error, exit_guard)
            })?;
        Ok(StreamReceiver { thread, exited })
    }

    /// Wait for the thread to exit on its own.
    ///
    /// Returns `false` if it is still running after `timeout`.
    pub(crate) fn wait_exit(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(timeout) => !matches!(
                self.exited.recv_timeout(timeout),
                Err(RecvTimeoutError::Timeout)
            ),
            None => {
                let _ = self.exited.recv();
                true
            }
        }
    }

    /// Join the thread and take back the read half.
    pub(crate) fn join(self) -> Option<MessageReader<C>> {
        self.thread.join().ok()
    }
}

/// Marks the session dead when the receiver leaves its loop for any reason
/// other than STOPSTREAM_REPLY, unwinding out of a callback included.
struct DeadUnlessStopped<'a> {
    shared: &'a Shared,
    stopped: bool,
}

impl Drop for DeadUnlessStopped<'_> {
    fn drop(&mut self) {
        if !self.stopped {
            self.shared.mark_dead();
        }
    }
}

/// The receiver loop runs in a dedicated thread while streaming.
///
/// Blocks on the transport for the next message tag; decodes into a scratch
/// state and publishes it whole, so readers never see a partial packet.
/// Exits on STOPSTREAM_REPLY, or on the first error after marking the
/// session dead and reporting through `on_error`.
fn receiver_loop<C: Connection>(
    mut reader: MessageReader<C>,
    shared: Arc<Shared>,
    version: ProtocolVersion,
    epoch: Instant,
    mut on_packet: PacketCallback,
    on_error: ErrorCallback,
    _exit_guard: Sender<()>,
) -> MessageReader<C> {
    let handle = StateReader::new(shared.clone());
    let mut scratch = DeviceState::new(shared.lock().state.layout());
    let mut dead_guard = DeadUnlessStopped {
        shared: &shared,
        stopped: false,
    };

    log::info!("Device state receiver started (protocol v{})", version.version);

    let result = loop {
        match reader.read_message() {
            Ok(MessageId::PacketReply) => {
                if let Err(e) = scratch.read_from(&mut reader, version.has_time_stamps) {
                    break Err(e);
                }
                if !version.has_time_stamps {
                    scratch.set_all_time_stamps(host_time_stamp(epoch));
                }
                let sequence = shared.publish(&mut scratch);
                log::trace!("Published packet #{}", sequence);
                on_packet(&handle);
            }
            Ok(MessageId::StopStreamReply) => break Ok(()),
            Ok(received) => {
                break Err(ProtocolError::UnexpectedMessage {
                    expected: MessageId::PacketReply,
                    received,
                })
            }
            Err(e) => break Err(e),
        }
    };

    match result {
        Ok(()) => {
            dead_guard.stopped = true;
            log::info!("Device state receiver stopping (stream stopped)");
        }
        Err(e) => {
            log::error!("Device state receiver failed: {}", e);
            shared.mark_dead();
            on_error(e);
        }
    }

    reader
}
