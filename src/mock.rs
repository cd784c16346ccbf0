//! Scripted in-process device server.
//!
//! Serves a single client over TCP on `127.0.0.1` with synthetic packets
//! whose every value is derived from the packet number, so readers can check
//! a snapshot for consistency. Misbehaviours are switched on through
//! [`MockServerConfig`].

use crate::descriptor::{write_descriptor_list, NamedIndex, TrackType, VirtualDeviceDescriptor};
use crate::layout::DeviceLayout;
use crate::pipe::{self, MessageReader, MessageWriter};
use crate::protocol::{
    server_reply_version, MessageId, ReadWire, WriteWire, PROTOCOL_VERSION,
    TIME_STAMPS_VERSION, VIRTUAL_DEVICES_VERSION,
};
use crate::state::DeviceState;
use crate::types::{PositionOrientation, TrackerState};
use crate::{ProtocolError, Result};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Highest protocol version the server speaks.
    pub max_version: u32,
    /// Answer CONNECT_REQUEST with this version instead of negotiating.
    pub reply_version: Option<u32>,
    /// Never answer CONNECT_REQUEST.
    pub silent_handshake: bool,
    /// Ignore PACKET_REQUEST and STARTSTREAM_REQUEST.
    pub silent_packets: bool,
    pub layout: DeviceLayout,
    pub virtual_devices: Vec<VirtualDeviceDescriptor>,
    /// Delay between streamed packets.
    pub stream_interval: Duration,
    /// Reply to STOPSTREAM_REQUEST; when off the server keeps streaming.
    pub answer_stop_stream: bool,
    /// After this many packets, send CONNECT_REPLY where PACKET_REPLY belongs.
    pub good_packets: Option<u64>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            max_version: PROTOCOL_VERSION,
            reply_version: None,
            silent_handshake: false,
            silent_packets: false,
            layout: DeviceLayout::new(2, 4, 2),
            virtual_devices: vec![
                VirtualDeviceDescriptor {
                    name: "Head".into(),
                    track_type: TrackType::POSITION | TrackType::ORIENTATION,
                    tracker_index: Some(0),
                    ..Default::default()
                },
                VirtualDeviceDescriptor {
                    name: "Wand".into(),
                    track_type: TrackType::FULL,
                    ray_direction: [0.0, 0.0, -1.0],
                    tracker_index: Some(1),
                    buttons: vec![
                        NamedIndex { name: "Trigger".into(), index: 0 },
                        NamedIndex { name: "Menu".into(), index: 1 },
                    ],
                    valuators: vec![
                        NamedIndex { name: "JoyX".into(), index: 0 },
                        NamedIndex { name: "JoyY".into(), index: 1 },
                    ],
                    ..Default::default()
                },
            ],
            stream_interval: Duration::from_millis(2),
            answer_stop_stream: true,
            good_packets: None,
        }
    }
}

/// Handle to a running mock server.
pub struct MockDeviceServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<MessageId>>>,
    thread: Option<JoinHandle<()>>,
}

impl MockDeviceServer {
    /// Bind to an ephemeral port and serve the first client that connects.
    pub fn spawn(config: MockServerConfig) -> io::Result<MockDeviceServer> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();

        let thread = std::thread::Builder::new()
            .name("vrdevice-mock".into())
            .spawn(move || match listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("Mock server: client {} connected", peer);
                    if let Err(e) = serve(stream, &config, &log) {
                        log::debug!("Mock server: session ended: {}", e);
                    }
                }
                Err(e) => log::warn!("Mock server: accept failed: {}", e),
            })?;

        Ok(MockDeviceServer {
            addr,
            received,
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Requests received so far, in order.
    pub fn received(&self) -> Vec<MessageId> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for the client session to end and return every request received.
    pub fn join(mut self) -> Vec<MessageId> {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.received()
    }

    /// The state sent as packet number `n` (starting at 1).
    ///
    /// Every tracker coordinate, velocity component, timestamp and valuator
    /// equals `n`; button `i` is pressed when `n + i` is even.
    pub fn packet_state(layout: DeviceLayout, n: u64) -> DeviceState {
        let f = n as f32;
        let mut state = DeviceState::new(layout);
        for i in 0..layout.num_trackers {
            let tracker = TrackerState {
                position_orientation: PositionOrientation {
                    translation: [f; 3],
                    ..PositionOrientation::IDENTITY
                },
                linear_velocity: [f; 3],
                angular_velocity: [f; 3],
            };
            // Indices come from the layout itself
            let _ = state.set_tracker(i, tracker);
        }
        state.set_all_time_stamps(n as u32);
        for i in 0..layout.num_buttons {
            let _ = state.set_button(i, (n as usize + i) % 2 == 0);
        }
        for i in 0..layout.num_valuators {
            let _ = state.set_valuator(i, f);
        }
        state
    }
}

struct Session<'a> {
    config: &'a MockServerConfig,
    log: &'a Mutex<Vec<MessageId>>,
    reader: MessageReader<TcpStream>,
    writer: MessageWriter<TcpStream>,
    with_time_stamps: bool,
    sent: u64,
}

fn serve(stream: TcpStream, config: &MockServerConfig, log: &Mutex<Vec<MessageId>>) -> Result<()> {
    stream.set_nodelay(true)?;
    let (reader, writer) = pipe::split(stream)?;
    let mut session = Session {
        config,
        log,
        reader,
        writer,
        with_time_stamps: false,
        sent: 0,
    };
    session.handshake()?;
    session.run()
}

impl Session<'_> {
    fn next_request(&mut self) -> Result<MessageId> {
        let id = self.reader.read_message()?;
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        Ok(id)
    }

    fn handshake(&mut self) -> Result<()> {
        let id = self.next_request()?;
        if id != MessageId::ConnectRequest {
            return Err(ProtocolError::UnexpectedMessage {
                expected: MessageId::ConnectRequest,
                received: id,
            });
        }
        let client_version = self.reader.read_u32()?;
        if self.config.silent_handshake {
            // Hold the connection open until the client gives up
            let _ = self.reader.read_u8();
            return Err(ProtocolError::ConnectionDead);
        }

        let version = self
            .config
            .reply_version
            .unwrap_or_else(|| server_reply_version(client_version, self.config.max_version));
        self.with_time_stamps = version >= TIME_STAMPS_VERSION;

        self.writer.write_message(MessageId::ConnectReply)?;
        self.writer.write_u32(version)?;
        self.config.layout.write_to(&mut self.writer)?;
        if version >= VIRTUAL_DEVICES_VERSION {
            write_descriptor_list(&mut self.writer, &self.config.virtual_devices)?;
        }
        self.writer.flush()
    }

    fn run(&mut self) -> Result<()> {
        loop {
            match self.next_request()? {
                MessageId::ActivateRequest | MessageId::DeactivateRequest => {}
                MessageId::PacketRequest | MessageId::StartStreamRequest
                    if self.config.silent_packets =>
                {
                    log::debug!("Mock server: ignoring packet request");
                }
                MessageId::PacketRequest => self.send_packet()?,
                MessageId::StartStreamRequest => self.stream()?,
                MessageId::DisconnectRequest => return Ok(()),
                received => {
                    return Err(ProtocolError::UnexpectedMessage {
                        expected: MessageId::PacketRequest,
                        received,
                    })
                }
            }
        }
    }

    fn send_packet(&mut self) -> Result<()> {
        if self.config.good_packets.is_some_and(|n| self.sent >= n) {
            return self.writer.send(MessageId::ConnectReply);
        }
        self.sent += 1;
        let state = MockDeviceServer::packet_state(self.config.layout, self.sent);
        self.writer.write_message(MessageId::PacketReply)?;
        state.write_to(&mut self.writer, self.with_time_stamps)?;
        self.writer.flush()
    }

    fn stream(&mut self) -> Result<()> {
        loop {
            self.send_packet()?;
            if !self.reader.wait_for_data(self.config.stream_interval)? {
                continue;
            }
            match self.next_request()? {
                MessageId::StopStreamRequest if self.config.answer_stop_stream => {
                    return self.writer.send(MessageId::StopStreamReply);
                }
                MessageId::StopStreamRequest => {
                    log::debug!("Mock server: ignoring STOPSTREAM_REQUEST");
                }
                received => {
                    return Err(ProtocolError::UnexpectedMessage {
                        expected: MessageId::StopStreamRequest,
                        received,
                    })
                }
            }
        }
    }
}
