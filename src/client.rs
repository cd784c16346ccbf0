use crate::config::ClientConfig;
use crate::descriptor::{read_descriptor_list, VirtualDeviceDescriptor};
use crate::layout::DeviceLayout;
use crate::pipe::{self, Connection, MessageReader, MessageWriter};
use crate::protocol::{self, MessageId, ProtocolVersion, ReadWire, WriteWire};
use crate::state::DeviceState;
use crate::stream::{host_time_stamp, Shared, StateGuard, StateReader, StreamReceiver};
use crate::{ProtocolError, Result};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Instant;

/// Client session with a VR device server.
///
/// Created connected (handshake done). Commands are issued from the owning
/// thread; other threads read state through [`DeviceClient::state_reader`].
/// The first protocol or transport error kills the session for good.
pub struct DeviceClient<C: Connection = TcpStream> {
    config: ClientConfig,
    writer: MessageWriter<C>,
    /// `None` while the receiver thread owns the read half.
    reader: Option<MessageReader<C>>,
    version: ProtocolVersion,
    layout: DeviceLayout,
    virtual_devices: Vec<VirtualDeviceDescriptor>,
    state: StateReader,
    /// Decode target for polled packets; swapped with the shared snapshot.
    scratch: DeviceState,
    /// Origin of client-side timestamps for servers that send none.
    epoch: Instant,
    active: bool,
    receiver: Option<StreamReceiver<C>>,
    closed: bool,
}

fn connect_tcp<A: ToSocketAddrs>(addr: A, config: &ClientConfig) -> Result<TcpStream> {
    let mut last_err = None;
    for sock_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock_addr, config.connect_timeout) {
            Ok(stream) => {
                stream.set_nodelay(config.nodelay)?;
                return Ok(stream);
            }
            Err(e) => {
                log::debug!("Connect to {} failed: {}", sock_addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address to connect to"))
        .into())
}

struct Handshake {
    version: ProtocolVersion,
    layout: DeviceLayout,
    virtual_devices: Vec<VirtualDeviceDescriptor>,
}

/// CONNECT_REQUEST / CONNECT_REPLY, then the layout and, from version 2 on,
/// the virtual device list.
fn handshake<C: Connection>(
    reader: &mut MessageReader<C>,
    writer: &mut MessageWriter<C>,
    config: &ClientConfig,
) -> Result<Handshake> {
    writer.write_message(MessageId::ConnectRequest)?;
    writer.write_u32(config.max_protocol_version)?;
    writer.flush()?;

    if !reader.wait_for_data(config.timeout)? {
        return Err(ProtocolError::Timeout("CONNECT_REPLY"));
    }
    reader.expect_message(MessageId::ConnectReply)?;
    let version = protocol::negotiate(config.max_protocol_version, reader.read_u32()?)?;

    let layout = DeviceLayout::read_from(reader)?;
    let virtual_devices = if version.has_virtual_devices {
        read_descriptor_list(reader, &layout)?
    } else {
        Vec::new()
    };

    Ok(Handshake {
        version,
        layout,
        virtual_devices,
    })
}

impl DeviceClient<TcpStream> {
    /// Connect to a device server over TCP and run the handshake.
    pub fn connect<A: ToSocketAddrs>(addr: A, config: ClientConfig) -> Result<Self> {
        let stream = connect_tcp(addr, &config)?;
        Self::with_connection(stream, config)
    }
}

impl<C: Connection> DeviceClient<C> {
    /// Run the handshake over an already established connection.
    pub fn with_connection(conn: C, config: ClientConfig) -> Result<Self> {
        let (mut reader, mut writer) = pipe::split(conn)?;
        let hs = match handshake(&mut reader, &mut writer, &config) {
            Ok(hs) => hs,
            Err(e) => {
                log::warn!("Device server handshake failed: {}", e);
                let _ = writer.close();
                return Err(e);
            }
        };

        log::info!(
            "Connected to device server: protocol v{}, {} trackers, {} buttons, {} valuators, {} virtual devices",
            hs.version.version,
            hs.layout.num_trackers,
            hs.layout.num_buttons,
            hs.layout.num_valuators,
            hs.virtual_devices.len()
        );

        Ok(DeviceClient {
            config,
            writer,
            reader: Some(reader),
            version: hs.version,
            layout: hs.layout,
            virtual_devices: hs.virtual_devices,
            state: StateReader::new(Shared::new(hs.layout)),
            scratch: DeviceState::new(hs.layout),
            epoch: Instant::now(),
            active: false,
            receiver: None,
            closed: false,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn protocol_version(&self) -> u32 {
        self.version.version
    }

    pub fn has_virtual_devices(&self) -> bool {
        self.version.has_virtual_devices
    }

    pub fn has_time_stamps(&self) -> bool {
        self.version.has_time_stamps
    }

    pub fn layout(&self) -> DeviceLayout {
        self.layout
    }

    pub fn virtual_devices(&self) -> &[VirtualDeviceDescriptor] {
        &self.virtual_devices
    }

    pub fn find_virtual_device(&self, name: &str) -> Option<&VirtualDeviceDescriptor> {
        self.virtual_devices.iter().find(|d| d.name == name)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_streaming(&self) -> bool {
        self.receiver.is_some()
    }

    pub fn is_dead(&self) -> bool {
        self.state.is_dead()
    }

    /// Lock the current snapshot.
    pub fn lock_state(&self) -> StateGuard<'_> {
        self.state.lock_state()
    }

    /// Handle for reading state from other threads.
    pub fn state_reader(&self) -> StateReader {
        self.state.clone()
    }

    fn shared(&self) -> &Shared {
        self.state.shared()
    }

    /// Mark the session dead and pass the error on.
    fn fail<T>(&self, err: ProtocolError) -> Result<T> {
        log::error!("Device client failed: {}", err);
        self.shared().mark_dead();
        Err(err)
    }

    fn send(&mut self, id: MessageId) -> Result<()> {
        match self.writer.send(id) {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    /// Allow packet requests. No-op if already active or dead.
    pub fn activate(&mut self) -> Result<()> {
        if self.active || self.is_dead() {
            return Ok(());
        }
        self.send(MessageId::ActivateRequest)?;
        self.active = true;
        log::debug!("Device client activated");
        Ok(())
    }

    /// Disallow packet requests. No-op if inactive or dead.
    ///
    /// An active stream is stopped first.
    pub fn deactivate(&mut self) -> Result<()> {
        if !self.active || self.is_dead() {
            return Ok(());
        }
        if self.is_streaming() {
            log::warn!("deactivate() called while streaming; stopping the stream first");
            self.stop_stream()?;
        }
        self.send(MessageId::DeactivateRequest)?;
        self.active = false;
        log::debug!("Device client deactivated");
        Ok(())
    }

    /// Fetch a new device state.
    ///
    /// Polling mode: sends PACKET_REQUEST and waits up to `config.timeout`
    /// for the reply. Streaming mode: waits for the receiver thread to
    /// publish the next packet. Inactive clients return the current snapshot
    /// without touching the connection.
    pub fn get_packet(&mut self) -> Result<DeviceState> {
        if self.is_dead() {
            return Err(ProtocolError::ConnectionDead);
        }
        if !self.active {
            log::warn!("get_packet() called on an inactive client");
            return Ok(self.state.snapshot());
        }
        if self.is_streaming() {
            let after = self.shared().sequence();
            self.shared().wait_newer(after, None)?;
            return Ok(self.state.snapshot());
        }
        match self.poll_packet() {
            Ok(()) => Ok(self.state.snapshot()),
            Err(e) => self.fail(e),
        }
    }

    fn poll_packet(&mut self) -> Result<()> {
        let reader = self.reader.as_mut().ok_or(ProtocolError::ConnectionDead)?;
        self.writer.send(MessageId::PacketRequest)?;
        if !reader.wait_for_data(self.config.timeout)? {
            return Err(ProtocolError::Timeout("PACKET_REPLY"));
        }
        reader.expect_message(MessageId::PacketReply)?;
        self.scratch.read_from(reader, self.version.has_time_stamps)?;
        if !self.version.has_time_stamps {
            self.scratch.set_all_time_stamps(host_time_stamp(self.epoch));
        }
        self.state.shared().publish(&mut self.scratch);
        Ok(())
    }

    /// Switch to streaming mode.
    ///
    /// Spawns the receiver thread, sends STARTSTREAM_REQUEST and returns once
    /// the first packet has been published. `on_packet` runs on the receiver
    /// thread after every packet; `on_error` runs there at most once if the
    /// stream fails.
    ///
    /// Inactive, dead or already streaming clients drop both callbacks and
    /// return `Ok(())`.
    pub fn start_stream<P, E>(&mut self, on_packet: P, on_error: E) -> Result<()>
    where
        P: FnMut(&StateReader) + Send + 'static,
        E: FnOnce(ProtocolError) + Send + 'static,
    {
        if !self.active || self.is_dead() || self.is_streaming() {
            log::warn!(
                "start_stream() ignored (active={}, dead={}, streaming={})",
                self.active,
                self.is_dead(),
                self.is_streaming()
            );
            return Ok(());
        }
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };

        let after = self.shared().sequence();
        let receiver = match StreamReceiver::spawn(
            reader,
            self.state.shared().clone(),
            self.version,
            self.epoch,
            Box::new(on_packet),
            Box::new(on_error),
        ) {
            Ok(receiver) => receiver,
            Err(e) => return self.fail(e),
        };
        self.receiver = Some(receiver);

        let started = self
            .writer
            .send(MessageId::StartStreamRequest)
            .and_then(|()| self.shared().wait_newer(after, Some(self.config.timeout)));
        if let Err(e) = started {
            log::error!("Starting the stream failed: {}", e);
            self.abort_stream();
            return Err(e);
        }

        log::info!("Streaming started");
        Ok(())
    }

    /// Tear down a stream that cannot be stopped cooperatively.
    fn abort_stream(&mut self) {
        self.shared().mark_dead();
        let _ = self.writer.close();
        if let Some(receiver) = self.receiver.take() {
            self.reader = receiver.join();
        }
    }

    /// Leave streaming mode. No-op unless streaming.
    ///
    /// Sends STOPSTREAM_REQUEST and waits for the receiver thread to see
    /// STOPSTREAM_REPLY and exit. If that takes longer than
    /// `config.stop_stream_timeout` the connection is closed, the thread
    /// joined, and the session is dead.
    pub fn stop_stream(&mut self) -> Result<()> {
        let Some(receiver) = self.receiver.take() else {
            return Ok(());
        };

        if self.is_dead() {
            let _ = self.writer.close();
            self.reader = receiver.join();
            return Err(ProtocolError::ConnectionDead);
        }

        let sent = self.writer.send(MessageId::StopStreamRequest);
        let exited = sent.is_ok() && receiver.wait_exit(self.config.stop_stream_timeout);
        if !exited {
            log::warn!("Receiver did not stop cleanly; closing the connection");
            self.shared().mark_dead();
            let _ = self.writer.close();
        }
        self.reader = receiver.join();

        sent?;
        if !exited {
            return Err(ProtocolError::Timeout("STOPSTREAM_REPLY"));
        }
        if self.is_dead() {
            return Err(ProtocolError::ConnectionDead);
        }
        log::info!("Streaming stopped");
        Ok(())
    }

    /// End the session: stop streaming, deactivate, send DISCONNECT_REQUEST
    /// and close the connection.
    pub fn disconnect(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = if self.is_dead() {
            let _ = self.writer.close();
            if let Some(receiver) = self.receiver.take() {
                self.reader = receiver.join();
            }
            Ok(())
        } else {
            self.stop_stream()
                .and_then(|()| self.deactivate())
                .and_then(|()| self.send(MessageId::DisconnectRequest))
        };

        self.virtual_devices.clear();
        let _ = self.writer.close();
        log::info!("Disconnected from device server");
        result
    }
}

impl<C: Connection> Drop for DeviceClient<C> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::debug!("Error while dropping device client: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDeviceServer, MockServerConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> ClientConfig {
        ClientConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_stop_stream_timeout(Some(Duration::from_secs(5)))
    }

    fn spawn(config: MockServerConfig) -> (MockDeviceServer, DeviceClient) {
        let server = MockDeviceServer::spawn(config).unwrap();
        let client = DeviceClient::connect(server.addr(), fast_config()).unwrap();
        (server, client)
    }

    fn count(log: &[MessageId], id: MessageId) -> usize {
        log.iter().filter(|&&m| m == id).count()
    }

    #[test]
    fn test_handshake_v3() {
        let (server, client) = spawn(MockServerConfig::default());
        assert_eq!(client.protocol_version(), 3);
        assert!(client.has_virtual_devices());
        assert!(client.has_time_stamps());
        assert_eq!(client.layout(), DeviceLayout::new(2, 4, 2));
        assert_eq!(client.virtual_devices().len(), 2);

        let wand = client.find_virtual_device("Wand").unwrap();
        assert_eq!(wand.tracker_index, Some(1));
        assert_eq!(wand.button_index("Menu"), Some(1));
        assert!(client.find_virtual_device("Glove").is_none());

        client.disconnect().unwrap();
        assert_eq!(
            server.join(),
            vec![MessageId::ConnectRequest, MessageId::DisconnectRequest]
        );
    }

    #[test]
    fn test_negotiation_grid() {
        for client_max in 1..=3 {
            for server_max in 1..=4 {
                let server = MockDeviceServer::spawn(MockServerConfig {
                    max_version: server_max,
                    ..Default::default()
                })
                .unwrap();
                let config = fast_config().with_max_protocol_version(client_max);
                let client = DeviceClient::connect(server.addr(), config).unwrap();

                let expected = client_max.min(server_max);
                assert_eq!(client.protocol_version(), expected);
                assert_eq!(client.has_time_stamps(), expected >= 3);
                assert_eq!(client.has_virtual_devices(), expected >= 2);
                assert_eq!(client.virtual_devices().is_empty(), expected < 2);
                client.disconnect().unwrap();
                server.join();
            }
        }
    }

    #[test]
    fn test_version_one_synthesizes_time_stamps() {
        let (server, mut client) = spawn(MockServerConfig {
            max_version: 1,
            ..Default::default()
        });
        assert!(!client.has_time_stamps());
        assert!(client.virtual_devices().is_empty());

        client.activate().unwrap();
        let state = client.get_packet().unwrap();
        assert_eq!(state.valuators(), &[1.0, 1.0]);
        let stamps = state.time_stamps();
        assert!(stamps[0] > 0);
        assert!(stamps.iter().all(|&s| s == stamps[0]));

        client.disconnect().unwrap();
        server.join();
    }

    #[test]
    fn test_rejects_unsupported_version() {
        for bad in [0, 4, 99] {
            let server = MockDeviceServer::spawn(MockServerConfig {
                reply_version: Some(bad),
                ..Default::default()
            })
            .unwrap();
            let err = DeviceClient::connect(server.addr(), fast_config()).err().unwrap();
            assert!(matches!(
                err,
                ProtocolError::UnsupportedVersion { server: v, client_max: 3 } if v == bad
            ));
            server.join();
        }
    }

    #[test]
    fn test_handshake_timeout() {
        let server = MockDeviceServer::spawn(MockServerConfig {
            silent_handshake: true,
            ..Default::default()
        })
        .unwrap();
        let config = ClientConfig::default().with_timeout(Duration::from_millis(50));
        let err = DeviceClient::connect(server.addr(), config).err().unwrap();
        assert!(matches!(err, ProtocolError::Timeout("CONNECT_REPLY")));
        server.join();
    }

    #[test]
    fn test_polling_sends_one_request_per_packet() {
        let (server, mut client) = spawn(MockServerConfig::default());
        client.activate().unwrap();
        client.activate().unwrap();
        for n in 1..=5u32 {
            let state = client.get_packet().unwrap();
            assert_eq!(state.valuator(0).unwrap(), n as f32);
            assert_eq!(state.time_stamps(), &[n, n]);
            assert_eq!(state.button(0).unwrap(), n % 2 == 0);
            assert_eq!(
                state.tracker(1).unwrap().position_orientation.translation,
                [n as f32; 3]
            );
        }
        assert_eq!(client.lock_state().packet_count(), 5);
        client.disconnect().unwrap();

        let mut expected = vec![MessageId::ConnectRequest, MessageId::ActivateRequest];
        expected.extend([MessageId::PacketRequest; 5]);
        expected.extend([MessageId::DeactivateRequest, MessageId::DisconnectRequest]);
        assert_eq!(server.join(), expected);
    }

    #[test]
    fn test_inactive_get_packet_does_not_touch_connection() {
        let (server, mut client) = spawn(MockServerConfig::default());
        let state = client.get_packet().unwrap();
        assert_eq!(state, DeviceState::new(client.layout()));
        client.disconnect().unwrap();
        assert_eq!(count(&server.join(), MessageId::PacketRequest), 0);
    }

    #[test]
    fn test_malformed_reply_kills_client() {
        let (server, mut client) = spawn(MockServerConfig {
            good_packets: Some(1),
            ..Default::default()
        });
        client.activate().unwrap();
        client.get_packet().unwrap();

        let err = client.get_packet().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedMessage {
                expected: MessageId::PacketReply,
                received: MessageId::ConnectReply
            }
        ));
        assert!(client.is_dead());
        assert!(matches!(client.get_packet(), Err(ProtocolError::ConnectionDead)));
        assert!(matches!(client.get_packet(), Err(ProtocolError::ConnectionDead)));

        // Dead clients do not say goodbye
        client.disconnect().unwrap();
        let log = server.join();
        assert_eq!(count(&log, MessageId::PacketRequest), 2);
        assert_eq!(count(&log, MessageId::DisconnectRequest), 0);
    }

    #[test]
    fn test_streaming_start_and_stop() {
        let (server, mut client) = spawn(MockServerConfig::default());
        client.activate().unwrap();

        let packets = Arc::new(AtomicUsize::new(0));
        let counter = packets.clone();
        client
            .start_stream(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                |e| panic!("stream failed: {}", e),
            )
            .unwrap();
        assert!(client.is_streaming());
        let first = client.lock_state().packet_count();
        assert!(first >= 1);

        let state = client.get_packet().unwrap();
        assert!(client.lock_state().packet_count() > first);
        assert!(state.valuator(0).unwrap() >= 2.0);

        client.stop_stream().unwrap();
        assert!(!client.is_streaming());
        assert!(!client.is_dead());
        assert!(packets.load(Ordering::SeqCst) >= 2);

        // Callbacks were released; a second stream installs new ones
        let second = Arc::new(AtomicUsize::new(0));
        let counter = second.clone();
        client
            .start_stream(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                |_| {},
            )
            .unwrap();
        client.stop_stream().unwrap();

        // Back to polling with the read half returned by the receiver
        let before = client.lock_state().packet_count();
        client.get_packet().unwrap();
        assert_eq!(client.lock_state().packet_count(), before + 1);

        client.disconnect().unwrap();
        let log = server.join();
        assert_eq!(count(&log, MessageId::StartStreamRequest), 2);
        assert_eq!(count(&log, MessageId::StopStreamRequest), 2);
        assert_eq!(log.last(), Some(&MessageId::DisconnectRequest));
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_packets() {
        let (server, mut client) = spawn(MockServerConfig {
            stream_interval: Duration::from_millis(1),
            ..Default::default()
        });
        client.activate().unwrap();
        client.start_stream(|_| {}, |_| {}).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reader = client.state_reader();
                std::thread::spawn(move || {
                    let mut last_seen = 0u64;
                    for _ in 0..200 {
                        let guard = reader.lock_state();
                        let n = guard.packet_count();
                        assert!(n >= last_seen);
                        last_seen = n;

                        let f = guard.valuator(0).unwrap();
                        let expected = MockDeviceServer::packet_state(guard.layout(), f as u64);
                        assert_eq!(*guard, expected);
                        drop(guard);
                        std::thread::yield_now();
                    }
                })
            })
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }

        client.stop_stream().unwrap();
        client.disconnect().unwrap();
        server.join();
    }

    #[test]
    fn test_stop_stream_is_bounded_without_reply() {
        let server = MockDeviceServer::spawn(MockServerConfig {
            answer_stop_stream: false,
            ..Default::default()
        })
        .unwrap();
        let config = fast_config().with_stop_stream_timeout(Some(Duration::from_millis(100)));
        let mut client = DeviceClient::connect(server.addr(), config).unwrap();
        client.activate().unwrap();

        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        client
            .start_stream(
                |_| {},
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        let err = client.stop_stream().unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout("STOPSTREAM_REPLY")));
        assert!(!client.is_streaming());
        assert!(client.is_dead());
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        drop(client);
        server.join();
    }

    #[test]
    fn test_stream_error_reported_once_and_unblocks_waiters() {
        let (server, mut client) = spawn(MockServerConfig {
            good_packets: Some(3),
            ..Default::default()
        });
        client.activate().unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        client.start_stream(|_| {}, move |e| tx.send(e).unwrap()).unwrap();

        let err = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedMessage {
                received: MessageId::ConnectReply,
                ..
            }
        ));
        assert!(client.is_dead());
        assert!(matches!(client.get_packet(), Err(ProtocolError::ConnectionDead)));
        assert!(matches!(client.stop_stream(), Err(ProtocolError::ConnectionDead)));
        assert!(!client.is_streaming());
        // The sender was consumed with the FnOnce callback
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        drop(client);
        server.join();
    }

    #[test]
    fn test_panicking_packet_callback_unblocks_waiters() {
        let (server, mut client) = spawn(MockServerConfig::default());
        client.activate().unwrap();

        let calls = AtomicUsize::new(0);
        client
            .start_stream(
                move |_| {
                    if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                        panic!("packet callback failed");
                    }
                },
                |_| {},
            )
            .unwrap();

        // Run the blocking reads elsewhere so a hang fails the test instead
        let (tx, rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let err = loop {
                if let Err(e) = client.get_packet() {
                    break e;
                }
            };
            let dead = client.is_dead();
            let stopped = client.stop_stream();
            let streaming = client.is_streaming();
            tx.send((err, dead, stopped, streaming)).unwrap();
        });

        let (err, dead, stopped, streaming) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(err, ProtocolError::ConnectionDead));
        assert!(dead);
        assert!(matches!(stopped, Err(ProtocolError::ConnectionDead)));
        assert!(!streaming);

        server.join();
    }

    #[test]
    fn test_polling_timeout_kills_client() {
        let server = MockDeviceServer::spawn(MockServerConfig {
            silent_packets: true,
            ..Default::default()
        })
        .unwrap();
        let config = fast_config().with_timeout(Duration::from_millis(100));
        let mut client = DeviceClient::connect(server.addr(), config).unwrap();
        client.activate().unwrap();

        let err = client.get_packet().unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout("PACKET_REPLY")));
        assert!(client.is_dead());
        assert!(matches!(client.get_packet(), Err(ProtocolError::ConnectionDead)));

        client.disconnect().unwrap();
        let log = server.join();
        assert_eq!(count(&log, MessageId::PacketRequest), 1);
        assert_eq!(count(&log, MessageId::DisconnectRequest), 0);
    }

    #[test]
    fn test_first_packet_timeout_kills_client() {
        let server = MockDeviceServer::spawn(MockServerConfig {
            silent_packets: true,
            ..Default::default()
        })
        .unwrap();
        let config = fast_config().with_timeout(Duration::from_millis(100));
        let mut client = DeviceClient::connect(server.addr(), config).unwrap();
        client.activate().unwrap();

        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        let err = client
            .start_stream(
                |_| {},
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(_)));
        assert!(client.is_dead());
        assert!(!client.is_streaming());
        assert!(matches!(client.get_packet(), Err(ProtocolError::ConnectionDead)));
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        client.disconnect().unwrap();
        let log = server.join();
        assert_eq!(count(&log, MessageId::StartStreamRequest), 1);
        assert_eq!(count(&log, MessageId::PacketRequest), 0);
    }

    #[test]
    fn test_start_stream_when_inactive_drops_callbacks() {
        let (server, mut client) = spawn(MockServerConfig::default());
        let token = Arc::new(());
        let held = token.clone();
        client
            .start_stream(
                move |_| {
                    let _ = &held;
                },
                |_| {},
            )
            .unwrap();
        assert!(!client.is_streaming());
        assert_eq!(Arc::strong_count(&token), 1);

        client.disconnect().unwrap();
        assert_eq!(count(&server.join(), MessageId::StartStreamRequest), 0);
    }

    #[test]
    fn test_deactivate_stops_stream_first() {
        let (server, mut client) = spawn(MockServerConfig::default());
        client.activate().unwrap();
        client.start_stream(|_| {}, |_| {}).unwrap();
        client.deactivate().unwrap();
        assert!(!client.is_streaming());
        assert!(!client.is_active());

        client.disconnect().unwrap();
        let log = server.join();
        let stop = log.iter().position(|&m| m == MessageId::StopStreamRequest).unwrap();
        let deactivate = log.iter().position(|&m| m == MessageId::DeactivateRequest).unwrap();
        assert!(stop < deactivate);
    }

    #[test]
    fn test_drop_disconnects() {
        let (server, mut client) = spawn(MockServerConfig::default());
        client.activate().unwrap();
        client.start_stream(|_| {}, |_| {}).unwrap();
        drop(client);

        let log = server.join();
        assert_eq!(
            &log[log.len() - 3..],
            &[
                MessageId::StopStreamRequest,
                MessageId::DeactivateRequest,
                MessageId::DisconnectRequest
            ]
        );
    }
}
