//! Firmata Protocol Engine
//!
//! Owns the inbound ring buffer, the ingest task that fills it and the decode
//! pump that drains it. Decoded traffic goes to the [`BoardSink`]; replies to
//! outstanding requests also resolve their [`PendingRequestTable`] entry.

use crate::config::EngineConfig;
use crate::pending::{compute_key, PendingRequestTable};
use crate::sink::BoardSink;
use firmata_protocol::command::{ANALOG_MESSAGE, DIGITAL_MESSAGE, REPORT_ANALOG, REPORT_DIGITAL};
use firmata_protocol::encoder::{self, MAX_14_BIT};
use firmata_protocol::sysex::STRING_DATA;
use firmata_protocol::{
    Decoded, FirmataError, FirmwareReport, FrameDecoder, ProtocolVersion, Transport,
    FIRMWARE_RESPONSE_PREFIX, VERSION_RESPONSE_PREFIX,
};
use ring_buffer::{GrowthPolicy, RingBuffer};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    /// Transport open, handshake not yet accepted
    Opening,
    Open,
}

struct PumpTasks {
    ingest: JoinHandle<()>,
    pump: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

struct Shared<T> {
    config: EngineConfig,
    transport: tokio::sync::Mutex<T>,
    buffer: Mutex<RingBuffer<u8>>,
    data_ready: Notify,
    pending: PendingRequestTable,
    sink: Mutex<Box<dyn BoardSink>>,
    state: Mutex<ConnectionState>,
    tasks: Mutex<Option<PumpTasks>>,
    baud_rate: AtomicU32,
}

fn lock<V: ?Sized>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> Shared<T> {
    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), FirmataError> {
        if *lock(&self.state) == ConnectionState::Closed {
            return Err(FirmataError::NotOpen);
        }
        trace!("Sending {:02X?}", bytes);
        self.transport.lock().await.send(bytes).await
    }

    async fn dispatch(&self, decoded: Decoded) {
        match decoded {
            Decoded::Message(message) => {
                trace!("Decoded {:?}", message);
                lock(&self.sink).on_message(&message);
            }
            Decoded::Response {
                prefix,
                data,
                message,
            } => {
                match message {
                    Ok(message) => {
                        trace!("Decoded response {:?}", message);
                        lock(&self.sink).on_message(&message);
                    }
                    Err(e) => debug!("Malformed response {:02X?}: {}", data, e),
                }
                match compute_key(prefix) {
                    Ok(key) => {
                        self.pending.complete(key, data);
                    }
                    Err(e) => warn!("Cannot correlate response: {}", e),
                }
            }
            Decoded::Reset => {
                info!("Peer requested system reset");
                lock(&self.sink).reset();
            }
            Decoded::Reply(bytes) => {
                debug!("Answering peer query with {} bytes", bytes.len());
                if let Err(e) = self.transport.lock().await.send(&bytes).await {
                    warn!("Failed to answer peer query: {}", e);
                }
            }
        }
    }
}

/// Moves inbound chunks into the ring buffer and wakes the pump
async fn ingest<T: Transport>(shared: Arc<Shared<T>>, mut inbound: mpsc::Receiver<Vec<u8>>) {
    while let Some(chunk) = inbound.recv().await {
        let stored = lock(&shared.buffer).put_slice(&chunk);
        match stored {
            Ok(()) => shared.data_ready.notify_one(),
            Err(e) => warn!("Dropped {} inbound bytes: {}", chunk.len(), e),
        }
    }
    debug!("Inbound stream ended");
}

/// Drains the ring buffer and decodes outside the buffer lock
async fn pump<T: Transport>(shared: Arc<Shared<T>>, mut stop: oneshot::Receiver<()>) {
    let mut decoder = FrameDecoder::new(shared.config.decoder_config());
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = shared.data_ready.notified() => {}
        }

        let drained = {
            let mut buffer = lock(&shared.buffer);
            let available = buffer.len();
            if available == 0 {
                continue;
            }
            buffer.get_many(available)
        };
        let bytes = match drained {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to drain inbound buffer: {}", e);
                continue;
            }
        };

        for byte in bytes {
            match decoder.push(byte) {
                Ok(Some(decoded)) => shared.dispatch(decoded).await,
                Ok(None) => {}
                Err(e) => debug!("Discarded malformed frame: {}", e),
            }
        }
    }
    debug!("Decode pump stopped");
}

/// Firmata protocol engine over a transport
pub struct FirmataEngine<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> FirmataEngine<T> {
    /// Create a closed engine
    pub fn new(
        transport: T,
        sink: impl BoardSink,
        config: EngineConfig,
    ) -> Result<Self, FirmataError> {
        config.validate()?;
        let growth = GrowthPolicy::new(config.growth_multiplier, config.growth_constant)?;
        let buffer = RingBuffer::new(config.buffer_capacity, growth)?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport: tokio::sync::Mutex::new(transport),
                buffer: Mutex::new(buffer),
                data_ready: Notify::new(),
                pending: PendingRequestTable::new(),
                sink: Mutex::new(Box::new(sink)),
                state: Mutex::new(ConnectionState::Closed),
                tasks: Mutex::new(None),
                baud_rate: AtomicU32::new(0),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Baud rate of the current or last connection, 0 if never opened
    pub fn baud_rate(&self) -> u32 {
        self.shared.baud_rate.load(Ordering::Relaxed)
    }

    /// Outstanding request/response calls
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Open the transport at `baud_rate` without a handshake
    pub async fn open(&self, baud_rate: u32) -> Result<(), FirmataError> {
        self.start(baud_rate).await?;
        self.shared.set_state(ConnectionState::Open);
        info!("Connection open at {} baud", baud_rate);
        Ok(())
    }

    /// Open, reset the peer and start the pump; leaves the state at `Opening`
    async fn start(&self, baud_rate: u32) -> Result<(), FirmataError> {
        self.close().await;
        self.shared.set_state(ConnectionState::Opening);

        let inbound = match self.shared.transport.lock().await.open(baud_rate).await {
            Ok(inbound) => inbound,
            Err(e) => {
                self.shared.set_state(ConnectionState::Closed);
                return Err(e);
            }
        };
        lock(&self.shared.buffer).clear();
        self.shared.baud_rate.store(baud_rate, Ordering::Relaxed);

        let (stop, stopped) = oneshot::channel();
        let ingest = tokio::spawn(ingest(Arc::clone(&self.shared), inbound));
        let pump = tokio::spawn(pump(Arc::clone(&self.shared), stopped));
        *lock(&self.shared.tasks) = Some(PumpTasks { ingest, pump, stop });
        Ok(())
    }

    /// Find the baud rate a supported board answers on and stay open there
    ///
    /// Rates are tried in configured order. At each one the peer is reset
    /// `reset_count` times and asked for its protocol version.
    pub async fn probe_and_open(&self) -> Result<ProtocolVersion, FirmataError> {
        let minimum = self.shared.config.minimum_version;
        let mut too_old: Option<ProtocolVersion> = None;

        for &baud_rate in &self.shared.config.baud_rates {
            info!("Trying {} baud", baud_rate);
            match self.try_baud_rate(baud_rate).await {
                Ok(version) if version >= minimum => {
                    self.shared.set_state(ConnectionState::Open);
                    info!("Firmata {} found at {} baud", version, baud_rate);
                    return Ok(version);
                }
                Ok(version) => {
                    warn!(
                        "Device at {} baud speaks Firmata {}, need {}",
                        baud_rate, version, minimum
                    );
                    too_old = Some(version);
                }
                Err(FirmataError::Timeout(ms)) => {
                    debug!("No answer at {} baud within {}ms", baud_rate, ms)
                }
                Err(e) => warn!("Handshake at {} baud failed: {}", baud_rate, e),
            }
            self.close().await;
        }

        match too_old {
            Some(version) => Err(FirmataError::UnsupportedVersion {
                major: version.major,
                minor: version.minor,
            }),
            None => Err(FirmataError::DeviceNotFound),
        }
    }

    async fn try_baud_rate(&self, baud_rate: u32) -> Result<ProtocolVersion, FirmataError> {
        self.start(baud_rate).await?;
        let reset = encoder::encode_system_reset();
        for _ in 0..self.shared.config.reset_count {
            self.shared.send(&reset).await?;
        }
        self.query_version(self.shared.config.probe_timeout()).await
    }

    /// Send `bytes` and wait for the reply starting with `response_prefix`
    ///
    /// The waiter is registered before the write so a fast reply cannot be
    /// missed.
    pub async fn request(
        &self,
        bytes: &[u8],
        response_prefix: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, FirmataError> {
        let key = compute_key(response_prefix)?;
        if self.state() == ConnectionState::Closed {
            return Err(FirmataError::NotOpen);
        }
        let response = self.shared.pending.register(key, timeout);
        if let Err(e) = self.shared.send(bytes).await {
            self.shared.pending.cancel(&response);
            return Err(e);
        }
        response.await
    }

    /// Ask the peer for its protocol version
    pub async fn get_firmata_version(&self) -> Result<ProtocolVersion, FirmataError> {
        self.query_version(self.shared.config.request_timeout()).await
    }

    async fn query_version(&self, timeout: Duration) -> Result<ProtocolVersion, FirmataError> {
        let reply = self
            .request(&encoder::encode_version_query(), VERSION_RESPONSE_PREFIX, timeout)
            .await?;
        ProtocolVersion::from_reply(&reply)
            .ok_or_else(|| FirmataError::InvalidResponse(format!("version reply {:02X?}", reply)))
    }

    /// Ask the peer for its firmware name and versions
    pub async fn get_full_firmware_version(&self) -> Result<FirmwareReport, FirmataError> {
        let reply = self
            .request(
                &encoder::encode_firmware_query(),
                FIRMWARE_RESPONSE_PREFIX,
                self.shared.config.request_timeout(),
            )
            .await?;
        // reply starts with the REPORT_FIRMWARE sub-command
        let payload = reply.get(1..).unwrap_or_default();
        FirmwareReport::parse(payload).map_err(|e| FirmataError::InvalidResponse(e.to_string()))
    }

    /// Write a 14-bit bitmask to a digital port
    pub async fn send_digital_value(&self, port: u8, value: u16) -> Result<(), FirmataError> {
        check_channel_value(port, value)?;
        self.shared
            .send(&encoder::encode_channel_value(DIGITAL_MESSAGE, port, value))
            .await
    }

    /// Write a 14-bit analog/PWM value to a channel
    pub async fn send_analog_value(&self, channel: u8, value: u16) -> Result<(), FirmataError> {
        check_channel_value(channel, value)?;
        self.shared
            .send(&encoder::encode_channel_value(ANALOG_MESSAGE, channel, value))
            .await
    }

    pub async fn set_pin_mode(&self, pin: u8, mode: u8) -> Result<(), FirmataError> {
        check_seven_bit("pin", pin)?;
        check_seven_bit("mode", mode)?;
        self.shared.send(&encoder::encode_set_pin_mode(pin, mode)).await
    }

    pub async fn set_digital_pin_value(&self, pin: u8, high: bool) -> Result<(), FirmataError> {
        check_seven_bit("pin", pin)?;
        self.shared
            .send(&encoder::encode_digital_pin_value(pin, high))
            .await
    }

    /// Enable or disable analog reporting for a channel
    pub async fn report_analog(&self, channel: u8, enable: bool) -> Result<(), FirmataError> {
        check_nibble("channel", channel)?;
        self.shared
            .send(&encoder::encode_report(REPORT_ANALOG, channel, enable))
            .await
    }

    /// Enable or disable digital reporting for a port
    pub async fn report_digital(&self, port: u8, enable: bool) -> Result<(), FirmataError> {
        check_nibble("port", port)?;
        self.shared
            .send(&encoder::encode_report(REPORT_DIGITAL, port, enable))
            .await
    }

    /// Send a sysex frame; `payload` must already be 7-bit clean
    pub async fn send_extended_message(
        &self,
        command: u8,
        payload: &[u8],
    ) -> Result<(), FirmataError> {
        check_seven_bit("sysex command", command)?;
        if let Some(byte) = payload.iter().find(|&&b| b > 0x7F) {
            return Err(FirmataError::InvalidArgument(format!(
                "sysex payload byte {:02X} has the high bit set",
                byte
            )));
        }
        self.shared
            .send(&encoder::encode_sysex(command, payload))
            .await
    }

    pub async fn send_string(&self, text: &str) -> Result<(), FirmataError> {
        self.shared
            .send(&encoder::encode_string(STRING_DATA, text))
            .await
    }

    pub async fn send_system_reset(&self) -> Result<(), FirmataError> {
        self.shared.send(&encoder::encode_system_reset()).await
    }

    /// Announce the configured firmware identity to the peer
    pub async fn send_version_report(&self) -> Result<(), FirmataError> {
        let firmware = &self.shared.config.firmware;
        self.shared
            .send(&encoder::encode_version_report(
                firmware.protocol_major,
                firmware.protocol_minor,
                firmware.app_major,
                firmware.app_minor,
                &firmware.name,
            ))
            .await
    }

    /// Stop the pump and release the transport
    ///
    /// Idempotent. Outstanding requests are left to time out.
    pub async fn close(&self) {
        let tasks = lock(&self.shared.tasks).take();
        if let Some(PumpTasks { ingest, pump, stop }) = tasks {
            let _ = stop.send(());
            ingest.abort();
            if let Err(e) = pump.await {
                if !e.is_cancelled() {
                    warn!("Decode pump failed: {}", e);
                }
            }
            self.shared.transport.lock().await.close().await;
            lock(&self.shared.buffer).clear();
            info!("Connection at {} baud closed", self.baud_rate());
        }
        self.shared.set_state(ConnectionState::Closed);
    }
}

impl<T: Transport> Drop for FirmataEngine<T> {
    fn drop(&mut self) {
        if let Some(tasks) = lock(&self.shared.tasks).take() {
            tasks.ingest.abort();
            tasks.pump.abort();
        }
    }
}

fn check_nibble(what: &str, value: u8) -> Result<(), FirmataError> {
    if value > 0x0F {
        return Err(FirmataError::InvalidArgument(format!(
            "{} {} out of range 0-15",
            what, value
        )));
    }
    Ok(())
}

fn check_seven_bit(what: &str, value: u8) -> Result<(), FirmataError> {
    if value > 0x7F {
        return Err(FirmataError::InvalidArgument(format!(
            "{} {} out of range 0-127",
            what, value
        )));
    }
    Ok(())
}

fn check_channel_value(channel: u8, value: u16) -> Result<(), FirmataError> {
    check_nibble("channel", channel)?;
    if value > MAX_14_BIT {
        return Err(FirmataError::InvalidArgument(format!(
            "value {} exceeds {}",
            value, MAX_14_BIT
        )));
    }
    Ok(())
}
