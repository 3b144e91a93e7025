//! Channel-backed radio device for the simulation harness.
//!
//! Each node owns one `SimRadioDevice`. Transmissions are held for the
//! frame's virtual on-air time, then handed to the network task, which
//! models propagation and pushes an [`AirFrame`] (bytes plus the receiver's
//! computed RSSI/SNR) into every in-range node's air queue. Receive is a
//! plain queue poll, which is exactly the non-blocking `receive_once`
//! contract of the driver trait.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Timer};

use super::{ModemConfig, RadioDriver, RadioError};
use crate::protocol::frame::FRAME_LEN;
use crate::protocol::types::NodeId;

/// Frames buffered per node between scheduler polls. More than a couple
/// means the node is badly behind its RX window.
pub const AIR_QUEUE_SIZE: usize = 16;

/// Pending transmissions buffered towards the network task.
pub const TX_QUEUE_SIZE: usize = 32;

/// One frame as it arrives at a specific receiver.
#[derive(Debug, Clone)]
pub struct AirFrame {
    pub bytes: [u8; FRAME_LEN],
    pub rssi: i16,
    pub snr: i16,
}

/// One frame leaving a node's antenna.
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub sender: NodeId,
    pub bytes: [u8; FRAME_LEN],
}

/// Per-node queue of frames arriving off the air.
pub type AirQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, AirFrame, AIR_QUEUE_SIZE>;
/// Receiver half of a node's air queue.
pub type AirQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, AirFrame, AIR_QUEUE_SIZE>;
/// Sender half of a node's air queue.
pub type AirQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, AirFrame, AIR_QUEUE_SIZE>;

/// Shared queue of transmissions towards the network task.
pub type TxQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, TxRequest, TX_QUEUE_SIZE>;
/// Receiver half of the shared transmission queue.
pub type TxQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, TxRequest, TX_QUEUE_SIZE>;
/// Sender half of the shared transmission queue.
pub type TxQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, TxRequest, TX_QUEUE_SIZE>;

pub struct SimRadioDevice {
    node_id: NodeId,
    air_rx: AirQueueReceiver,
    network_tx: TxQueueSender,
    /// Virtual time one frame spends on air; `transmit` holds for this
    /// long. Derived from the modem parameters at `configure`.
    on_air: Duration,
    last_status: (i16, i16),
    started: bool,
}

impl SimRadioDevice {
    pub fn new(node_id: NodeId, air_rx: AirQueueReceiver, network_tx: TxQueueSender) -> Self {
        SimRadioDevice {
            node_id,
            air_rx,
            network_tx,
            on_air: Duration::from_micros(ModemConfig::default().time_on_air_us(FRAME_LEN)),
            last_status: (0, 0),
            started: false,
        }
    }
}

impl RadioDriver for SimRadioDevice {
    fn begin(&mut self, frequency_hz: u32, tx_power_dbm: i8) -> Result<(), RadioError> {
        log::debug!(
            "[{}] radio up: {} Hz, {} dBm", self.node_id, frequency_hz, tx_power_dbm
        );
        self.started = true;
        Ok(())
    }

    fn configure(&mut self, config: &ModemConfig) -> Result<(), RadioError> {
        if !self.started {
            return Err(RadioError::ConfigRejected("begin() not called"));
        }
        self.on_air = Duration::from_micros(config.time_on_air_us(FRAME_LEN));
        log::debug!(
            "[{}] modem: SF{} BW{} CR4/{} preamble {}, {} us on air",
            self.node_id,
            config.spreading_factor,
            config.bandwidth_hz,
            config.coding_rate_denom,
            config.preamble_len,
            self.on_air.as_micros()
        );
        Ok(())
    }

    async fn transmit(&mut self, frame: &[u8; FRAME_LEN]) -> bool {
        if !self.started {
            return false;
        }
        // Hold for the on-air time, like a blocking TX-done wait on hardware,
        // then let the medium distribute the completed frame.
        Timer::after(self.on_air).await;
        self.network_tx
            .try_send(TxRequest { sender: self.node_id, bytes: *frame })
            .is_ok()
    }

    fn receive_once(&mut self, buf: &mut [u8; FRAME_LEN]) -> Option<usize> {
        match self.air_rx.try_receive() {
            Ok(air) => {
                buf.copy_from_slice(&air.bytes);
                self.last_status = (air.rssi, air.snr);
                Some(FRAME_LEN)
            }
            Err(_) => None,
        }
    }

    fn packet_status(&self) -> (i16, i16) {
        self.last_status
    }
}
