//! The 48-byte fixed-length wire format.
//!
//! Every frame on the air is exactly [`FRAME_LEN`] bytes, multi-byte fields
//! big-endian, sent with the modem in fixed-length mode so both sides know
//! the size without a header. Three bytes are packed bit fields; those are
//! encoded and decoded through explicit shift/mask helpers rather than any
//! language-level bit field construct, so the layout stays auditable against
//! the offset table:
//!
//! ```text
//! offset size field
//!      0    2 destination            0x0000 = broadcast
//!      2    1 command                0x00 = ID + neighbours
//!      3    2 sender_id
//!      5    1 sender_slot
//!      6    1 is_localized:1 | hop:7
//!      7    1 cycle:5 | neighbour_count:3
//!      8    1 data_mode              0 none, 1 own, 2 forward
//!      9    2 hop_decision_target    0 = no target
//!     11    1 stratum:2 | reserved:5 | time_synced:1
//!     12   16 neighbour block, see below
//!     28    2 origin_id              data section, zero when data_mode = 0
//!     30    2 message_id
//!     32    1 hop_count
//!     33    1 payload_len            <= 6
//!     34    6 path[3]
//!     40    8 origin_tx_timestamp    microseconds since epoch, 0 if unsynced
//! ```
//!
//! The neighbour block holds up to 4 x `{ id:2, slot:1, localized:1|hop:7 }`
//! advertisements. A frame carrying data keeps only the first two slots for
//! advertisements and carries its payload bytes at offset 20; header-only
//! frames use all four. Every other field sits at the same offset in both
//! shapes.

use super::types::{
    MAX_ADVERTISED_NEIGHBORS, MAX_PATH_LEN, MAX_PAYLOAD_LEN, NodeId, Stratum,
};

/// Exact on-air frame size in bytes.
pub const FRAME_LEN: usize = 48;

/// The only command the core speaks: node identity plus neighbour list.
pub const CMD_ID_AND_NEIGHBORS: u8 = 0x00;

/// Advertisement slots left to a frame whose neighbour block also carries a
/// payload.
pub const DATA_FRAME_AD_LIMIT: usize = 2;

/// Payload offset inside the neighbour block of a data-bearing frame.
const PAYLOAD_OFFSET: usize = 20;

/// One advertised neighbour inside a frame's 16-byte neighbour block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborAd {
    pub id: NodeId,
    pub slot: u8,
    pub is_localized: bool,
    pub hop: u8,
}

/// The data section of a frame carrying a payload (own or forwarded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSection {
    /// Node that produced the payload.
    pub origin_id: NodeId,
    /// `(origin_id << 8) | sequence` minted by the origin.
    pub message_id: u16,
    /// Path entries filled in so far.
    pub hop_count: u8,
    /// Sensor payload, at most [`MAX_PAYLOAD_LEN`] bytes.
    pub payload: Vec<u8>,
    /// Relay path accumulated towards the gateway.
    pub path: [NodeId; MAX_PATH_LEN],
    /// Origin's wall clock at transmit time, 0 when the origin was unsynced.
    pub origin_tx_timestamp: u64,
}

impl DataSection {
    /// The low 8 bits of the message id: the per-origin sequence counter.
    pub fn sequence(&self) -> u8 {
        (self.message_id & 0x00FF) as u8
    }
}

/// Frame content, tagged by the wire `data_mode` byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameData {
    /// Header-only frame: identity and neighbour list, no payload.
    None,
    /// Payload originated by the sender itself.
    Own(DataSection),
    /// Payload relayed on behalf of another origin.
    Forward(DataSection),
}

impl FrameData {
    fn mode_byte(&self) -> u8 {
        match self {
            FrameData::None => 0,
            FrameData::Own(_) => 1,
            FrameData::Forward(_) => 2,
        }
    }

    /// The data section, if this frame carries one.
    pub fn section(&self) -> Option<&DataSection> {
        match self {
            FrameData::None => None,
            FrameData::Own(s) | FrameData::Forward(s) => Some(s),
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub destination: NodeId,
    pub sender_id: NodeId,
    pub sender_slot: u8,
    pub is_localized: bool,
    pub hop: u8,
    pub cycle: u8,
    pub hop_decision_target: NodeId,
    pub stratum: Stratum,
    pub time_synced: bool,
    /// Sender's advertised one-hop neighbours, at most 4.
    pub neighbors: Vec<NeighborAd>,
    pub data: FrameData,
}

/// Reasons a byte buffer is not a usable frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecodeError {
    /// Buffer is not exactly [`FRAME_LEN`] bytes.
    Length { have: usize },
    /// Command byte the core does not speak.
    UnknownCommand(u8),
    /// `data_mode` outside 0..=2.
    BadDataMode(u8),
    /// Declared payload length exceeds [`MAX_PAYLOAD_LEN`].
    PayloadTooLong(u8),
}

impl std::fmt::Display for FrameDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameDecodeError::Length { have } => {
                write!(f, "frame length {} (expected {})", have, FRAME_LEN)
            }
            FrameDecodeError::UnknownCommand(c) => write!(f, "unknown command 0x{:02X}", c),
            FrameDecodeError::BadDataMode(m) => write!(f, "bad data mode {}", m),
            FrameDecodeError::PayloadTooLong(n) => write!(f, "payload length {}", n),
        }
    }
}

impl std::error::Error for FrameDecodeError {}

/// Pack `is_localized:1 | hop:7` (byte 6 and neighbour flag bytes).
pub fn pack_localized_hop(is_localized: bool, hop: u8) -> u8 {
    ((is_localized as u8) << 7) | (hop & 0x7F)
}

/// Unpack `is_localized:1 | hop:7`.
pub fn unpack_localized_hop(b: u8) -> (bool, u8) {
    (b & 0x80 != 0, b & 0x7F)
}

/// Pack `cycle:5 | neighbour_count:3` (byte 7).
pub fn pack_cycle_count(cycle: u8, count: u8) -> u8 {
    ((cycle & 0x1F) << 3) | (count & 0x07)
}

/// Unpack `cycle:5 | neighbour_count:3`.
pub fn unpack_cycle_count(b: u8) -> (u8, u8) {
    (b >> 3, b & 0x07)
}

/// Pack `stratum:2 | reserved:5 | time_synced:1` (byte 11).
pub fn pack_stratum_sync(stratum: Stratum, time_synced: bool) -> u8 {
    (stratum.to_bits() << 6) | (time_synced as u8)
}

/// Unpack `stratum:2 | reserved:5 | time_synced:1`.
pub fn unpack_stratum_sync(b: u8) -> (Stratum, bool) {
    (Stratum::from_bits(b >> 6), b & 0x01 != 0)
}

fn put_u16(buf: &mut [u8], offset: usize, v: u16) {
    buf[offset..offset + 2].copy_from_slice(&v.to_be_bytes());
}

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

impl Frame {
    /// Encode into the fixed wire layout. Unused regions are zero-filled, so
    /// two encodings of equal frames are byte-identical. Oversized neighbour
    /// lists and payloads are truncated to their wire capacity.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];

        put_u16(&mut buf, 0, self.destination);
        buf[2] = CMD_ID_AND_NEIGHBORS;
        put_u16(&mut buf, 3, self.sender_id);
        buf[5] = self.sender_slot;
        buf[6] = pack_localized_hop(self.is_localized, self.hop);

        let ad_limit = match self.data {
            FrameData::None => MAX_ADVERTISED_NEIGHBORS,
            _ => DATA_FRAME_AD_LIMIT,
        };
        let count = self.neighbors.len().min(ad_limit);
        buf[7] = pack_cycle_count(self.cycle, count as u8);
        buf[8] = self.data.mode_byte();
        put_u16(&mut buf, 9, self.hop_decision_target);
        buf[11] = pack_stratum_sync(self.stratum, self.time_synced);

        for (i, n) in self.neighbors.iter().take(count).enumerate() {
            let base = 12 + i * 4;
            put_u16(&mut buf, base, n.id);
            buf[base + 2] = n.slot;
            buf[base + 3] = pack_localized_hop(n.is_localized, n.hop);
        }

        if let Some(section) = self.data.section() {
            let payload_len = section.payload.len().min(MAX_PAYLOAD_LEN);
            buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload_len]
                .copy_from_slice(&section.payload[..payload_len]);
            put_u16(&mut buf, 28, section.origin_id);
            put_u16(&mut buf, 30, section.message_id);
            buf[32] = section.hop_count;
            buf[33] = payload_len as u8;
            for (i, id) in section.path.iter().enumerate() {
                put_u16(&mut buf, 34 + 2 * i, *id);
            }
            buf[40..48].copy_from_slice(&section.origin_tx_timestamp.to_be_bytes());
        }

        buf
    }

    /// Decode a received buffer.
    ///
    /// A declared neighbour count above 4 is clamped, not rejected; an
    /// unknown command, an out-of-range data mode, or an oversized payload
    /// length rejects the whole frame.
    pub fn decode(bytes: &[u8]) -> Result<Frame, FrameDecodeError> {
        if bytes.len() != FRAME_LEN {
            return Err(FrameDecodeError::Length { have: bytes.len() });
        }
        if bytes[2] != CMD_ID_AND_NEIGHBORS {
            return Err(FrameDecodeError::UnknownCommand(bytes[2]));
        }

        let (is_localized, hop) = unpack_localized_hop(bytes[6]);
        let (cycle, count) = unpack_cycle_count(bytes[7]);
        let ad_limit = if bytes[8] == 0 { MAX_ADVERTISED_NEIGHBORS } else { DATA_FRAME_AD_LIMIT };
        let count = count.min(ad_limit as u8);
        let (stratum, time_synced) = unpack_stratum_sync(bytes[11]);

        let mut neighbors = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let base = 12 + i * 4;
            let (n_localized, n_hop) = unpack_localized_hop(bytes[base + 3]);
            neighbors.push(NeighborAd {
                id: get_u16(bytes, base),
                slot: bytes[base + 2],
                is_localized: n_localized,
                hop: n_hop,
            });
        }

        let data = match bytes[8] {
            0 => FrameData::None,
            mode @ (1 | 2) => {
                let payload_len = bytes[33];
                if payload_len as usize > MAX_PAYLOAD_LEN {
                    return Err(FrameDecodeError::PayloadTooLong(payload_len));
                }
                let mut path = [0u16; MAX_PATH_LEN];
                for (i, id) in path.iter_mut().enumerate() {
                    *id = get_u16(bytes, 34 + 2 * i);
                }
                let section = DataSection {
                    origin_id: get_u16(bytes, 28),
                    message_id: get_u16(bytes, 30),
                    hop_count: bytes[32],
                    payload: bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload_len as usize].to_vec(),
                    path,
                    origin_tx_timestamp: u64::from_be_bytes(bytes[40..48].try_into().unwrap()),
                };
                if mode == 1 {
                    FrameData::Own(section)
                } else {
                    FrameData::Forward(section)
                }
            }
            mode => return Err(FrameDecodeError::BadDataMode(mode)),
        };

        Ok(Frame {
            destination: get_u16(bytes, 0),
            sender_id: get_u16(bytes, 3),
            sender_slot: bytes[5],
            is_localized,
            hop,
            cycle,
            hop_decision_target: get_u16(bytes, 9),
            stratum,
            time_synced,
            neighbors,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_frame() -> Frame {
        Frame {
            destination: BROADCAST,
            sender_id: 7,
            sender_slot: 3,
            is_localized: true,
            hop: 2,
            cycle: 4,
            hop_decision_target: 0,
            stratum: Stratum::Indirect,
            time_synced: false,
            neighbors: vec![
                NeighborAd { id: 1, slot: 0, is_localized: false, hop: 0 },
                NeighborAd { id: 4, slot: 2, is_localized: true, hop: 1 },
            ],
            data: FrameData::None,
        }
    }

    const BROADCAST: u16 = 0;

    fn forward_frame() -> Frame {
        Frame {
            destination: BROADCAST,
            sender_id: 4,
            sender_slot: 2,
            is_localized: false,
            hop: 2,
            cycle: 1,
            hop_decision_target: 2,
            stratum: Stratum::Indirect,
            time_synced: true,
            neighbors: vec![NeighborAd { id: 2, slot: 1, is_localized: false, hop: 1 }],
            data: FrameData::Forward(DataSection {
                origin_id: 5,
                message_id: (5 << 8) | 10,
                hop_count: 2,
                payload: b"T25H80".to_vec(),
                path: [5, 4, 0],
                origin_tx_timestamp: 1_700_000_123_456_789,
            }),
        }
    }

    #[test]
    fn packed_bytes_round_trip() {
        for hop in [0u8, 1, 63, 0x7F] {
            for loc in [false, true] {
                assert_eq!(unpack_localized_hop(pack_localized_hop(loc, hop)), (loc, hop));
            }
        }
        for cycle in 0..32u8 {
            for count in 0..8u8 {
                assert_eq!(unpack_cycle_count(pack_cycle_count(cycle, count)), (cycle, count));
            }
        }
        for s in [Stratum::Gateway, Stratum::Direct, Stratum::Indirect, Stratum::Local] {
            for synced in [false, true] {
                assert_eq!(unpack_stratum_sync(pack_stratum_sync(s, synced)), (s, synced));
            }
        }
    }

    #[test]
    fn header_frame_round_trip() {
        let frame = header_frame();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), FRAME_LEN);
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        // Byte-exact re-encode: the wire image is canonical.
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn forward_frame_round_trip() {
        let frame = forward_frame();
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn wire_offsets_match_layout() {
        let bytes = forward_frame().encode();
        assert_eq!(&bytes[0..2], &[0, 0]);
        assert_eq!(bytes[2], CMD_ID_AND_NEIGHBORS);
        assert_eq!(&bytes[3..5], &[0, 4]);
        assert_eq!(bytes[5], 2);
        assert_eq!(bytes[8], 2); // forward mode
        assert_eq!(&bytes[9..11], &[0, 2]);
        assert_eq!(&bytes[20..26], b"T25H80");
        assert_eq!(&bytes[28..30], &[0, 5]);
        assert_eq!(get_u16(&bytes, 30), (5 << 8) | 10);
        assert_eq!(bytes[32], 2);
        assert_eq!(bytes[33], 6);
        assert_eq!(&bytes[34..40], &[0, 5, 0, 4, 0, 0]);
    }

    #[test]
    fn data_frames_keep_two_ad_slots() {
        let mut frame = forward_frame();
        frame.neighbors = (0..4)
            .map(|i| NeighborAd { id: 20 + i, slot: i as u8, is_localized: false, hop: 1 })
            .collect();
        let decoded = Frame::decode(&frame.encode()).unwrap();
        // The payload needs the tail of the neighbour block.
        assert_eq!(decoded.neighbors.len(), DATA_FRAME_AD_LIMIT);
        assert_eq!(decoded.neighbors[1].id, 21);
        assert_eq!(decoded.data.section().unwrap().payload, b"T25H80");
    }

    #[test]
    fn timestamp_survives_exactly() {
        for ts in [0u64, 1, u32::MAX as u64, 1_722_470_400_000_000, u64::MAX] {
            let mut frame = forward_frame();
            if let FrameData::Forward(section) = &mut frame.data {
                section.origin_tx_timestamp = ts;
            }
            let decoded = Frame::decode(&frame.encode()).unwrap();
            assert_eq!(decoded.data.section().unwrap().origin_tx_timestamp, ts);
        }
    }

    #[test]
    fn header_frame_zero_fills_data_region() {
        let bytes = header_frame().encode();
        assert!(bytes[28..48].iter().all(|&b| b == 0));
    }

    #[test]
    fn unknown_command_rejected() {
        let mut bytes = header_frame().encode();
        bytes[2] = 0x77;
        assert_eq!(Frame::decode(&bytes), Err(FrameDecodeError::UnknownCommand(0x77)));
    }

    #[test]
    fn wrong_length_rejected() {
        let bytes = header_frame().encode();
        assert_eq!(Frame::decode(&bytes[..47]), Err(FrameDecodeError::Length { have: 47 }));
    }

    #[test]
    fn oversized_payload_len_rejected() {
        let mut bytes = forward_frame().encode();
        bytes[33] = 7;
        assert_eq!(Frame::decode(&bytes), Err(FrameDecodeError::PayloadTooLong(7)));
    }

    #[test]
    fn bad_data_mode_rejected() {
        let mut bytes = header_frame().encode();
        bytes[8] = 3;
        assert_eq!(Frame::decode(&bytes), Err(FrameDecodeError::BadDataMode(3)));
    }

    #[test]
    fn neighbour_count_clamped_to_four() {
        let mut bytes = header_frame().encode();
        // Claim 7 neighbours; decoder must clamp to the 4 the block can hold.
        bytes[7] = pack_cycle_count(4, 7);
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.neighbors.len(), 4);
    }

    #[test]
    fn encoder_truncates_oversized_neighbour_list() {
        let mut frame = header_frame();
        frame.neighbors = (0..6)
            .map(|i| NeighborAd { id: 10 + i, slot: i as u8, is_localized: false, hop: 1 })
            .collect();
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.neighbors.len(), 4);
        assert_eq!(decoded.neighbors[3].id, 13);
    }
}
