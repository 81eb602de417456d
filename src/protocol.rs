//! EDEN/PUS wire protocol (ECSS-E-ST-70-41C subset).
//!
//! Layers, outermost first: EDEN sync-marked length-prefixed frame, CCSDS
//! space packet primary header, PUS secondary header, application data,
//! CRC-16-CCITT over everything that precedes it.

use std::time::Instant;

use thiserror::Error;

pub const CCSDS_HEADER_LEN: usize = 6;
pub const PUS_TM_HEADER_LEN: usize = 9;
pub const PUS_TC_HEADER_LEN: usize = 5;
pub const CRC_LEN: usize = 2;

/// PUS-C secondary header version.
pub const PUS_VERSION: u8 = 2;

/// Sequence counters are 14 bits wide.
pub const SEQUENCE_MODULUS: u16 = 0x4000;

// Ack flag bits carried in the TC secondary header.
pub const ACK_ACCEPTANCE: u8 = 0x1;
pub const ACK_START: u8 = 0x2;
pub const ACK_PROGRESS: u8 = 0x4;
pub const ACK_COMPLETION: u8 = 0x8;
pub const ACK_ALL: u8 = 0xF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Tm,
    Tc,
}

/// PUS services handled by the SCOE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    RequestVerification,
    Housekeeping,
    FunctionManagement,
    ConnectionTest,
    ParameterManagement,
}

impl ServiceType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::RequestVerification),
            3 => Some(Self::Housekeeping),
            8 => Some(Self::FunctionManagement),
            17 => Some(Self::ConnectionTest),
            20 => Some(Self::ParameterManagement),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::RequestVerification => 1,
            Self::Housekeeping => 3,
            Self::FunctionManagement => 8,
            Self::ConnectionTest => 17,
            Self::ParameterManagement => 20,
        }
    }
}

/// Service subtype numbers, grouped by service.
pub mod subtype {
    // Service 1 - Request Verification (TM only)
    pub const TM_ACCEPTANCE_SUCCESS: u8 = 1;
    pub const TM_ACCEPTANCE_FAILURE: u8 = 2;
    pub const TM_EXECUTION_SUCCESS: u8 = 7;
    pub const TM_EXECUTION_FAILURE: u8 = 8;

    // Service 3 - Housekeeping
    pub const TC_CREATE_HK_REPORT: u8 = 1;
    pub const TC_DELETE_HK_REPORT: u8 = 3;
    pub const TC_ENABLE_HK_REPORT: u8 = 5;
    pub const TC_DISABLE_HK_REPORT: u8 = 6;
    pub const TM_HK_REPORT: u8 = 25;
    pub const TC_ONE_SHOT_HK: u8 = 27;
    pub const TC_MODIFY_HK_INTERVAL: u8 = 31;

    // Service 8 - Function Management
    pub const TC_PERFORM_FUNCTION: u8 = 1;

    // Service 17 - Connection Test
    pub const TC_CONNECTION_TEST: u8 = 1;
    pub const TM_CONNECTION_REPORT: u8 = 2;

    // Service 20 - Parameter Management
    pub const TC_SET_PARAMETER: u8 = 3;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet truncated: need {needed} bytes, have {got}")]
    Truncated { needed: usize, got: usize },
    #[error("declared packet length {declared} does not match buffer length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("CRC mismatch: computed {computed:#06x}, found {found:#06x}")]
    CrcMismatch { computed: u16, found: u16 },
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

/// CCSDS space packet primary header (6 bytes, big-endian bitfields).
///
/// `data_length` is the number of bytes following the primary header,
/// including the CRC, minus one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcsdsHeader {
    pub version: u8,
    pub packet_type: PacketType,
    pub has_secondary_header: bool,
    pub apid: u16,
    pub sequence_flags: u8,
    pub sequence_count: u16,
    pub data_length: u16,
}

impl CcsdsHeader {
    pub fn new(packet_type: PacketType, apid: u16, sequence_count: u16) -> Self {
        Self {
            version: 0,
            packet_type,
            has_secondary_header: true,
            apid: apid & 0x7FF,
            sequence_flags: 3, // standalone packet
            sequence_count: sequence_count % SEQUENCE_MODULUS,
            data_length: 0,
        }
    }

    pub fn pack(&self) -> [u8; CCSDS_HEADER_LEN] {
        let type_bit = match self.packet_type {
            PacketType::Tm => 0u16,
            PacketType::Tc => 1u16,
        };
        let word1 = (u16::from(self.version & 0x7) << 13)
            | (type_bit << 12)
            | (u16::from(self.has_secondary_header) << 11)
            | (self.apid & 0x7FF);
        let word2 = (u16::from(self.sequence_flags & 0x3) << 14)
            | (self.sequence_count & (SEQUENCE_MODULUS - 1));

        let mut out = [0u8; CCSDS_HEADER_LEN];
        out[0..2].copy_from_slice(&word1.to_be_bytes());
        out[2..4].copy_from_slice(&word2.to_be_bytes());
        out[4..6].copy_from_slice(&self.data_length.to_be_bytes());
        out
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < CCSDS_HEADER_LEN {
            return Err(CodecError::Truncated {
                needed: CCSDS_HEADER_LEN,
                got: buf.len(),
            });
        }
        let word1 = u16::from_be_bytes([buf[0], buf[1]]);
        let word2 = u16::from_be_bytes([buf[2], buf[3]]);
        let data_length = u16::from_be_bytes([buf[4], buf[5]]);

        Ok(Self {
            version: ((word1 >> 13) & 0x7) as u8,
            packet_type: if (word1 >> 12) & 0x1 == 0 {
                PacketType::Tm
            } else {
                PacketType::Tc
            },
            has_secondary_header: (word1 >> 11) & 0x1 == 1,
            apid: word1 & 0x7FF,
            sequence_flags: ((word2 >> 14) & 0x3) as u8,
            sequence_count: word2 & (SEQUENCE_MODULUS - 1),
            data_length,
        })
    }
}

/// PUS secondary header. TM packets carry a 32-bit mission-time stamp after
/// the source id; TC packets do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PusSecondaryHeader {
    pub pus_version: u8,
    pub ack_flags: u8,
    pub service: u8,
    pub service_subtype: u8,
    pub source_id: u16,
    pub time_stamp: u32,
}

impl PusSecondaryHeader {
    pub fn pack(&self, packet_type: PacketType) -> Vec<u8> {
        let byte0 = ((self.pus_version & 0xF) << 4) | (self.ack_flags & 0xF);
        let mut out = Vec::with_capacity(PUS_TM_HEADER_LEN);
        out.push(byte0);
        out.push(self.service);
        out.push(self.service_subtype);
        out.extend_from_slice(&self.source_id.to_be_bytes());
        if packet_type == PacketType::Tm {
            out.extend_from_slice(&self.time_stamp.to_be_bytes());
        }
        out
    }

    pub fn unpack(buf: &[u8], packet_type: PacketType) -> Result<Self, CodecError> {
        let needed = pus_header_len(packet_type);
        if buf.len() < needed {
            return Err(CodecError::Truncated {
                needed,
                got: buf.len(),
            });
        }
        let time_stamp = if packet_type == PacketType::Tm {
            u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]])
        } else {
            0
        };
        Ok(Self {
            pus_version: (buf[0] >> 4) & 0xF,
            ack_flags: buf[0] & 0xF,
            service: buf[1],
            service_subtype: buf[2],
            source_id: u16::from_be_bytes([buf[3], buf[4]]),
            time_stamp,
        })
    }
}

pub fn pus_header_len(packet_type: PacketType) -> usize {
    match packet_type {
        PacketType::Tm => PUS_TM_HEADER_LEN,
        PacketType::Tc => PUS_TC_HEADER_LEN,
    }
}

/// CRC-16-CCITT: initial value 0xFFFF, polynomial 0x1021, no reflection,
/// no final XOR.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// A complete PUS packet: primary header, secondary header, data, CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PusPacket {
    pub ccsds: CcsdsHeader,
    pub pus: PusSecondaryHeader,
    pub data: Vec<u8>,
}

impl PusPacket {
    pub fn packet_type(&self) -> PacketType {
        self.ccsds.packet_type
    }

    pub fn service(&self) -> u8 {
        self.pus.service
    }

    pub fn service_subtype(&self) -> u8 {
        self.pus.service_subtype
    }

    /// Serialize to bytes, computing `data_length` and appending the CRC.
    pub fn encode(&self) -> Vec<u8> {
        let pus_len = pus_header_len(self.ccsds.packet_type);
        let mut header = self.ccsds.clone();
        header.data_length = (pus_len + self.data.len() + CRC_LEN - 1) as u16;

        let mut out = Vec::with_capacity(CCSDS_HEADER_LEN + pus_len + self.data.len() + CRC_LEN);
        out.extend_from_slice(&header.pack());
        out.extend_from_slice(&self.pus.pack(self.ccsds.packet_type));
        out.extend_from_slice(&self.data);
        let crc = crc16(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    /// Parse a complete packet buffer, validating the declared length against
    /// the buffer and verifying the CRC.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let ccsds = CcsdsHeader::unpack(buf)?;
        let total = CCSDS_HEADER_LEN + ccsds.data_length as usize + 1;
        if buf.len() != total {
            return Err(CodecError::LengthMismatch {
                declared: total,
                actual: buf.len(),
            });
        }

        let pus_len = pus_header_len(ccsds.packet_type);
        if (ccsds.data_length as usize) + 1 < pus_len + CRC_LEN {
            return Err(CodecError::Malformed(
                "data field shorter than secondary header",
            ));
        }

        let crc_offset = total - CRC_LEN;
        let computed = crc16(&buf[..crc_offset]);
        let found = u16::from_be_bytes([buf[crc_offset], buf[crc_offset + 1]]);
        if computed != found {
            return Err(CodecError::CrcMismatch { computed, found });
        }

        let pus = PusSecondaryHeader::unpack(&buf[CCSDS_HEADER_LEN..], ccsds.packet_type)?;
        let data = buf[CCSDS_HEADER_LEN + pus_len..crc_offset].to_vec();

        Ok(Self { ccsds, pus, data })
    }
}

/// EDEN outer framing: `EB 90 | length:u16 | PUS packet`.
pub mod eden {
    pub const SYNC: [u8; 2] = [0xEB, 0x90];
    pub const FRAME_HEADER_LEN: usize = 4;

    /// Wrap an encoded PUS packet in an EDEN frame.
    pub fn wrap(packet: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + packet.len());
        out.extend_from_slice(&SYNC);
        out.extend_from_slice(&(packet.len() as u16).to_be_bytes());
        out.extend_from_slice(packet);
        out
    }

    /// Rolling-buffer frame reassembler.
    ///
    /// Feeding any split of a byte stream yields the same packet boundaries
    /// as feeding it in one piece. Bytes preceding a sync marker are
    /// discarded; a trailing lone `0xEB` is held until the next byte decides
    /// whether it starts a marker.
    #[derive(Debug, Default)]
    pub struct EdenFramer {
        buf: Vec<u8>,
    }

    impl EdenFramer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&mut self, chunk: &[u8]) {
            self.buf.extend_from_slice(chunk);
        }

        /// Extract the next complete PUS packet payload, if any.
        pub fn next_packet(&mut self) -> Option<Vec<u8>> {
            let sync_at = self
                .buf
                .windows(SYNC.len())
                .position(|window| window == SYNC);

            let Some(idx) = sync_at else {
                // No marker: discard everything except a possible marker
                // prefix at the very end.
                if self.buf.last() == Some(&SYNC[0]) {
                    let keep = self.buf.len() - 1;
                    self.buf.drain(..keep);
                } else {
                    self.buf.clear();
                }
                return None;
            };

            if idx > 0 {
                self.buf.drain(..idx);
            }
            if self.buf.len() < FRAME_HEADER_LEN {
                return None;
            }
            let length = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
            let total = FRAME_HEADER_LEN + length;
            if self.buf.len() < total {
                return None;
            }
            let packet = self.buf[FRAME_HEADER_LEN..total].to_vec();
            self.buf.drain(..total);
            Some(packet)
        }

        pub fn buffered(&self) -> usize {
            self.buf.len()
        }
    }
}

/// Monotonic mission clock established at process start. Only the TM time
/// stamp and the housekeeping scheduler read it; wall-clock time is never
/// consulted.
#[derive(Debug, Clone, Copy)]
pub struct MissionClock {
    epoch: Instant,
}

impl MissionClock {
    pub fn started_now() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> u32 {
        self.epoch.elapsed().as_secs() as u32
    }

    pub fn elapsed_secs_f64(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Mints TM/TC packets with a per-source, gap-free, 14-bit wrapping sequence
/// counter. All packet creation on one endpoint funnels through a single
/// factory instance.
#[derive(Debug)]
pub struct PacketFactory {
    apid: u16,
    source_id: u16,
    sequence: u16,
    clock: MissionClock,
}

impl PacketFactory {
    pub fn new(apid: u16, source_id: u16, clock: MissionClock) -> Self {
        Self {
            apid,
            source_id,
            sequence: 0,
            clock,
        }
    }

    fn next_sequence(&mut self) -> u16 {
        let seq = self.sequence;
        self.sequence = (self.sequence + 1) % SEQUENCE_MODULUS;
        seq
    }

    pub fn tm(&mut self, service: u8, service_subtype: u8, data: &[u8]) -> PusPacket {
        let sequence = self.next_sequence();
        PusPacket {
            ccsds: CcsdsHeader::new(PacketType::Tm, self.apid, sequence),
            pus: PusSecondaryHeader {
                pus_version: PUS_VERSION,
                ack_flags: 0,
                service,
                service_subtype,
                source_id: self.source_id,
                time_stamp: self.clock.elapsed_secs(),
            },
            data: data.to_vec(),
        }
    }

    pub fn tc(
        &mut self,
        service: u8,
        service_subtype: u8,
        data: &[u8],
        ack_flags: u8,
    ) -> PusPacket {
        let sequence = self.next_sequence();
        PusPacket {
            ccsds: CcsdsHeader::new(PacketType::Tc, self.apid, sequence),
            pus: PusSecondaryHeader {
                pus_version: PUS_VERSION,
                ack_flags: ack_flags & 0xF,
                service,
                service_subtype,
                source_id: self.source_id,
                time_stamp: 0,
            },
            data: data.to_vec(),
        }
    }

    /// TM[1,1] - acceptance success for the given TC.
    pub fn acceptance_success(&mut self, tc: &PusPacket) -> PusPacket {
        let data = tc.ccsds.sequence_count.to_be_bytes();
        self.tm(1, subtype::TM_ACCEPTANCE_SUCCESS, &data)
    }

    /// TM[1,2] - acceptance failure with an error code.
    pub fn acceptance_failure(&mut self, tc: &PusPacket, error_code: u32) -> PusPacket {
        let mut data = [0u8; 6];
        data[0..2].copy_from_slice(&tc.ccsds.sequence_count.to_be_bytes());
        data[2..6].copy_from_slice(&error_code.to_be_bytes());
        self.tm(1, subtype::TM_ACCEPTANCE_FAILURE, &data)
    }

    /// TM[1,7] - execution success for the given TC.
    pub fn execution_success(&mut self, tc: &PusPacket) -> PusPacket {
        let data = tc.ccsds.sequence_count.to_be_bytes();
        self.tm(1, subtype::TM_EXECUTION_SUCCESS, &data)
    }

    /// TM[1,8] - execution failure with an error code.
    pub fn execution_failure(&mut self, tc: &PusPacket, error_code: u32) -> PusPacket {
        let mut data = [0u8; 6];
        data[0..2].copy_from_slice(&tc.ccsds.sequence_count.to_be_bytes());
        data[2..6].copy_from_slice(&error_code.to_be_bytes());
        self.tm(1, subtype::TM_EXECUTION_FAILURE, &data)
    }

    /// TM[3,25] - housekeeping report: structure id followed by the values in
    /// the structure's declared parameter order.
    pub fn hk_report(&mut self, structure_id: u16, values: &[f32]) -> PusPacket {
        let mut data = Vec::with_capacity(2 + values.len() * 4);
        data.extend_from_slice(&structure_id.to_be_bytes());
        for value in values {
            data.extend_from_slice(&value.to_be_bytes());
        }
        self.tm(3, subtype::TM_HK_REPORT, &data)
    }

    /// TM[17,2] - connection test report.
    pub fn connection_report(&mut self) -> PusPacket {
        self.tm(17, subtype::TM_CONNECTION_REPORT, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> PacketFactory {
        PacketFactory::new(100, 1, MissionClock::started_now())
    }

    #[test]
    fn ccsds_header_round_trip() {
        let header = CcsdsHeader::new(PacketType::Tc, 0x2AB, 0x1234 % SEQUENCE_MODULUS);
        let bytes = header.pack();
        let parsed = CcsdsHeader::unpack(&bytes).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn packet_encode_decode_round_trip() {
        let mut factory = factory();
        let tm = factory.tm(3, subtype::TM_HK_REPORT, &[1, 2, 3, 4]);
        let bytes = tm.encode();
        let decoded = PusPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.data, vec![1, 2, 3, 4]);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn crc_mismatch_is_rejected() {
        let mut factory = factory();
        let mut bytes = factory.connection_report().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            PusPacket::decode(&bytes),
            Err(CodecError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let mut factory = factory();
        let bytes = factory.connection_report().encode();
        assert!(PusPacket::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn framer_holds_lone_sync_prefix() {
        let mut framer = eden::EdenFramer::new();
        framer.push(&[0x00, 0x11, 0xEB]);
        assert!(framer.next_packet().is_none());
        assert_eq!(framer.buffered(), 1);

        // Next byte is not 0x90, so the held 0xEB is garbage.
        framer.push(&[0x42]);
        assert!(framer.next_packet().is_none());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn sequence_counter_wraps_at_14_bits() {
        let mut factory = factory();
        factory.sequence = SEQUENCE_MODULUS - 1;
        let last = factory.connection_report();
        let wrapped = factory.connection_report();
        assert_eq!(last.ccsds.sequence_count, SEQUENCE_MODULUS - 1);
        assert_eq!(wrapped.ccsds.sequence_count, 0);
    }
}
