//! 프로토콜 메시지 정의
//!
//! 모든 메시지는 고정 길이, 빅엔디언
//!
//! ```text
//! Offer       (9)    : magic u32 | type u8 = 0x02 | udp_port u16 | tcp_port u16
//! UdpRequest  (13)   : magic u32 | type u8 = 0x03 | file_size u64
//! UdpPayload  (1024) : magic u32 | type u8 = 0x04 | total u64 | seq u64 | filler
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, MAGIC_COOKIE, PACKET_SIZE};

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// 서버 알림 (브로드캐스트)
    Offer = 0x2,

    /// UDP 전송 요청 (클라이언트 → 서버)
    UdpRequest = 0x3,

    /// UDP 데이터 패킷 (서버 → 클라이언트)
    UdpPayload = 0x4,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x2 => Ok(MessageType::Offer),
            0x3 => Ok(MessageType::UdpRequest),
            0x4 => Ok(MessageType::UdpPayload),
            other => Err(Error::UnknownMessageType(other)),
        }
    }
}

/// 헤더 크기: magic(4) + type(1)
pub const HEADER_SIZE: usize = 5;

/// 패딩 바이트
pub const FILLER_BYTE: u8 = b'A';

/// 메시지 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// 매직 쿠키
    pub magic: u32,

    /// 메시지 타입 (검증 전 원시 값)
    pub msg_type: u8,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            magic: MAGIC_COOKIE,
            msg_type: msg_type as u8,
        }
    }

    /// 헤더만 읽기 (검증 없음, 로그용)
    pub fn peek(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        let mut buf = &bytes[..HEADER_SIZE];
        Some(Self {
            magic: buf.get_u32(),
            msg_type: buf.get_u8(),
        })
    }

    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.magic);
        buf.put_u8(self.msg_type);
    }

    /// 길이, 매직, 타입 검증 후 본문 반환
    fn validate(bytes: &[u8], expected_type: MessageType, expected_len: usize) -> Result<&[u8]> {
        if bytes.len() != expected_len {
            return Err(Error::MalformedPacket {
                expected: expected_len,
                got: bytes.len(),
            });
        }

        let mut buf = bytes;
        let magic = buf.get_u32();
        if magic != MAGIC_COOKIE {
            return Err(Error::InvalidMagicNumber {
                expected: MAGIC_COOKIE,
                got: magic,
            });
        }

        let msg_type = MessageType::try_from(buf.get_u8())?;
        if msg_type != expected_type {
            return Err(Error::MessageTypeMismatch {
                expected: expected_type as u8,
                got: msg_type as u8,
            });
        }

        Ok(buf)
    }
}

/// 서버 알림 메시지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferMessage {
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl OfferMessage {
    pub const SIZE: usize = HEADER_SIZE + 2 + 2;

    pub fn new(udp_port: u16, tcp_port: u16) -> Self {
        Self { udp_port, tcp_port }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        MessageHeader::new(MessageType::Offer).write(&mut buf);
        buf.put_u16(self.udp_port);
        buf.put_u16(self.tcp_port);
        buf.freeze()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut body = MessageHeader::validate(bytes, MessageType::Offer, Self::SIZE)?;
        Ok(Self {
            udp_port: body.get_u16(),
            tcp_port: body.get_u16(),
        })
    }
}

/// UDP 전송 요청
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpRequestMessage {
    /// 요청 바이트 수
    pub file_size: u64,
}

impl UdpRequestMessage {
    pub const SIZE: usize = HEADER_SIZE + 8;

    pub fn new(file_size: u64) -> Self {
        Self { file_size }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        MessageHeader::new(MessageType::UdpRequest).write(&mut buf);
        buf.put_u64(self.file_size);
        buf.freeze()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut body = MessageHeader::validate(bytes, MessageType::UdpRequest, Self::SIZE)?;
        Ok(Self {
            file_size: body.get_u64(),
        })
    }
}

/// UDP 데이터 패킷
///
/// 인코딩 결과는 항상 `PACKET_SIZE` 바이트.
/// 데이터는 남는 공간만큼 패딩하거나 잘라냄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPayloadMessage {
    /// 요청에 대한 총 패킷 수
    pub total_packets: u64,

    /// 시퀀스 번호 (0부터)
    pub sequence_number: u64,

    /// 데이터 (항상 `DATA_SIZE` 바이트)
    pub payload: Bytes,
}

impl UdpPayloadMessage {
    /// payload 앞 헤더 크기
    pub const PREFIX_SIZE: usize = HEADER_SIZE + 8 + 8;

    /// 패킷당 데이터 크기
    pub const DATA_SIZE: usize = PACKET_SIZE - Self::PREFIX_SIZE;

    /// 패딩 데이터로 채운 패킷
    pub fn filler(total_packets: u64, sequence_number: u64) -> Self {
        Self {
            total_packets,
            sequence_number,
            payload: Bytes::from(vec![FILLER_BYTE; Self::DATA_SIZE]),
        }
    }

    /// 요청 크기에 필요한 패킷 수 (올림)
    pub fn total_packets_for(file_size: u64) -> u64 {
        file_size.div_ceil(PACKET_SIZE as u64)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_SIZE);
        MessageHeader::new(MessageType::UdpPayload).write(&mut buf);
        buf.put_u64(self.total_packets);
        buf.put_u64(self.sequence_number);
        let n = self.payload.len().min(Self::DATA_SIZE);
        buf.put_slice(&self.payload[..n]);
        buf.put_bytes(0, Self::DATA_SIZE - n);
        buf.freeze()
    }

    /// 헤더만 검증/파싱 (데이터 복사 없음)
    ///
    /// 반환: (total_packets, sequence_number)
    pub fn decode_header(bytes: &[u8]) -> Result<(u64, u64)> {
        let mut body = MessageHeader::validate(bytes, MessageType::UdpPayload, PACKET_SIZE)?;
        let total_packets = body.get_u64();
        let sequence_number = body.get_u64();
        Ok((total_packets, sequence_number))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (total_packets, sequence_number) = Self::decode_header(bytes)?;
        Ok(Self {
            total_packets,
            sequence_number,
            payload: Bytes::copy_from_slice(&bytes[Self::PREFIX_SIZE..]),
        })
    }
}

/// 송신용 패킷 프레임
///
/// 패딩은 한 번만 채우고 패킷마다 시퀀스 번호만 덮어씀
pub struct PayloadFrame {
    buf: [u8; PACKET_SIZE],
}

impl PayloadFrame {
    pub fn new(total_packets: u64) -> Self {
        let mut buf = [FILLER_BYTE; PACKET_SIZE];
        {
            let mut head = &mut buf[..UdpPayloadMessage::PREFIX_SIZE];
            MessageHeader::new(MessageType::UdpPayload).write(&mut head);
            head.put_u64(total_packets);
            head.put_u64(0);
        }
        Self { buf }
    }

    /// 시퀀스 번호 기록 후 전체 패킷 반환
    pub fn packet(&mut self, sequence_number: u64) -> &[u8] {
        let start = HEADER_SIZE + 8;
        self.buf[start..start + 8].copy_from_slice(&sequence_number.to_be_bytes());
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_layout() {
        let bytes = OfferMessage::new(0x1234, 0xABCD).to_bytes();
        assert_eq!(
            bytes.as_ref(),
            &[0xAB, 0xCD, 0xDC, 0xBA, 0x02, 0x12, 0x34, 0xAB, 0xCD]
        );
    }

    #[test]
    fn test_offer_roundtrip_edge_ports() {
        for (udp, tcp) in [(0, 0), (1, u16::MAX), (u16::MAX, 1), (40000, 12345)] {
            let decoded = OfferMessage::from_bytes(&OfferMessage::new(udp, tcp).to_bytes()).unwrap();
            assert_eq!((decoded.udp_port, decoded.tcp_port), (udp, tcp));
        }
    }

    #[test]
    fn test_request_layout() {
        let bytes = UdpRequestMessage::new(10240).to_bytes();
        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[..5], &[0xAB, 0xCD, 0xDC, 0xBA, 0x03]);
        assert_eq!(&bytes[5..], &10240u64.to_be_bytes());
        assert_eq!(UdpRequestMessage::from_bytes(&bytes).unwrap().file_size, 10240);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = OfferMessage::new(1, 2).to_bytes().to_vec();
        bytes[0] = 0x00;
        assert!(matches!(
            OfferMessage::from_bytes(&bytes),
            Err(Error::InvalidMagicNumber { got: 0x00CDDCBA, .. })
        ));
    }

    #[test]
    fn test_wrong_type_rejected() {
        // Offer 길이에 맞춘 요청 타입
        let mut bytes = OfferMessage::new(1, 2).to_bytes().to_vec();
        bytes[4] = MessageType::UdpRequest as u8;
        assert!(matches!(
            OfferMessage::from_bytes(&bytes),
            Err(Error::MessageTypeMismatch { expected: 0x2, got: 0x3 })
        ));

        bytes[4] = 0x9;
        assert!(matches!(
            OfferMessage::from_bytes(&bytes),
            Err(Error::UnknownMessageType(0x9))
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let bytes = UdpRequestMessage::new(5).to_bytes();
        for len in [0, 1, 4, 5, 12] {
            assert!(matches!(
                UdpRequestMessage::from_bytes(&bytes[..len]),
                Err(Error::MalformedPacket { expected: 13, .. })
            ));
        }

        let mut long = bytes.to_vec();
        long.push(0);
        assert!(UdpRequestMessage::from_bytes(&long).is_err());

        // 요청을 Offer로 해석하면 길이 불일치
        assert!(OfferMessage::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_payload_is_fixed_size() {
        // 짧은 데이터는 0으로 패딩
        let short = UdpPayloadMessage {
            total_packets: 3,
            sequence_number: 1,
            payload: Bytes::from_static(b"hello"),
        };
        let bytes = short.to_bytes();
        assert_eq!(bytes.len(), PACKET_SIZE);
        assert_eq!(&bytes[21..26], b"hello");
        assert!(bytes[26..].iter().all(|&b| b == 0));

        let long = UdpPayloadMessage {
            total_packets: 3,
            sequence_number: 2,
            payload: Bytes::from(vec![7u8; 4096]),
        };
        assert_eq!(long.to_bytes().len(), PACKET_SIZE);

        let decoded = UdpPayloadMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.total_packets, 3);
        assert_eq!(decoded.sequence_number, 1);
        assert_eq!(decoded.payload.len(), UdpPayloadMessage::DATA_SIZE);
    }

    #[test]
    fn test_payload_frame_matches_message() {
        let mut frame = PayloadFrame::new(42);
        let expected = UdpPayloadMessage::filler(42, 7).to_bytes();
        assert_eq!(frame.packet(7), expected.as_ref());
        assert_eq!(UdpPayloadMessage::decode_header(frame.packet(41)).unwrap(), (42, 41));
    }

    #[test]
    fn test_total_packets_ceil() {
        assert_eq!(UdpPayloadMessage::total_packets_for(0), 0);
        assert_eq!(UdpPayloadMessage::total_packets_for(1), 1);
        assert_eq!(UdpPayloadMessage::total_packets_for(1024), 1);
        assert_eq!(UdpPayloadMessage::total_packets_for(1025), 2);
        assert_eq!(UdpPayloadMessage::total_packets_for(10240), 10);
    }

    #[test]
    fn test_header_peek() {
        let bytes = UdpRequestMessage::new(1).to_bytes();
        let header = MessageHeader::peek(&bytes).unwrap();
        assert_eq!(header.magic, MAGIC_COOKIE);
        assert_eq!(MessageType::try_from(header.msg_type).unwrap(), MessageType::UdpRequest);
        assert!(MessageHeader::peek(&bytes[..4]).is_none());
        assert!(matches!(MessageType::try_from(9), Err(Error::UnknownMessageType(9))));
    }
}
