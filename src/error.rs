//! 에러 타입 정의

use std::time::Duration;

use thiserror::Error;

/// netspeed 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("잘못된 패킷 길이: expected {expected}, got {got}")]
    MalformedPacket { expected: usize, got: usize },

    #[error("유효하지 않은 매직 쿠키: expected {expected:08X}, got {got:08X}")]
    InvalidMagicNumber { expected: u32, got: u32 },

    #[error("메시지 타입 불일치: expected {expected:#04x}, got {got:#04x}")]
    MessageTypeMismatch { expected: u8, got: u8 },

    #[error("알 수 없는 메시지 타입: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("잘못된 TCP 요청: {0}")]
    InvalidRequest(String),

    #[error("연결 타임아웃: {0:?}")]
    ConnectTimeout(Duration),

    #[error("잘못된 입력: {0}")]
    InvalidUserInput(String),

    #[error("연결 종료")]
    ConnectionClosed,
}

impl Error {
    /// 패킷 디코딩 실패 여부 (조용히 버려도 되는 에러)
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedPacket { .. }
                | Error::InvalidMagicNumber { .. }
                | Error::MessageTypeMismatch { .. }
                | Error::UnknownMessageType(_)
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_classification() {
        assert!(Error::MalformedPacket { expected: 9, got: 3 }.is_decode_error());
        assert!(Error::UnknownMessageType(0x7).is_decode_error());
        assert!(!Error::ConnectionClosed.is_decode_error());
        assert!(!Error::InvalidUserInput("abc".into()).is_decode_error());
    }
}
