//! 측정 설정

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::message::UdpPayloadMessage;
use crate::{DISCOVERY_PORT, PACKET_SIZE};

/// 서버/클라이언트 공통 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// Offer 브로드캐스트 포트
    pub discovery_port: u16,

    /// 브로드캐스트 대상 주소
    pub broadcast_addr: IpAddr,

    /// Offer 전송 주기 (밀리초)
    pub broadcast_interval_ms: u64,

    /// UDP 응답 소켓 포트 (0이면 자동 할당)
    pub udp_bind_port: u16,

    /// TCP 리스너 포트 (0이면 자동 할당)
    pub tcp_bind_port: u16,

    /// UDP 수신 무응답 타임아웃 (밀리초)
    /// 이 시간 동안 패킷이 없으면 수신 종료
    pub udp_recv_timeout_ms: u64,

    /// TCP 요청 줄 수신 타임아웃 (밀리초)
    pub tcp_request_timeout_ms: u64,

    /// TCP 연결 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// TCP 응답 쓰기 단위 (바이트)
    pub tcp_chunk_size: usize,

    /// 요청당 최대 UDP 패킷 수 (None이면 제한 없음)
    pub max_udp_packets: Option<u64>,

    /// 예상 패킷 수를 내림 나눗셈으로 계산 (이전 클라이언트와 동일한 동작)
    pub legacy_expected_packets: bool,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 송신 버퍼 크기
    pub send_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: DISCOVERY_PORT,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            broadcast_interval_ms: 1000,      // 1초
            udp_bind_port: 0,
            tcp_bind_port: 0,
            udp_recv_timeout_ms: 2000,        // 2초
            tcp_request_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            tcp_chunk_size: 64 * 1024,        // 64KB
            max_udp_packets: None,
            legacy_expected_packets: false,
            recv_buffer_size: 2 * 1024 * 1024, // 2MB
            send_buffer_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

impl Config {
    /// 일반 LAN 환경용 설정
    pub fn lan() -> Self {
        Self::default()
    }

    /// 루프백 테스트용 설정 (짧은 타임아웃)
    pub fn local_test() -> Self {
        Self {
            broadcast_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            broadcast_interval_ms: 100,
            udp_recv_timeout_ms: 500,
            tcp_request_timeout_ms: 1000,
            connect_timeout_ms: 1000,
            tcp_chunk_size: 16 * 1024,
            ..Self::default()
        }
    }

    /// Offer 전송 대상
    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_addr, self.discovery_port)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn udp_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.udp_recv_timeout_ms)
    }

    pub fn tcp_request_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 클라이언트가 기다릴 UDP 패킷 수
    ///
    /// 기본은 서버와 같은 올림 나눗셈. `legacy_expected_packets`면 내림 나눗셈.
    pub fn expected_packets(&self, file_size: u64) -> u64 {
        if self.legacy_expected_packets {
            file_size / PACKET_SIZE as u64
        } else {
            UdpPayloadMessage::total_packets_for(file_size)
        }
    }
}
