//! # netspeed
//!
//! 브로드캐스트 탐색 기반 LAN 속도 측정 도구
//!
//! ## 핵심 특징
//! - **자동 탐색**: 서버가 1초마다 Offer를 브로드캐스트, 클라이언트는 수신 즉시 측정 시작
//! - **동시 연결**: TCP N개 + UDP M개 연결을 동시에 열어 처리율 측정
//! - **손실 측정**: UDP는 재전송 없이 전송하고 수신 측에서 손실률 계산
//! - **협력적 종료**: 모든 루프가 하나의 `CancellationToken`을 관찰

pub mod config;
pub mod discovery;
pub mod error;
pub mod message;
pub mod net;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod session;
pub mod stats;

pub use config::Config;
pub use discovery::{Broadcaster, DiscoveryListener, ServerOffer};
pub use error::{Error, Result};
pub use message::{MessageType, OfferMessage, UdpPayloadMessage, UdpRequestMessage};
pub use server::Server;
pub use session::{FixedParams, ParamsProvider, SessionParams, TransferSession};
pub use stats::{ServerStats, SessionReport, TcpReport, UdpReport, WorkerOutcome};

/// 매직 쿠키 (패킷 식별용)
pub const MAGIC_COOKIE: u32 = 0xABCD_DCBA;

/// 탐색 포트 (Offer 브로드캐스트 수신)
pub const DISCOVERY_PORT: u16 = 12345;

/// UDP 페이로드 패킷 크기 (헤더 포함, 바이트)
pub const PACKET_SIZE: usize = 1024;
