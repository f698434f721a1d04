//! 서버 탐색
//!
//! - 서버: 주기적 Offer 브로드캐스트
//! - 클라이언트: Offer 수신 후 세션 실행

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::message::{MessageHeader, OfferMessage};
use crate::session::{ParamsProvider, TransferSession};
use crate::stats::{ServerStats, SessionReport};
use crate::{net, Config, Result};

/// Offer 브로드캐스터 (서버측)
pub struct Broadcaster {
    socket: UdpSocket,
    target: SocketAddr,
    offer: OfferMessage,
    config: Config,
    stats: Arc<ServerStats>,
}

impl Broadcaster {
    pub fn bind(config: &Config, offer: OfferMessage, stats: Arc<ServerStats>) -> Result<Self> {
        let socket = net::bind_broadcast_socket(config)?;
        Ok(Self {
            socket,
            target: config.broadcast_target(),
            offer,
            config: config.clone(),
            stats,
        })
    }

    pub fn offer(&self) -> OfferMessage {
        self.offer
    }

    /// 종료 신호까지 Offer 전송, 전송 횟수 반환
    ///
    /// 전송 실패는 로그만 남기고 다음 주기에 재시도
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        let packet = self.offer.to_bytes();
        let mut ticker = tokio::time::interval(self.config.broadcast_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Broadcasting offers to {} every {}ms (UDP {}, TCP {})",
            self.target, self.config.broadcast_interval_ms, self.offer.udp_port, self.offer.tcp_port
        );

        let mut sent = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.socket.send_to(&packet, self.target).await {
                        Ok(_) => {
                            sent += 1;
                            self.stats.record_offer();
                        }
                        Err(e) => warn!("Offer 전송 실패: {}", e),
                    }
                }
            }
        }

        debug!("Broadcaster stopped after {} offers", sent);
        sent
    }
}

/// 수신된 서버 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOffer {
    /// Offer 송신 주소
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl ServerOffer {
    pub fn new(ip: IpAddr, offer: OfferMessage) -> Self {
        Self {
            ip,
            udp_port: offer.udp_port,
            tcp_port: offer.tcp_port,
        }
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }
}

impl fmt::Display for ServerOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (TCP: {}, UDP: {})", self.ip, self.tcp_port, self.udp_port)
    }
}

/// Offer 수신기 (클라이언트측)
pub struct DiscoveryListener {
    socket: UdpSocket,
    config: Config,
}

impl DiscoveryListener {
    pub fn bind(config: Config) -> Result<Self> {
        let socket = net::bind_discovery_socket(&config)?;
        Ok(Self { socket, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 유효한 Offer 하나를 기다림 (종료 시 None)
    pub async fn next_offer(&self, shutdown: &CancellationToken) -> Option<ServerOffer> {
        let mut buf = [0u8; 1024];

        loop {
            let (len, addr) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Error receiving UDP packet: {}", e);
                        continue;
                    }
                },
            };

            match OfferMessage::from_bytes(&buf[..len]) {
                Ok(offer) => return Some(ServerOffer::new(addr.ip(), offer)),
                Err(e) if e.is_decode_error() => {
                    debug!(
                        "Offer 아님 ({}), header={:?}, from {}",
                        e,
                        MessageHeader::peek(&buf[..len]),
                        addr
                    );
                }
                Err(e) => warn!("Offer 처리 실패 ({}): {}", addr, e),
            }
        }
    }

    /// 세션 중 쌓인 Offer 버리기
    fn drain_pending(&self) -> usize {
        let mut buf = [0u8; 1024];
        let mut dropped = 0;

        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok(_) => dropped += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("대기 Offer 정리 중 에러: {}", e);
                    break;
                }
            }
        }

        dropped
    }

    /// Offer 하나에 대해 파라미터를 받고 세션 실행
    ///
    /// 파라미터 입력 실패나 종료 시 None
    async fn handle_offer<P: ParamsProvider>(
        &self,
        server: ServerOffer,
        provider: &mut P,
        shutdown: &CancellationToken,
    ) -> Option<SessionReport> {
        info!("Offer received from {}", server);

        let params = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            params = provider.session_params(&server) => params,
        };

        let params = match params.and_then(|p| p.validate().map(|_| p)) {
            Ok(params) => params,
            Err(e) => {
                warn!("Session skipped: {}", e);
                return None;
            }
        };

        let session = TransferSession::new(server, params);
        let report = session.run(&self.config, shutdown.child_token()).await;
        info!(
            "Session with {} ({} TCP + {} UDP): {}",
            session.server(),
            session.params().tcp_connections,
            session.params().udp_connections,
            report.summary()
        );
        Some(report)
    }

    /// Offer 하나만 처리
    pub async fn run_once<P: ParamsProvider>(
        &self,
        provider: &mut P,
        shutdown: CancellationToken,
    ) -> Option<SessionReport> {
        loop {
            let server = self.next_offer(&shutdown).await?;
            if let Some(report) = self.handle_offer(server, provider, &shutdown).await {
                return Some(report);
            }
            if shutdown.is_cancelled() {
                return None;
            }
        }
    }

    /// 종료 신호까지 Offer 수신 / 세션 반복, 완료된 세션 수 반환
    pub async fn run<P: ParamsProvider>(&self, provider: &mut P, shutdown: CancellationToken) -> u64 {
        info!(
            "Client started, listening for offer requests on UDP port {}...",
            self.config.discovery_port
        );

        let mut sessions = 0u64;
        while let Some(server) = self.next_offer(&shutdown).await {
            if self.handle_offer(server, provider, &shutdown).await.is_some() {
                sessions += 1;
                info!("All transfers completed. Returning to listen for offers...");
            }

            let dropped = self.drain_pending();
            if dropped > 0 {
                debug!("Dropped {} offers queued during session", dropped);
            }
        }

        sessions
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;

    fn test_config() -> Config {
        let mut config = Config::local_test();
        config.discovery_port = 0;
        config
    }

    #[test]
    fn test_server_offer_addrs() {
        let server = ServerOffer::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), OfferMessage::new(4000, 5000));
        assert_eq!(server.udp_addr(), "10.0.0.7:4000".parse().unwrap());
        assert_eq!(server.tcp_addr(), "10.0.0.7:5000".parse().unwrap());
        assert_eq!(server.to_string(), "10.0.0.7 (TCP: 5000, UDP: 4000)");
    }

    #[tokio::test]
    async fn test_broadcaster_reaches_listener() {
        let mut config = test_config();
        let listener = DiscoveryListener::bind(config.clone()).unwrap();
        config.discovery_port = listener.local_addr().unwrap().port();

        let stats = Arc::new(ServerStats::new());
        let broadcaster = Broadcaster::bind(&config, OfferMessage::new(1111, 2222), stats.clone()).unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(broadcaster.run(shutdown.clone()));

        let offer = tokio::time::timeout(Duration::from_secs(2), listener.next_offer(&shutdown))
            .await
            .unwrap()
            .unwrap();
        assert_eq!((offer.udp_port, offer.tcp_port), (1111, 2222));
        assert_eq!(offer.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));

        shutdown.cancel();
        let sent = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(sent >= 1);
        assert_eq!(stats.snapshot().offers_sent, sent);
    }

    #[tokio::test]
    async fn test_listener_ignores_invalid_datagrams() {
        let listener = DiscoveryListener::bind(test_config()).unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut bad_magic = OfferMessage::new(1, 2).to_bytes().to_vec();
        bad_magic[0] ^= 0xFF;
        sender.send_to(&bad_magic, target).await.unwrap();
        sender.send_to(b"hello", target).await.unwrap();
        sender.send_to(&OfferMessage::new(7, 8).to_bytes(), target).await.unwrap();

        let shutdown = CancellationToken::new();
        let offer = tokio::time::timeout(Duration::from_secs(2), listener.next_offer(&shutdown))
            .await
            .unwrap()
            .unwrap();
        assert_eq!((offer.udp_port, offer.tcp_port), (7, 8));
    }

    #[tokio::test]
    async fn test_listener_stops_on_cancel() {
        let listener = DiscoveryListener::bind(test_config()).unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert!(listener.next_offer(&shutdown).await.is_none());
        assert_eq!(listener.drain_pending(), 0);
    }
}
