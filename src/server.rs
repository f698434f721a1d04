//! 속도 측정 서버
//!
//! Offer 브로드캐스트, UDP 응답, TCP 응답 루프를 동시에 실행

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::discovery::Broadcaster;
use crate::message::OfferMessage;
use crate::sender::{TcpResponder, UdpResponder};
use crate::stats::{ServerStats, ServerStatsSnapshot};
use crate::{Config, Result};

/// 서버 (바인딩 완료 상태)
pub struct Server {
    config: Config,
    broadcaster: Broadcaster,
    udp: UdpResponder,
    tcp: TcpResponder,
    stats: Arc<ServerStats>,
}

impl Server {
    /// 소켓 바인딩
    ///
    /// Offer에는 실제 할당된 포트가 들어감
    pub fn bind(config: Config) -> Result<Self> {
        let stats = Arc::new(ServerStats::new());
        let udp = UdpResponder::bind(&config, stats.clone())?;
        let tcp = TcpResponder::bind(&config, stats.clone())?;

        let offer = OfferMessage::new(udp.local_addr()?.port(), tcp.local_addr()?.port());
        let broadcaster = Broadcaster::bind(&config, offer, stats.clone())?;

        Ok(Self {
            config,
            broadcaster,
            udp,
            tcp,
            stats,
        })
    }

    pub fn udp_port(&self) -> u16 {
        self.broadcaster.offer().udp_port
    }

    pub fn tcp_port(&self) -> u16 {
        self.broadcaster.offer().tcp_port
    }

    pub fn offer(&self) -> OfferMessage {
        self.broadcaster.offer()
    }

    /// 실행 중 카운터 조회용
    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// 종료 신호까지 실행, 최종 카운터 반환
    pub async fn run(self, shutdown: CancellationToken) -> Result<ServerStatsSnapshot> {
        info!(
            "Server started: UDP port {}, TCP port {}, offers to {} every {}ms",
            self.udp_port(),
            self.tcp_port(),
            self.config.broadcast_target(),
            self.config.broadcast_interval_ms
        );

        let broadcaster = tokio::spawn(self.broadcaster.run(shutdown.clone()));
        let udp = tokio::spawn(self.udp.run(shutdown.clone()));
        let tcp = tokio::spawn(self.tcp.run(shutdown.clone()));

        let (broadcaster, udp, tcp) = tokio::join!(broadcaster, udp, tcp);
        for (name, joined) in [("broadcaster", broadcaster), ("UDP", udp), ("TCP", tcp)] {
            if let Err(e) = joined {
                warn!("{} 루프 비정상 종료: {}", name, e);
            }
        }

        info!("Shutting down server...");
        let snapshot = self.stats.snapshot();
        info!("{}", snapshot.summary());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_offer_uses_bound_ports() {
        let mut config = Config::local_test();
        config.discovery_port = 0;
        let server = Server::bind(config).unwrap();

        assert_ne!(server.udp_port(), 0);
        assert_ne!(server.tcp_port(), 0);
        assert_eq!(server.offer(), OfferMessage::new(server.udp_port(), server.tcp_port()));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut config = Config::local_test();
        config.discovery_port = 0;
        let server = Server::bind(config).unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let snapshot = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.tcp_connections, 0);
    }
}
