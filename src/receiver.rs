//! 수신자 (클라이언트측 워커)
//!
//! - TCP: 크기 요청 후 스트림 수신
//! - UDP: 요청 1회 후 무응답 타임아웃까지 패킷 수신, 손실률 계산

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::message::{UdpPayloadMessage, UdpRequestMessage};
use crate::stats::{PacketClass, TcpReport, UdpReceiveStats, UdpReport};
use crate::{net, Config, Error, Result};

/// TCP 수신 버퍼 크기
const TCP_READ_BUFFER: usize = 64 * 1024;

/// UDP 수신 버퍼 크기 (패킷보다 크게 잡아 잘린 패킷도 길이로 거름)
const UDP_READ_BUFFER: usize = 2048;

/// TCP 워커: 연결 하나로 `file_size` 바이트 수신
///
/// 서버가 먼저 연결을 닫으면 받은 만큼만 보고 (에러 아님)
pub async fn tcp_transfer(
    addr: SocketAddr,
    file_size: u64,
    config: &Config,
    shutdown: &CancellationToken,
) -> Result<TcpReport> {
    let connect_timeout = config.connect_timeout();
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::ConnectTimeout(connect_timeout))??;
    let start = Instant::now();

    stream.write_all(format!("{}\n", file_size).as_bytes()).await?;
    debug!("TCP connection established with {}", addr);

    let mut buf = vec![0u8; TCP_READ_BUFFER];
    let mut received = 0u64;

    while received < file_size {
        let want = (file_size - received).min(buf.len() as u64) as usize;
        let n = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("TCP 수신 취소: {}/{} bytes", received, file_size);
                break;
            }
            result = stream.read(&mut buf[..want]) => result?,
        };

        if n == 0 {
            debug!("Server closed connection early: {}/{} bytes", received, file_size);
            break;
        }
        received += n as u64;
    }

    Ok(TcpReport::new(file_size, received, start.elapsed()))
}

/// UDP 수신 한 번의 결과
#[derive(Debug)]
pub enum RecvOutcome {
    /// 데이터그램 수신 (길이)
    DataReceived(usize),
    /// 무응답 타임아웃
    TimedOut,
    /// 종료 신호
    Cancelled,
    Error(io::Error),
}

/// 타임아웃/종료 신호를 포함한 수신
pub async fn recv_with_timeout(
    socket: &UdpSocket,
    buf: &mut [u8],
    wait: Duration,
    shutdown: &CancellationToken,
) -> RecvOutcome {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => RecvOutcome::Cancelled,
        result = tokio::time::timeout(wait, socket.recv_from(buf)) => match result {
            Ok(Ok((len, _))) => RecvOutcome::DataReceived(len),
            Ok(Err(e)) => RecvOutcome::Error(e),
            Err(_) => RecvOutcome::TimedOut,
        },
    }
}

/// UDP 워커: 요청 1회 전송 후 패킷 수신
///
/// 예상 패킷을 모두 받거나, 무응답 타임아웃, 종료 신호 중 먼저 오는 시점에 종료
pub async fn udp_transfer(
    addr: SocketAddr,
    file_size: u64,
    config: &Config,
    shutdown: &CancellationToken,
) -> Result<UdpReport> {
    let socket = net::bind_udp_socket(config, 0)?;
    socket
        .send_to(&UdpRequestMessage::new(file_size).to_bytes(), addr)
        .await?;
    debug!("UDP request sent to {}", addr);

    let start = Instant::now();
    let mut stats = UdpReceiveStats::new(config.expected_packets(file_size));
    let timed_out = receive_payloads(&socket, &mut stats, config.udp_recv_timeout(), shutdown).await;

    Ok(stats.finish(file_size, start.elapsed(), timed_out))
}

/// 페이로드 수신 루프, 무응답 타임아웃으로 끝났으면 true
///
/// 수신 에러도 그때까지 받은 결과로 종료 (Windows는 ICMP 응답을 수신 에러로 전달)
async fn receive_payloads(
    socket: &UdpSocket,
    stats: &mut UdpReceiveStats,
    wait: Duration,
    shutdown: &CancellationToken,
) -> bool {
    let mut buf = [0u8; UDP_READ_BUFFER];

    while !stats.is_complete() {
        match recv_with_timeout(socket, &mut buf, wait, shutdown).await {
            RecvOutcome::DataReceived(len) => match UdpPayloadMessage::decode_header(&buf[..len]) {
                Ok((_, seq)) => {
                    if stats.record(seq, len) != PacketClass::New {
                        debug!("중복/범위 밖 패킷 무시: seq={}", seq);
                    }
                }
                Err(e) if e.is_decode_error() => debug!("잘못된 패킷 무시: {}", e),
                Err(e) => warn!("패킷 처리 실패: {}", e),
            },
            RecvOutcome::TimedOut => {
                debug!(
                    "Timeout while waiting for UDP packet. Stopping reception ({} packets).",
                    stats.received_packets()
                );
                return true;
            }
            RecvOutcome::Cancelled => break,
            RecvOutcome::Error(e) => {
                warn!(
                    "UDP 수신 에러, {}개 수신 후 종료: {}",
                    stats.received_packets(),
                    e
                );
                break;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_tcp_early_close_is_not_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = tokio::io::BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line, "5000\n");
            // 요청보다 적게 보내고 종료
            reader.get_mut().write_all(&[0u8; 1000]).await.unwrap();
        });

        let report = tcp_transfer(addr, 5000, &Config::local_test(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.bytes_received, 1000);
        assert!(report.is_short());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused_is_error() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let result = tcp_transfer(addr, 10, &Config::local_test(), &CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_udp_timeout_reports_partial() {
        // 요청만 받고 패킷 2개만 보내는 서버
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let request = UdpRequestMessage::from_bytes(&buf[..len]).unwrap();
            assert_eq!(request.file_size, 4096);
            for seq in [0, 2] {
                let packet = UdpPayloadMessage::filler(4, seq).to_bytes();
                server.send_to(&packet, peer).await.unwrap();
            }
            // 중복 패킷
            let packet = UdpPayloadMessage::filler(4, 2).to_bytes();
            server.send_to(&packet, peer).await.unwrap();
        });

        let report = udp_transfer(addr, 4096, &Config::local_test(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.timed_out);
        assert_eq!(report.expected_packets, 4);
        assert_eq!(report.received_packets, 2);
        assert_eq!(report.duplicate_packets, 1);
        assert_eq!(report.packet_loss, 50.0);
    }

    #[tokio::test]
    async fn test_udp_zero_size_reports_full_loss() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let report = udp_transfer(addr, 0, &Config::local_test(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!report.timed_out);
        assert_eq!(report.expected_packets, 0);
        assert_eq!(report.packet_loss, 100.0);
    }

    #[tokio::test]
    async fn test_udp_huge_request_does_not_preallocate() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let request = UdpRequestMessage::from_bytes(&buf[..len]).unwrap();
            let total = UdpPayloadMessage::total_packets_for(request.file_size);
            for seq in [0, total - 1] {
                let packet = UdpPayloadMessage::filler(total, seq).to_bytes();
                server.send_to(&packet, peer).await.unwrap();
            }
        });

        let report = udp_transfer(addr, u64::MAX, &Config::local_test(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.timed_out);
        assert_eq!(report.expected_packets, u64::MAX.div_ceil(1024));
        assert_eq!(report.received_packets, 2);
    }

    #[tokio::test]
    async fn test_recv_error_keeps_partial_result() {
        // 닫힌 포트에 연결된 소켓: 전송 후 수신 시 ECONNREFUSED
        let closed = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = closed.local_addr().unwrap();
        drop(closed);

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(target).await.unwrap();
        socket.send(b"ping").await.unwrap();

        let mut stats = UdpReceiveStats::new(4);
        stats.record(0, 1024);
        let timed_out = receive_payloads(
            &socket,
            &mut stats,
            Duration::from_millis(500),
            &CancellationToken::new(),
        )
        .await;

        assert!(!timed_out);
        let report = stats.finish(4096, Duration::from_millis(10), timed_out);
        assert_eq!(report.received_packets, 1);
        assert_eq!(report.packet_loss, 75.0);
    }

    #[tokio::test]
    async fn test_recv_cancelled() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let mut buf = [0u8; 16];
        let outcome = recv_with_timeout(&socket, &mut buf, Duration::from_secs(5), &shutdown).await;
        assert!(matches!(outcome, RecvOutcome::Cancelled));
    }
}
