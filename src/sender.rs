//! 송신자 (서버측)
//!
//! - UDP: 요청당 고정 크기 패킷 연속 전송 (재전송 없음)
//! - TCP: 요청 크기만큼 채움 바이트 전송 후 종료

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::message::{PayloadFrame, UdpPayloadMessage, UdpRequestMessage, FILLER_BYTE};
use crate::stats::ServerStats;
use crate::{net, Config, Error, Result};

/// TCP 요청 줄 최대 길이
const MAX_REQUEST_LINE: u64 = 32;

/// accept 실패 후 재시도 대기
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// UDP 응답기
pub struct UdpResponder {
    socket: UdpSocket,
    stats: Arc<ServerStats>,
    max_packets: Option<u64>,
}

impl UdpResponder {
    pub fn bind(config: &Config, stats: Arc<ServerStats>) -> Result<Self> {
        let socket = net::bind_udp_socket(config, config.udp_bind_port)?;
        Ok(Self {
            socket,
            stats,
            max_packets: config.max_udp_packets,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 종료 신호까지 요청 처리, 처리한 요청 수 반환
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        let mut buf = [0u8; 1024];
        let mut served = 0u64;

        loop {
            let (len, peer) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("UDP 수신 에러: {}", e);
                        continue;
                    }
                },
            };

            let request = match UdpRequestMessage::from_bytes(&buf[..len]) {
                Ok(request) => request,
                Err(e) => {
                    if e.is_decode_error() {
                        debug!("잘못된 UDP 요청 무시 ({}): {}", peer, e);
                    } else {
                        warn!("UDP 요청 처리 실패 ({}): {}", peer, e);
                    }
                    continue;
                }
            };

            info!("Valid UDP request from {} for {} bytes", peer, request.file_size);
            self.stats.record_udp_request();
            served += 1;

            let sent = self.stream(peer, request.file_size, &shutdown).await;
            info!("UDP: Sent {} packets to {}", sent, peer);
        }

        debug!("UDP responder stopped after {} requests", served);
        served
    }

    /// 요청 하나에 대한 패킷 전송, 보낸 패킷 수 반환
    async fn stream(&self, peer: SocketAddr, file_size: u64, shutdown: &CancellationToken) -> u64 {
        let mut total = UdpPayloadMessage::total_packets_for(file_size);
        if let Some(max) = self.max_packets {
            if total > max {
                debug!("패킷 수 제한: {} -> {}", total, max);
                total = max;
            }
        }

        let mut frame = PayloadFrame::new(total);
        let mut sent = 0u64;

        for seq in 0..total {
            if shutdown.is_cancelled() {
                break;
            }
            if let Err(e) = self.socket.send_to(frame.packet(seq), peer).await {
                warn!("UDP 전송 중단 ({}, seq={}): {}", peer, seq, e);
                break;
            }
            sent += 1;
            self.stats.record_udp_packet();
        }

        sent
    }
}

/// TCP 요청 줄 파싱 (앞뒤 공백 허용)
pub fn parse_size_request(line: &str) -> Result<u64> {
    let trimmed = line.trim();
    trimmed
        .parse()
        .map_err(|_| Error::InvalidRequest(format!("{:?}", trimmed)))
}

/// TCP 응답기
pub struct TcpResponder {
    listener: TcpListener,
    stats: Arc<ServerStats>,
    chunk_size: usize,
    request_timeout: Duration,
}

impl TcpResponder {
    pub fn bind(config: &Config, stats: Arc<ServerStats>) -> Result<Self> {
        let listener = net::bind_tcp_listener(config)?;
        Ok(Self {
            listener,
            stats,
            chunk_size: config.tcp_chunk_size.max(1),
            request_timeout: config.tcp_request_timeout(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 종료 신호까지 연결 수락, 수락한 연결 수 반환
    ///
    /// 연결마다 별도 태스크, 종료 시 모든 태스크 대기
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        let mut connections = JoinSet::new();
        let mut accepted = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!("TCP 연결 태스크 비정상 종료: {}", e);
                    }
                }
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        info!("New TCP client connected from {}", peer);
                        accepted += 1;
                        self.stats.record_tcp_connection();

                        let stats = self.stats.clone();
                        let chunk_size = self.chunk_size;
                        let request_timeout = self.request_timeout;
                        let token = shutdown.child_token();

                        connections.spawn(async move {
                            if let Err(e) =
                                serve_connection(stream, &stats, chunk_size, request_timeout, &token).await
                            {
                                warn!("Error handling TCP client {}: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("TCP accept 실패: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                warn!("TCP 연결 태스크 비정상 종료: {}", e);
            }
        }

        debug!("TCP responder stopped after {} connections", accepted);
        accepted
    }
}

/// 연결 하나 처리: 요청 줄 읽기 -> 채움 바이트 전송 -> 종료
async fn serve_connection(
    stream: TcpStream,
    stats: &ServerStats,
    chunk_size: usize,
    request_timeout: Duration,
    shutdown: &CancellationToken,
) -> Result<u64> {
    let peer = stream.peer_addr()?;
    let (read_half, mut write_half) = stream.into_split();

    let mut reader = BufReader::new(read_half.take(MAX_REQUEST_LINE));
    let mut line = String::new();
    let read = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return Ok(0),
        result = tokio::time::timeout(request_timeout, reader.read_line(&mut line)) => {
            result.map_err(|_| Error::InvalidRequest("request timed out".into()))??
        }
    };
    if read == 0 {
        return Err(Error::ConnectionClosed);
    }

    let file_size = parse_size_request(&line)?;
    info!("Client requested TCP transfer of {} bytes", file_size);

    let chunk = vec![FILLER_BYTE; chunk_size];
    let mut remaining = file_size;

    while remaining > 0 {
        let len = remaining.min(chunk_size as u64) as usize;
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("TCP 전송 취소 ({}): {} bytes 남음", peer, remaining);
                break;
            }
            result = write_half.write_all(&chunk[..len]) => result?,
        }
        remaining -= len as u64;
        stats.record_tcp_bytes(len as u64);
    }

    write_half.shutdown().await?;

    let sent = file_size - remaining;
    info!("TCP: Sent {} bytes to {}", sent, peer);
    Ok(sent)
}
