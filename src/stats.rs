//! 측정 통계
//!
//! - 클라이언트: 연결별 처리율/손실률 보고
//! - 서버: 전송량 카운터

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// TCP 처리율 계산 시 최소 경과 시간
pub const MIN_TCP_DURATION: Duration = Duration::from_millis(1);

/// 처리율 계산 (bytes/sec), 경과 시간이 0이면 0
pub fn throughput(bytes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    bytes as f64 / secs
}

/// 손실률 계산 (%), 예상 패킷이 0이면 100
pub fn packet_loss_percent(received: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 100.0;
    }
    let lost = expected - received.min(expected);
    lost as f64 * 100.0 / expected as f64
}

/// TCP 연결 결과
#[derive(Debug, Clone, PartialEq)]
pub struct TcpReport {
    /// 요청 바이트
    pub requested: u64,

    /// 실제 수신 바이트
    pub bytes_received: u64,

    /// 경과 시간 (최소 1ms)
    pub duration: Duration,

    /// 처리율 (bytes/sec)
    pub throughput: f64,
}

impl TcpReport {
    pub fn new(requested: u64, bytes_received: u64, elapsed: Duration) -> Self {
        let duration = elapsed.max(MIN_TCP_DURATION);
        Self {
            requested,
            bytes_received,
            duration,
            throughput: throughput(bytes_received, duration),
        }
    }

    /// 서버가 요청보다 일찍 연결을 닫았는지
    pub fn is_short(&self) -> bool {
        self.bytes_received < self.requested
    }

    pub fn summary(&self) -> String {
        format!(
            "TCP transfer finished: Time: {:.3}s | Bytes: {}/{} | Speed: {:.2} bytes/s ({:.2} Mbit/s)",
            self.duration.as_secs_f64(),
            self.bytes_received,
            self.requested,
            self.throughput,
            self.throughput * 8.0 / 1_000_000.0,
        )
    }
}

/// UDP 연결 결과
#[derive(Debug, Clone, PartialEq)]
pub struct UdpReport {
    /// 요청 바이트
    pub requested: u64,

    /// 유효 패킷 수신 바이트
    pub bytes_received: u64,

    /// 수신된 고유 패킷 수
    pub received_packets: u64,

    /// 예상 패킷 수
    pub expected_packets: u64,

    /// 중복 수신 패킷 수
    pub duplicate_packets: u64,

    /// 순서가 바뀐 패킷 수
    pub out_of_order_packets: u64,

    /// 무응답 타임아웃으로 종료됐는지
    pub timed_out: bool,

    /// 경과 시간
    pub duration: Duration,

    /// 처리율 (bytes/sec)
    pub throughput: f64,

    /// 손실률 (%)
    pub packet_loss: f64,
}

impl UdpReport {
    pub fn summary(&self) -> String {
        format!(
            "UDP transfer finished: Time: {:.2}s | Packets: {}/{} | Speed: {:.2} bytes/s | Packet Loss: {:.2}% | Duplicates: {} | Out of order: {}{}",
            self.duration.as_secs_f64(),
            self.received_packets,
            self.expected_packets,
            self.throughput,
            self.packet_loss,
            self.duplicate_packets,
            self.out_of_order_packets,
            if self.timed_out { " (timed out)" } else { "" },
        )
    }
}

/// 수신 패킷 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    /// 처음 받은 시퀀스
    New,
    /// 이미 받은 시퀀스
    Duplicate,
    /// 예상 범위 밖 시퀀스
    OutOfRange,
}

/// UDP 수신 누적기 (워커 내부 전용)
///
/// 수신한 시퀀스만 기록하므로 메모리는 예상 패킷 수가 아닌 실제 수신량에 비례
#[derive(Debug, Clone)]
pub struct UdpReceiveStats {
    expected_packets: u64,
    seen: HashSet<u64>,
    bytes_received: u64,
    duplicate_packets: u64,
    out_of_order_packets: u64,
    highest_seq: Option<u64>,
}

impl UdpReceiveStats {
    pub fn new(expected_packets: u64) -> Self {
        Self {
            expected_packets,
            seen: HashSet::new(),
            bytes_received: 0,
            duplicate_packets: 0,
            out_of_order_packets: 0,
            highest_seq: None,
        }
    }

    /// 패킷 기록
    pub fn record(&mut self, sequence_number: u64, len: usize) -> PacketClass {
        if sequence_number >= self.expected_packets {
            return PacketClass::OutOfRange;
        }

        if !self.seen.insert(sequence_number) {
            self.duplicate_packets += 1;
            return PacketClass::Duplicate;
        }

        self.bytes_received += len as u64;

        match self.highest_seq {
            Some(highest) if sequence_number < highest => self.out_of_order_packets += 1,
            _ => self.highest_seq = Some(sequence_number),
        }

        PacketClass::New
    }

    pub fn is_complete(&self) -> bool {
        self.received_packets() >= self.expected_packets
    }

    pub fn received_packets(&self) -> u64 {
        self.seen.len() as u64
    }

    pub fn finish(self, requested: u64, duration: Duration, timed_out: bool) -> UdpReport {
        UdpReport {
            requested,
            bytes_received: self.bytes_received,
            received_packets: self.received_packets(),
            expected_packets: self.expected_packets,
            duplicate_packets: self.duplicate_packets,
            out_of_order_packets: self.out_of_order_packets,
            timed_out,
            duration,
            throughput: throughput(self.bytes_received, duration),
            packet_loss: packet_loss_percent(self.received_packets(), self.expected_packets),
        }
    }
}

/// 워커 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Tcp,
    Udp,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Tcp => write!(f, "TCP"),
            WorkerKind::Udp => write!(f, "UDP"),
        }
    }
}

/// 워커 하나의 결과
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    Tcp { id: usize, report: TcpReport },
    Udp { id: usize, report: UdpReport },
    Failed { id: usize, kind: WorkerKind, error: String },
}

impl WorkerOutcome {
    pub fn id(&self) -> usize {
        match self {
            WorkerOutcome::Tcp { id, .. }
            | WorkerOutcome::Udp { id, .. }
            | WorkerOutcome::Failed { id, .. } => *id,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        match self {
            WorkerOutcome::Tcp { report, .. } => report.bytes_received,
            WorkerOutcome::Udp { report, .. } => report.bytes_received,
            WorkerOutcome::Failed { .. } => 0,
        }
    }
}

/// 세션 전체 결과
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// 워커 id 순으로 정렬된 결과
    pub outcomes: Vec<WorkerOutcome>,

    /// 세션 경과 시간
    pub elapsed: Duration,
}

impl SessionReport {
    pub fn tcp_reports(&self) -> impl Iterator<Item = &TcpReport> {
        self.outcomes.iter().filter_map(|o| match o {
            WorkerOutcome::Tcp { report, .. } => Some(report),
            _ => None,
        })
    }

    pub fn udp_reports(&self) -> impl Iterator<Item = &UdpReport> {
        self.outcomes.iter().filter_map(|o| match o {
            WorkerOutcome::Udp { report, .. } => Some(report),
            _ => None,
        })
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, WorkerOutcome::Failed { .. }))
            .count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes_received()).sum()
    }

    /// 세션 전체 처리율 (모든 연결 합산)
    pub fn aggregate_throughput(&self) -> f64 {
        throughput(self.total_bytes(), self.elapsed)
    }

    pub fn summary(&self) -> String {
        format!(
            "Session: {:.2}s | TCP: {} | UDP: {} | Failed: {} | Bytes: {} | Aggregate: {:.2} Mbit/s",
            self.elapsed.as_secs_f64(),
            self.tcp_reports().count(),
            self.udp_reports().count(),
            self.failed_count(),
            self.total_bytes(),
            self.aggregate_throughput() * 8.0 / 1_000_000.0,
        )
    }
}

/// 서버 전송 카운터 (루프 간 공유)
#[derive(Debug, Default)]
pub struct ServerStats {
    offers_sent: AtomicU64,
    udp_requests: AtomicU64,
    udp_packets_sent: AtomicU64,
    tcp_connections: AtomicU64,
    tcp_bytes_sent: AtomicU64,
}

/// 서버 카운터 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub offers_sent: u64,
    pub udp_requests: u64,
    pub udp_packets_sent: u64,
    pub tcp_connections: u64,
    pub tcp_bytes_sent: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_offer(&self) {
        self.offers_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_udp_request(&self) {
        self.udp_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_udp_packet(&self) {
        self.udp_packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tcp_connection(&self) {
        self.tcp_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tcp_bytes(&self, bytes: u64) {
        self.tcp_bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            offers_sent: self.offers_sent.load(Ordering::Relaxed),
            udp_requests: self.udp_requests.load(Ordering::Relaxed),
            udp_packets_sent: self.udp_packets_sent.load(Ordering::Relaxed),
            tcp_connections: self.tcp_connections.load(Ordering::Relaxed),
            tcp_bytes_sent: self.tcp_bytes_sent.load(Ordering::Relaxed),
        }
    }
}

impl ServerStatsSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "Offers: {} | UDP requests: {} | UDP packets: {} | TCP connections: {} | TCP bytes: {}",
            self.offers_sent,
            self.udp_requests,
            self.udp_packets_sent,
            self.tcp_connections,
            self.tcp_bytes_sent,
        )
    }
}
