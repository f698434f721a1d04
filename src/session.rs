//! 전송 세션
//!
//! Offer 하나에 대해 TCP/UDP 워커를 동시에 실행하고 모두 끝날 때까지 대기

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::discovery::ServerOffer;
use crate::receiver;
use crate::stats::{SessionReport, WorkerKind, WorkerOutcome};
use crate::{Config, Error, Result};

/// 종류별 최대 연결 수
pub const MAX_CONNECTIONS: usize = 1024;

/// 세션 파라미터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// 연결당 요청 바이트
    pub file_size: u64,

    /// TCP 연결 수
    pub tcp_connections: usize,

    /// UDP 연결 수
    pub udp_connections: usize,
}

impl SessionParams {
    pub fn new(file_size: u64, tcp_connections: usize, udp_connections: usize) -> Self {
        Self {
            file_size,
            tcp_connections,
            udp_connections,
        }
    }

    /// 문자열 입력 파싱
    pub fn parse(file_size: &str, tcp_connections: &str, udp_connections: &str) -> Result<Self> {
        fn field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| Error::InvalidUserInput(format!("{}: {:?}", name, value.trim())))
        }

        let params = Self {
            file_size: field("file size", file_size)?,
            tcp_connections: field("TCP connections", tcp_connections)?,
            udp_connections: field("UDP connections", udp_connections)?,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, count) in [("TCP", self.tcp_connections), ("UDP", self.udp_connections)] {
            if count > MAX_CONNECTIONS {
                return Err(Error::InvalidUserInput(format!(
                    "{} 연결 수는 최대 {}: {}",
                    name, MAX_CONNECTIONS, count
                )));
            }
        }

        match self.tcp_connections.checked_add(self.udp_connections) {
            Some(0) | None => Err(Error::InvalidUserInput(
                "TCP/UDP 연결 수 합이 1 이상이어야 함".into(),
            )),
            Some(_) => Ok(()),
        }
    }

    pub fn total_connections(&self) -> usize {
        self.tcp_connections.saturating_add(self.udp_connections)
    }
}

/// 세션 파라미터 공급자
///
/// 대화형 입력, 명령행 인자 등 입력 방식과 프로토콜 코어를 분리
pub trait ParamsProvider {
    fn session_params(
        &mut self,
        server: &ServerOffer,
    ) -> impl Future<Output = Result<SessionParams>> + Send;
}

/// 고정 파라미터 (비대화형)
#[derive(Debug, Clone, Copy)]
pub struct FixedParams(pub SessionParams);

impl ParamsProvider for FixedParams {
    fn session_params(
        &mut self,
        _server: &ServerOffer,
    ) -> impl Future<Output = Result<SessionParams>> + Send {
        std::future::ready(Ok(self.0))
    }
}

/// 서버 하나에 대한 전송 세션
#[derive(Debug, Clone)]
pub struct TransferSession {
    server: ServerOffer,
    params: SessionParams,
}

impl TransferSession {
    pub fn new(server: ServerOffer, params: SessionParams) -> Self {
        Self { server, params }
    }

    pub fn server(&self) -> &ServerOffer {
        &self.server
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    /// 모든 워커 실행 후 결과 수집
    ///
    /// 워커 실패는 해당 워커 결과에만 기록되고 다른 워커에 영향 없음
    pub async fn run(&self, config: &Config, shutdown: CancellationToken) -> SessionReport {
        let start = Instant::now();
        if let Err(e) = self.params.validate() {
            warn!("Session not started: {}", e);
            return SessionReport {
                outcomes: Vec::new(),
                elapsed: start.elapsed(),
            };
        }

        let file_size = self.params.file_size;
        let mut workers = JoinSet::new();
        // 패닉으로 결과 없이 끝난 워커 추적용
        let mut pending: BTreeMap<usize, WorkerKind> = BTreeMap::new();

        info!(
            "Connecting to server at {}: {} bytes x {} TCP + {} UDP",
            self.server, file_size, self.params.tcp_connections, self.params.udp_connections
        );

        for id in 0..self.params.tcp_connections {
            let addr = self.server.tcp_addr();
            let config = config.clone();
            let shutdown = shutdown.clone();
            pending.insert(id, WorkerKind::Tcp);

            workers.spawn(async move {
                let result = receiver::tcp_transfer(addr, file_size, &config, &shutdown)
                    .await
                    .map(|report| WorkerOutcome::Tcp { id, report });
                (id, WorkerKind::Tcp, result)
            });
        }

        for n in 0..self.params.udp_connections {
            let id = self.params.tcp_connections + n;
            let addr = self.server.udp_addr();
            let config = config.clone();
            let shutdown = shutdown.clone();
            pending.insert(id, WorkerKind::Udp);

            workers.spawn(async move {
                let result = receiver::udp_transfer(addr, file_size, &config, &shutdown)
                    .await
                    .map(|report| WorkerOutcome::Udp { id, report });
                (id, WorkerKind::Udp, result)
            });
        }

        let mut outcomes = Vec::with_capacity(workers.len());

        while let Some(joined) = workers.join_next().await {
            let (id, kind, result) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    warn!("Worker task aborted: {}", e);
                    continue;
                }
            };
            pending.remove(&id);

            match result {
                Ok(outcome) => {
                    match &outcome {
                        WorkerOutcome::Tcp { report, .. } => info!("[#{}] {}", id, report.summary()),
                        WorkerOutcome::Udp { report, .. } => info!("[#{}] {}", id, report.summary()),
                        WorkerOutcome::Failed { .. } => {}
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    warn!("[#{}] {} request failed: {}", id, kind, e);
                    outcomes.push(WorkerOutcome::Failed {
                        id,
                        kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        for (id, kind) in pending {
            outcomes.push(WorkerOutcome::Failed {
                id,
                kind,
                error: "worker task aborted".into(),
            });
        }

        outcomes.sort_by_key(|o| o.id());

        SessionReport {
            outcomes,
            elapsed: start.elapsed(),
        }
    }
}
