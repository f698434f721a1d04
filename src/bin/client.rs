//! netspeed 클라이언트
//!
//! Offer 수신 -> 파라미터 입력 -> TCP/UDP 동시 측정 -> 결과 출력 -> 다시 대기
//!
//! 사용법:
//!   cargo run --release --bin netspeed-client -- [OPTIONS]
//!
//! 예시:
//!   # 대화형 (Offer마다 크기/연결 수 입력)
//!   cargo run --release --bin netspeed-client
//!
//!   # 비대화형: 10MB, TCP 2개 + UDP 1개, 한 번만 측정
//!   cargo run --release --bin netspeed-client -- --size 10485760 --tcp 2 --udp 1 --once

use std::future::Future;
use std::io::{self, Write};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use netspeed::{
    Config, DiscoveryListener, Error, FixedParams, ParamsProvider, ServerOffer, SessionParams,
};

/// 클라이언트 실행 옵션
struct ClientConfig {
    size: Option<u64>,
    tcp: Option<usize>,
    udp: Option<usize>,
    once: bool,
    verbose: bool,
    config: Config,
}

impl ClientConfig {
    /// `--size`가 있으면 비대화형 (연결 수 기본 1)
    fn fixed_params(&self) -> Option<SessionParams> {
        self.size.map(|size| {
            SessionParams::new(size, self.tcp.unwrap_or(1), self.udp.unwrap_or(1))
        })
    }
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, what: &str) -> T {
    match args.get(i + 1).map(|v| v.parse()) {
        Some(Ok(value)) => value,
        _ => {
            eprintln!("{} 옵션에 유효한 값 필요", what);
            std::process::exit(2);
        }
    }
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ClientConfig {
        size: None,
        tcp: None,
        udp: None,
        once: false,
        verbose: false,
        config: Config::lan(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--discovery-port" | "-p" => {
                parsed.config.discovery_port = parse_value(&args, i, "--discovery-port");
                i += 1;
            }
            "--size" | "-s" => {
                parsed.size = Some(parse_value(&args, i, "--size"));
                i += 1;
            }
            "--tcp" => {
                parsed.tcp = Some(parse_value(&args, i, "--tcp"));
                i += 1;
            }
            "--udp" => {
                parsed.udp = Some(parse_value(&args, i, "--udp"));
                i += 1;
            }
            "--udp-timeout-ms" => {
                parsed.config.udp_recv_timeout_ms = parse_value(&args, i, "--udp-timeout-ms");
                i += 1;
            }
            "--legacy-loss" => parsed.config.legacy_expected_packets = true,
            "--once" => parsed.once = true,
            "--verbose" | "-v" => parsed.verbose = true,
            "--help" | "-h" => {
                println!(
                    r#"netspeed client - LAN 속도 측정 클라이언트

서버 Offer를 기다렸다가 TCP/UDP 연결을 동시에 열어 처리율과 손실률 측정

사용법:
  cargo run --release --bin netspeed-client -- [OPTIONS]

옵션:
  -p, --discovery-port <PORT>  Offer 수신 포트 (기본: 12345)
  -s, --size <BYTES>           연결당 요청 바이트 (지정 시 비대화형)
  --tcp <N>                    TCP 연결 수 (기본: 1, --size와 함께)
  --udp <N>                    UDP 연결 수 (기본: 1, --size와 함께)
  --udp-timeout-ms <MS>        UDP 무응답 타임아웃 (기본: 2000)
  --legacy-loss                예상 패킷 수를 내림 나눗셈으로 계산
  --once                       세션 한 번 후 종료
  -v, --verbose                디버그 로그 출력
  -h, --help                   이 도움말 출력

예시:
  # 대화형
  cargo run --release --bin netspeed-client

  # 100MB, TCP 4개, UDP 없음
  cargo run --release --bin netspeed-client -- --size 104857600 --tcp 4 --udp 0
"#
                );
                std::process::exit(0);
            }
            other => eprintln!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    if parsed.size.is_none() && (parsed.tcp.is_some() || parsed.udp.is_some()) {
        eprintln!("--tcp/--udp는 --size와 함께 사용");
        std::process::exit(2);
    }
    if let Some(Err(e)) = parsed.fixed_params().map(|p| p.validate()) {
        eprintln!("{}", e);
        std::process::exit(2);
    }

    parsed
}

/// 표준 입력으로 파라미터를 묻는 공급자
///
/// stdin은 런타임 밖 전용 스레드에서 줄 단위로 읽어 채널로 전달.
/// 런타임 종료가 입력 대기에 막히지 않음
struct PromptParams {
    lines: mpsc::UnboundedReceiver<String>,
}

impl PromptParams {
    fn spawn() -> Self {
        let (tx, lines) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for line in io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines }
    }

    async fn ask(&mut self, question: &str) -> netspeed::Result<String> {
        print!("{}", question);
        io::stdout().flush()?;
        self.lines
            .recv()
            .await
            .ok_or_else(|| Error::InvalidUserInput("표준 입력 종료".into()))
    }
}

impl ParamsProvider for PromptParams {
    fn session_params(
        &mut self,
        server: &ServerOffer,
    ) -> impl Future<Output = netspeed::Result<SessionParams>> + Send {
        let server = *server;
        async move {
            // 세션 중 미리 입력된 줄은 버림
            while self.lines.try_recv().is_ok() {}

            println!("Received offer from {}", server);
            let size = self.ask("Enter file size (bytes): ").await?;
            let tcp = self.ask("Enter number of TCP connections: ").await?;
            let udp = self.ask("Enter number of UDP connections: ").await?;
            SessionParams::parse(&size, &tcp, &udp)
        }
    }
}

async fn listen<P: ParamsProvider>(
    listener: &DiscoveryListener,
    provider: &mut P,
    once: bool,
    shutdown: CancellationToken,
) {
    if once {
        if listener.run_once(provider, shutdown).await.is_none() {
            info!("No session completed");
        }
    } else {
        let sessions = listener.run(provider, shutdown).await;
        info!("Client stopped after {} sessions", sessions);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // 로깅 설정
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let fixed = args.fixed_params();
    let listener = DiscoveryListener::bind(args.config)?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
        }
        ctrl_c.cancel();
    });

    match fixed {
        Some(params) => listen(&listener, &mut FixedParams(params), args.once, shutdown).await,
        None => listen(&listener, &mut PromptParams::spawn(), args.once, shutdown).await,
    }

    Ok(())
}
