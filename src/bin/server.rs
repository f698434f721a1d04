//! netspeed 서버
//!
//! Offer 브로드캐스트 + UDP/TCP 응답
//! - 1초마다 UDP/TCP 포트를 브로드캐스트
//! - 요청 크기만큼 데이터 전송 (UDP는 재전송 없음)
//!
//! 사용법:
//!   cargo run --release --bin netspeed-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 실행 (255.255.255.255:12345로 브로드캐스트)
//!   cargo run --release --bin netspeed-server
//!
//!   # 서브넷 브로드캐스트 + 고정 포트
//!   cargo run --release --bin netspeed-server -- --broadcast 192.168.0.255 --tcp-port 9000

use std::net::IpAddr;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use netspeed::{Config, Server};

/// 서버 실행 옵션
struct ServerConfig {
    verbose: bool,
    config: Config,
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

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ServerConfig {
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
            "--broadcast" | "-b" => {
                parsed.config.broadcast_addr = parse_value::<IpAddr>(&args, i, "--broadcast");
                i += 1;
            }
            "--interval-ms" => {
                parsed.config.broadcast_interval_ms = parse_value(&args, i, "--interval-ms");
                i += 1;
            }
            "--udp-port" => {
                parsed.config.udp_bind_port = parse_value(&args, i, "--udp-port");
                i += 1;
            }
            "--tcp-port" => {
                parsed.config.tcp_bind_port = parse_value(&args, i, "--tcp-port");
                i += 1;
            }
            "--max-udp-packets" => {
                parsed.config.max_udp_packets = Some(parse_value(&args, i, "--max-udp-packets"));
                i += 1;
            }
            "--verbose" | "-v" => parsed.verbose = true,
            "--help" | "-h" => {
                println!(
                    r#"netspeed server - LAN 속도 측정 서버

주기적으로 Offer를 브로드캐스트하고 UDP/TCP 요청에 응답
- UDP: 1024바이트 패킷을 요청 크기만큼 연속 전송 (재전송 없음)
- TCP: 요청 크기만큼 바이트 전송 후 연결 종료

사용법:
  cargo run --release --bin netspeed-server -- [OPTIONS]

옵션:
  -p, --discovery-port <PORT>  Offer 브로드캐스트 포트 (기본: 12345)
  -b, --broadcast <ADDR>       브로드캐스트 주소 (기본: 255.255.255.255)
  --interval-ms <MS>           Offer 전송 주기 (기본: 1000)
  --udp-port <PORT>            UDP 응답 포트 (기본: 자동 할당)
  --tcp-port <PORT>            TCP 응답 포트 (기본: 자동 할당)
  --max-udp-packets <N>        요청당 최대 UDP 패킷 수 (기본: 제한 없음)
  -v, --verbose                디버그 로그 출력
  -h, --help                   이 도움말 출력

예시:
  # 기본 실행
  cargo run --release --bin netspeed-server

  # 서브넷 브로드캐스트
  cargo run --release --bin netspeed-server -- --broadcast 192.168.0.255
"#
                );
                std::process::exit(0);
            }
            other => eprintln!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // 로깅 설정
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match local_ip_address::local_ip() {
        Ok(ip) => info!("Server started, listening on IP address {}", ip),
        Err(e) => warn!("로컬 IP 조회 실패: {}", e),
    }

    let server = Server::bind(args.config)?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
        }
        ctrl_c.cancel();
    });

    server.run(shutdown).await?;
    Ok(())
}
