//! 소켓 생성
//!
//! tokio 소켓은 생성 후 브로드캐스트 외 옵션 설정이 불가하므로
//! socket2로 옵션 설정 후 변환

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};
use tracing::debug;

use crate::Config;

fn udp_socket(config: &Config) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    set_buffer_sizes(&socket, config);
    Ok(socket)
}

/// 버퍼 크기 설정 (OS 한도에 따라 실패할 수 있음, 실패해도 계속)
fn set_buffer_sizes(socket: &Socket, config: &Config) {
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        debug!("수신 버퍼 크기 설정 실패 ({} bytes): {}", config.recv_buffer_size, e);
    }
    if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
        debug!("송신 버퍼 크기 설정 실패 ({} bytes): {}", config.send_buffer_size, e);
    }
}

fn into_tokio_udp(socket: Socket) -> io::Result<UdpSocket> {
    socket.set_nonblocking(true)?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// Offer 수신용 소켓 (같은 호스트의 여러 클라이언트가 공유)
pub fn bind_discovery_socket(config: &Config) -> io::Result<UdpSocket> {
    let socket = udp_socket(config)?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.discovery_port));
    socket.bind(&SockAddr::from(addr))?;
    debug!("Discovery socket bound to {}", addr);

    into_tokio_udp(socket)
}

/// Offer 송신용 소켓
pub fn bind_broadcast_socket(config: &Config) -> io::Result<UdpSocket> {
    let socket = udp_socket(config)?;
    socket.set_broadcast(true)?;
    socket.bind(&SockAddr::from(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))))?;
    into_tokio_udp(socket)
}

/// UDP 데이터 소켓 (서버 응답 / 클라이언트 워커)
pub fn bind_udp_socket(config: &Config, port: u16) -> io::Result<UdpSocket> {
    let socket = udp_socket(config)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&SockAddr::from(addr))?;
    into_tokio_udp(socket)
}

/// TCP 리스너
pub fn bind_tcp_listener(config: &Config) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
        debug!("송신 버퍼 크기 설정 실패 ({} bytes): {}", config.send_buffer_size, e);
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.tcp_bind_port));
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(128)?;

    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ephemeral_ports_assigned() {
        let config = Config::local_test();
        let udp = bind_udp_socket(&config, 0).unwrap();
        let tcp = bind_tcp_listener(&config).unwrap();
        assert_ne!(udp.local_addr().unwrap().port(), 0);
        assert_ne!(tcp.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_oversized_buffer_request_is_tolerated() {
        let mut config = Config::local_test();
        config.recv_buffer_size = usize::MAX;
        config.send_buffer_size = usize::MAX;
        assert!(bind_udp_socket(&config, 0).is_ok());
        assert!(bind_tcp_listener(&config).is_ok());
    }

    #[tokio::test]
    async fn test_discovery_port_shared() {
        let mut config = Config::local_test();
        config.discovery_port = 0;
        let first = bind_discovery_socket(&config).unwrap();

        config.discovery_port = first.local_addr().unwrap().port();
        let second = bind_discovery_socket(&config);
        assert!(second.is_ok());
    }
}
