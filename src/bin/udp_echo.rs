use std::env;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::process;

use qsp::session::{Mode, SessionBuilder};
use qsp::transport::{Clock, SystemClock, Transport};

const CONV: u32 = 0xaabbccdd;
const LISTEN_ADDR: &str = "0.0.0.0:8989";
const CONNECT_ADDR: &str = "127.0.0.1:8989";
const MODE: Mode = Mode::Weak;
const ROUNDS: u32 = 10_000;
const RECV_BUF_LEN: usize = 64 * 1024;

struct UdpLink {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl Transport for UdpLink {
    fn input(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.socket.recv_from(buf) {
            Ok((size, addr)) => {
                // keep talking to whoever spoke last
                self.peer = Some(addr);
                Ok(size)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn output(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.peer {
            Some(addr) => self.socket.send_to(buf, addr),
            None => Ok(0),
        }
    }
}

fn main() {
    match env::args().nth(1).as_deref() {
        Some("server") => server(),
        Some("client") => client(),
        _ => {
            eprintln!("usage: udp_echo <server|client>");
            process::exit(2);
        }
    }
}

fn server() {
    let socket = UdpSocket::bind(LISTEN_ADDR).unwrap();
    socket.set_nonblocking(true).unwrap();
    println!("listening on {}", socket.local_addr().unwrap());

    let link = UdpLink { socket, peer: None };
    let mut builder = SessionBuilder::new(CONV, link, SystemClock::new());
    builder.mode = MODE;
    let mut session = builder.build().unwrap();

    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        match session.recv(&mut buf) {
            Ok(size) => {
                let id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
                println!("[recv] id = {}, len = {}", id, size);
                if let Err(e) = session.send(&buf[..size]) {
                    eprintln!("[send] error: {}", e);
                }
            }
            Err(e) => eprintln!("[recv] error: {}", e),
        }
    }
}

fn client() {
    let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
    socket.set_nonblocking(true).unwrap();
    let peer: SocketAddr = CONNECT_ADDR.parse().unwrap();

    let link = UdpLink {
        socket,
        peer: Some(peer),
    };
    let mut builder = SessionBuilder::new(CONV, link, SystemClock::new());
    builder.mode = MODE;
    let mut session = builder.build().unwrap();

    let mut clock = SystemClock::new();
    let mut buf = vec![0u8; RECV_BUF_LEN];
    for id in 1..=ROUNDS {
        let mut payload = [0u8; 8];
        payload[0..4].copy_from_slice(&id.to_le_bytes());
        payload[4..8].copy_from_slice(&clock.now_ms().to_le_bytes());

        session.send(&payload).unwrap();
        let size = session.recv(&mut buf).unwrap();
        assert_eq!(size, payload.len());

        let echo_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let sent_at = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        println!(
            "[echo] id = {}, rtt = {} ms",
            echo_id,
            clock.now_ms().wrapping_sub(sent_at)
        );
    }
    println!("{:?}", session.stat());
}
