use std::net::{SocketAddr, TcpListener};

/// Gets a new socket address allocated by the OS.
///
/// Used to give test grid members distinct public addresses.
pub fn get_unused_addr() -> SocketAddr {
    let socket = TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}
