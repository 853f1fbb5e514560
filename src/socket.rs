// Copyright (c) 2012 Ian Godin. All rights reserved.
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! UDP socket construction and frame transfer.
//!
//! Listeners and reply sockets both bind the server port, so every bound
//! socket sets `SO_REUSEADDR`; reply sockets additionally enable
//! `SO_BROADCAST`. Outbound frames are trimmed of trailing zero bytes, never
//! below the fixed header and cookie.

use crate::protocol::{Frame, FRAME_LEN, OPTIONS_LEN};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

// The fixed header plus the magic cookie.
const MIN_SEND_LEN: usize = FRAME_LEN - OPTIONS_LEN + 4;

/// Binds the receive socket for a listener.
pub fn bind_listener(addr: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    new_socket(addr, port, false)
}

/// Binds a broadcast-capable reply socket.
pub fn bind_reply(addr: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    new_socket(addr, port, true)
}

fn new_socket(addr: Ipv4Addr, port: u16, broadcast: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if port > 0 {
        socket.set_reuse_address(true)?;
    }
    if broadcast {
        socket.set_broadcast(true)?;
    }
    if port != 0 {
        let bind_addr: SocketAddr = SocketAddrV4::new(addr, port).into();
        socket.bind(&bind_addr.into())?;
    }
    Ok(socket.into())
}

/// Receives one datagram into `frame`, returning the byte count.
pub fn recv_frame(socket: &UdpSocket, frame: &mut Frame) -> io::Result<usize> {
    socket.recv(frame.as_bytes_mut())
}

/// Sends `frame` to `dest:port`, trailing zero bytes trimmed.
pub fn send_frame(
    socket: &UdpSocket,
    dest: Ipv4Addr,
    port: u16,
    frame: &Frame,
) -> io::Result<()> {
    let bytes = frame.as_bytes();
    let mut end = bytes.len();
    while end > MIN_SEND_LEN && bytes[end - 1] == 0 {
        end -= 1;
    }
    socket.send_to(&bytes[..end], SocketAddrV4::new(dest, port))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{fill_options, OpCode};

    #[test]
    fn test_send_frame_trims_trailing_zeros() {
        // Port zero leaves the sender unbound until the first send.
        let sender = bind_reply(Ipv4Addr::LOCALHOST, 0).expect("unbound sender");
        let receiver =
            UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).expect("ephemeral receiver");
        let dest = match receiver.local_addr().expect("local addr") {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => panic!("bound an IPv4 socket"),
        };

        let mut frame = Frame::new();
        frame.set_op(OpCode::BOOTREQUEST);
        fill_options(&mut frame, &[vec![53, 1, 1]]).expect("options fit");
        send_frame(&sender, *dest.ip(), dest.port(), &frame).expect("send");

        let mut buf = [0u8; FRAME_LEN + 16];
        let (n, _) = receiver.recv_from(&mut buf).expect("recv");
        // Header, cookie, one option, end marker; the zero tail stays home.
        assert_eq!(n, MIN_SEND_LEN + 4);
        assert_eq!(buf[n - 1], 255);
    }

    #[test]
    fn test_listener_and_reply_socket_share_a_port() {
        let port = {
            let probe =
                UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).expect("ephemeral probe");
            match probe.local_addr().expect("local addr") {
                SocketAddr::V4(v4) => v4.port(),
                SocketAddr::V6(_) => panic!("bound an IPv4 socket"),
            }
        };

        let _listener =
            bind_listener(Ipv4Addr::LOCALHOST, port).expect("listener binds");
        bind_reply(Ipv4Addr::LOCALHOST, port).expect("reply socket binds alongside");
    }
}
