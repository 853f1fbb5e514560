// Copyright (c) 2012 Ian Godin. All rights reserved.
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The request handler and the per-listener serve loop.
//!
//! A listener thread pumps frames from its socket into a [`PacketQueue`];
//! a fixed pool of worker threads drains the queue, each with its own store
//! session and reply socket. Workers never share buffers: a frame is owned by
//! exactly one worker between dequeue and free.

use crate::configuration::Configuration;
use crate::format::FrameSummary;
use crate::lookup;
use crate::protocol::{
    extract_options, fill_options, Frame, MacAddr, MessageType, OpCode, ProtocolError,
    CLIENT_PORT, ETHERNET_HLEN, HWADDR_ETHER, OPT_HOSTNAME, OPT_LEASE_TIME, OPT_MESSAGE_TYPE,
    OPT_PARAMETER_REQUEST_LIST, OPT_REQUESTED_IP, OPT_SERVER_ID, SERVER_PORT,
};
use crate::queue::PacketQueue;
use crate::socket;
use crate::store::{Store, StoreError, StoreSession};
use byteorder::{BigEndian, ByteOrder};
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

/// Workers per listener.
pub const NUM_WORKERS: usize = 5;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown DHCP message type {0}")]
    UnknownMessageType(u8),
    #[error("missing DHCP message type option")]
    MissingMessageType,
}

/// The options the dispatch procedure cares about, pulled out of one walk
/// over the option region.
#[derive(Default)]
struct ScannedOptions {
    msg_type: Option<u8>,
    requested_ip: Option<Ipv4Addr>,
    server_id: Option<Ipv4Addr>,
    hostname: Option<String>,
    requested_params: BTreeSet<u8>,
}

fn scan_options(frame: &Frame) -> Result<ScannedOptions, ServerError> {
    let mut scanned = ScannedOptions::default();
    for opt in extract_options(frame) {
        match opt[0] {
            OPT_MESSAGE_TYPE => {
                if opt.len() != 3 {
                    return Err(ProtocolError::InvalidOptionLength("DHCP message type").into());
                }
                scanned.msg_type = Some(opt[2]);
            }
            OPT_REQUESTED_IP => {
                if opt.len() != 6 {
                    return Err(ProtocolError::InvalidOptionLength("requested IP").into());
                }
                scanned.requested_ip = Some(Ipv4Addr::new(opt[2], opt[3], opt[4], opt[5]));
            }
            OPT_SERVER_ID => {
                if opt.len() != 6 {
                    return Err(ProtocolError::InvalidOptionLength("server identifier").into());
                }
                scanned.server_id = Some(Ipv4Addr::new(opt[2], opt[3], opt[4], opt[5]));
            }
            OPT_HOSTNAME => {
                scanned.hostname = Some(String::from_utf8_lossy(&opt[2..]).into_owned());
            }
            OPT_PARAMETER_REQUEST_LIST => {
                scanned.requested_params.extend(opt[2..].iter().copied());
            }
            _ => {}
        }
    }
    Ok(scanned)
}

/// Processes one inbound frame and returns the reply to broadcast, if any.
pub fn handle_frame<S: StoreSession>(
    frame: &Frame,
    session: &mut S,
    queue: &PacketQueue,
    server_ip: Ipv4Addr,
) -> Result<Option<Box<Frame>>, ServerError> {
    match OpCode::try_from(frame.op()) {
        Ok(OpCode::BOOTREQUEST) => handle_client_request(frame, session, queue, server_ip),
        // We do not learn from other servers' replies.
        Ok(OpCode::BOOTREPLY) => Ok(None),
        Err(op) => {
            log::error!("Invalid BOOTP op code {}", op);
            Ok(None)
        }
    }
}

fn handle_client_request<S: StoreSession>(
    frame: &Frame,
    session: &mut S,
    queue: &PacketQueue,
    server_ip: Ipv4Addr,
) -> Result<Option<Box<Frame>>, ServerError> {
    if frame.htype() != HWADDR_ETHER {
        return Err(ProtocolError::UnsupportedHardwareType(frame.htype()).into());
    }
    if frame.hlen() != ETHERNET_HLEN {
        return Err(ProtocolError::UnsupportedHardwareLength(frame.hlen()).into());
    }
    if !frame.has_magic_cookie() {
        log::error!("Invalid DHCP magic cookie for options");
        return Ok(None);
    }

    let scanned = scan_options(frame)?;
    let mac = frame.mac();
    let msg_type = match scanned.msg_type {
        Some(n) => MessageType::try_from(n).map_err(ServerError::UnknownMessageType)?,
        None => return Err(ServerError::MissingMessageType),
    };

    match msg_type {
        MessageType::DHCPDISCOVER => {
            log::info!("Got DISCOVER from '{}'", mac);
            reply_discover(frame, &scanned, session, queue, server_ip)
        }
        MessageType::DHCPREQUEST => match scanned.server_id {
            Some(server) if server != server_ip && !server.is_unspecified() => {
                log::info!(
                    "Ignore REQUEST for server {} from '{}'",
                    lookup::display_ip(server),
                    mac
                );
                Ok(None)
            }
            _ => {
                log::info!(
                    "Got REQUEST from '{}' (for '{}' aka '{}')",
                    mac,
                    lookup::display_ip(scanned.requested_ip.unwrap_or(Ipv4Addr::UNSPECIFIED)),
                    scanned.hostname.as_deref().unwrap_or("")
                );
                reply_request(frame, &scanned, session, queue, server_ip)
            }
        },
        MessageType::DHCPRELEASE => {
            if scanned.server_id == Some(server_ip) {
                log::info!("Got RELEASE from '{}'", mac);
                session.release_lease(frame.yiaddr(), mac)?;
            }
            Ok(None)
        }
        MessageType::DHCPINFORM => {
            log::info!("Got INFORM from '{}'", mac);
            Ok(None)
        }
        MessageType::DHCPDECLINE => {
            log::info!("Got DECLINE from '{}'", mac);
            Ok(None)
        }
        other => {
            log::info!("Ignoring {} from '{}'", other, mac);
            Ok(None)
        }
    }
}

/// Picks the address to offer: the client's requested address when eligible,
/// the most specific eligible reservation otherwise.
fn choose_ip<S: StoreSession>(
    session: &mut S,
    mac: MacAddr,
    requested: Option<Ipv4Addr>,
) -> Result<Option<Ipv4Addr>, ServerError> {
    let ips = session.get_ips(mac, true)?;
    if ips.is_empty() {
        log::info!("Unable to offer an address to '{}'", mac);
        return Ok(None);
    }
    Ok(Some(match requested {
        Some(ip) if ips.contains(&ip) => ip,
        _ => ips[0],
    }))
}

struct GatheredOptions {
    /// Requested template options plus the hostname, sorted by raw bytes.
    options: Vec<Vec<u8>>,
    lease: Option<Vec<u8>>,
    server: Vec<u8>,
}

/// Collects the templated options for `ip`, holding the lease time and
/// server identifier aside and restricting the rest to the client's
/// parameter request list. A hostname comes from the templates or, failing
/// that, from a reverse lookup of the address.
fn gather_reply_options<S: StoreSession>(
    session: &mut S,
    ip: Ipv4Addr,
    requested: &BTreeSet<u8>,
    server_ip: Ipv4Addr,
) -> Result<GatheredOptions, ServerError> {
    let mut hostname = None;
    let mut lease = None;
    let mut server = None;
    let mut options = Vec::new();

    for opt in session.get_options(ip)? {
        if opt.is_empty() {
            continue;
        }
        match opt[0] {
            OPT_HOSTNAME => hostname = Some(opt),
            OPT_LEASE_TIME => lease = Some(opt),
            OPT_SERVER_ID => server = Some(opt),
            tag if requested.contains(&tag) => options.push(opt),
            _ => {}
        }
    }

    match hostname {
        Some(opt) => options.push(opt),
        None => {
            if let Some(name) = lookup::hostname_for(ip) {
                let mut opt = vec![OPT_HOSTNAME, name.len() as u8];
                opt.extend_from_slice(name.as_bytes());
                options.push(opt);
            }
        }
    }
    options.sort();

    let server = server.unwrap_or_else(|| {
        let mut opt = vec![OPT_SERVER_ID, 4];
        opt.extend_from_slice(&server_ip.octets());
        opt
    });

    Ok(GatheredOptions { options, lease, server })
}

fn msg_type_option(msg_type: MessageType) -> Vec<u8> {
    vec![OPT_MESSAGE_TYPE, 1, msg_type.into()]
}

fn compose_reply(queue: &PacketQueue, inbound: &Frame, yiaddr: Ipv4Addr) -> Box<Frame> {
    let mut reply = queue.alloc();
    reply.set_op(OpCode::BOOTREPLY);
    reply.set_htype(inbound.htype());
    reply.set_hlen(inbound.hlen());
    reply.set_xid(inbound.xid());
    reply.set_chaddr(inbound.chaddr());
    reply.set_yiaddr(yiaddr);
    reply
}

fn reply_discover<S: StoreSession>(
    inbound: &Frame,
    scanned: &ScannedOptions,
    session: &mut S,
    queue: &PacketQueue,
    server_ip: Ipv4Addr,
) -> Result<Option<Box<Frame>>, ServerError> {
    let mac = inbound.mac();
    let ip = match choose_ip(session, mac, scanned.requested_ip)? {
        Some(ip) => ip,
        None => return Ok(None),
    };

    let gathered = gather_reply_options(session, ip, &scanned.requested_params, server_ip)?;
    let mut options = gathered.options;
    if let Some(lease) = gathered.lease {
        options.insert(0, lease);
    }
    options.insert(0, gathered.server);
    options.insert(0, msg_type_option(MessageType::DHCPOFFER));

    let mut reply = compose_reply(queue, inbound, ip);
    if let Err(e) = fill_options(&mut reply, &options) {
        queue.free(reply);
        return Err(e.into());
    }
    log::info!("Offered {} to '{}'", ip, mac);
    Ok(Some(reply))
}

fn reply_request<S: StoreSession>(
    inbound: &Frame,
    scanned: &ScannedOptions,
    session: &mut S,
    queue: &PacketQueue,
    server_ip: Ipv4Addr,
) -> Result<Option<Box<Frame>>, ServerError> {
    let mac = inbound.mac();
    let ip = match choose_ip(session, mac, scanned.requested_ip)? {
        Some(ip) => ip,
        None => return Ok(None),
    };

    let gathered = gather_reply_options(session, ip, &scanned.requested_params, server_ip)?;
    let mut options = gathered.options;
    let mut lease_time = 0u32;
    if let Some(lease) = gathered.lease {
        if lease.len() == 6 {
            lease_time = BigEndian::read_u32(&lease[2..6]);
            options.insert(0, lease);
        }
    }
    options.insert(0, gathered.server.clone());

    let leased = match session.acquire_lease(ip, mac, lease_time) {
        Ok(granted) => granted,
        Err(e) => {
            log::error!("Acquire lease: {}", e);
            false
        }
    };
    if leased {
        options.insert(0, msg_type_option(MessageType::DHCPACK));
    } else {
        options = vec![msg_type_option(MessageType::DHCPNAK), gathered.server];
    }

    let mut reply = compose_reply(queue, inbound, ip);
    if let Err(e) = fill_options(&mut reply, &options) {
        queue.free(reply);
        return Err(e.into());
    }
    if leased {
        log::info!("Leased {} to '{}'", lookup::display_ip(ip), mac);
    } else {
        log::info!("Refused {} to '{}'", lookup::display_ip(ip), mac);
    }
    Ok(Some(reply))
}

/// One worker: acquires a store session and a reply socket, then drains the
/// queue until the shutdown sentinel. No per-frame failure escapes the loop.
fn worker<S: Store>(
    store: &S,
    queue: &PacketQueue,
    server_ip: Ipv4Addr,
    config: &Configuration,
) -> Result<(), ServerError> {
    let mut session = store.start_session()?;
    let reply_sock = socket::bind_reply(server_ip, SERVER_PORT)?;
    let testing = config.testing();
    if testing {
        log::info!("Testing mode");
    }

    while let Some(frame) = queue.wait() {
        if testing {
            println!("Packet:\n{}", FrameSummary::new(&frame, config.grammar()));
        } else {
            match handle_frame(&frame, &mut session, queue, server_ip) {
                Ok(Some(reply)) => {
                    if let Err(e) =
                        socket::send_frame(&reply_sock, Ipv4Addr::BROADCAST, CLIENT_PORT, &reply)
                    {
                        log::error!("Error sending reply: {}", e);
                    }
                    queue.free(reply);
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("Error processing packet {:#010x}: {}", frame.xid(), e)
                }
            }
        }
        queue.free(frame);
    }
    Ok(())
}

/// Runs one listener: binds `listen_ip:67`, spawns the worker pool, and
/// pumps received frames into the queue. Replies carry `server_ip` as the
/// server identifier.
pub fn serve<S: Store + 'static>(
    listen_ip: Ipv4Addr,
    server_ip: Ipv4Addr,
    store: Arc<S>,
    config: Arc<Configuration>,
) -> Result<(), ServerError> {
    log::info!("DHCP server started on {}", lookup::display_ip(listen_ip));

    let socket = socket::bind_listener(listen_ip, SERVER_PORT)?;
    let queue = Arc::new(PacketQueue::new());
    let mut workers = Vec::with_capacity(NUM_WORKERS);
    for _ in 0..NUM_WORKERS {
        let store = Arc::clone(&store);
        let queue = Arc::clone(&queue);
        let config = Arc::clone(&config);
        workers.push(thread::spawn(move || {
            if let Err(e) = worker(&*store, &queue, server_ip, &config) {
                log::error!("Thread couldn't start properly: {}", e);
            }
        }));
    }

    pump(&socket, &queue);

    for _ in &workers {
        queue.push_sentinel();
    }
    for w in workers {
        let _ = w.join();
    }
    Ok(())
}

fn pump(socket: &UdpSocket, queue: &PacketQueue) {
    loop {
        let mut frame = queue.alloc();
        match socket::recv_frame(socket, &mut frame) {
            Ok(_) => queue.queue(frame),
            Err(e) => {
                log::debug!("recv failed: {}", e);
                queue.free(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OPT_END;
    use crate::store::MemoryStore;

    fn mac(last: u8) -> MacAddr {
        MacAddr { octets: [0x00, 0x11, 0x22, 0x33, 0x44, last] }
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 0, 2, last)
    }

    fn server_ip() -> Ipv4Addr {
        Ipv4Addr::new(192, 0, 2, 1)
    }

    fn opt(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut blob = vec![tag, payload.len() as u8];
        blob.extend_from_slice(payload);
        blob
    }

    fn client_frame(msg_type: MessageType, mac: MacAddr, extra: &[Vec<u8>]) -> Box<Frame> {
        let mut frame = Box::new(Frame::new());
        frame.set_op(OpCode::BOOTREQUEST);
        frame.set_htype(HWADDR_ETHER);
        frame.set_hlen(ETHERNET_HLEN);
        frame.set_xid(0x11223344);
        frame.set_chaddr(&mac.octets);
        let mut opts = vec![msg_type_option(msg_type)];
        opts.extend_from_slice(extra);
        fill_options(&mut frame, &opts).expect("test options fit");
        frame
    }

    // Reservation for `mac` on 192.0.2.10 with a 900 second lease-time
    // template and hostname, subnet, and router templates on the /24.
    fn populated_store(mac: MacAddr) -> MemoryStore {
        let store = MemoryStore::new();
        let mut admin = store.start_session().expect("memory sessions are infallible");
        admin.add_host(ip(10), mac).unwrap();
        admin.add_option(ip(0), ip(255), &opt(51, &[0, 0, 3, 132]), false).unwrap();
        admin.add_option(ip(0), ip(255), &opt(1, &[255, 255, 255, 0]), false).unwrap();
        admin.add_option(ip(0), ip(255), &opt(3, &server_ip().octets()), false).unwrap();
        admin.add_option(ip(0), ip(255), &opt(12, b"host"), false).unwrap();
        store
    }

    #[test]
    fn test_discover_offers_reserved_address_with_templated_options() {
        let client = mac(0x55);
        let store = populated_store(client);
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let frame =
            client_frame(MessageType::DHCPDISCOVER, client, &[opt(55, &[1, 3, 51])]);

        let reply = handle_frame(&frame, &mut session, &queue, server_ip())
            .expect("discover must not fail")
            .expect("an offer is due");

        assert_eq!(reply.op(), u8::from(OpCode::BOOTREPLY));
        assert_eq!(reply.yiaddr(), ip(10));
        assert_eq!(reply.xid(), frame.xid());
        assert_eq!(reply.mac(), client);

        let opts = extract_options(&reply);
        assert_eq!(
            opts,
            vec![
                opt(53, &[u8::from(MessageType::DHCPOFFER)]),
                opt(54, &server_ip().octets()),
                opt(51, &[0, 0, 3, 132]),
                opt(1, &[255, 255, 255, 0]),
                opt(3, &server_ip().octets()),
                opt(12, b"host"),
            ]
        );
    }

    #[test]
    fn test_offer_options_all_requested_or_mandatory() {
        let client = mac(0x55);
        let store = populated_store(client);
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let requested = [1u8, 3];
        let frame = client_frame(MessageType::DHCPDISCOVER, client, &[opt(55, &requested)]);

        let reply = handle_frame(&frame, &mut session, &queue, server_ip())
            .unwrap()
            .expect("an offer is due");
        for o in extract_options(&reply) {
            assert!(
                requested.contains(&o[0]) || [53, 54, 51, 12].contains(&o[0]),
                "unsolicited option {}",
                o[0]
            );
        }
    }

    #[test]
    fn test_reply_option_region_ends_with_end_marker() {
        let client = mac(0x55);
        let store = populated_store(client);
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let frame = client_frame(MessageType::DHCPDISCOVER, client, &[]);

        let reply = handle_frame(&frame, &mut session, &queue, server_ip())
            .unwrap()
            .expect("an offer is due");
        assert!(reply.options().contains(&OPT_END));
    }

    #[test]
    fn test_discover_prefers_requested_address_when_eligible() {
        let client = mac(0x55);
        let store = populated_store(client);
        let mut admin = store.start_session().unwrap();
        admin.add_host(ip(20), client).unwrap();
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let frame = client_frame(
            MessageType::DHCPDISCOVER,
            client,
            &[opt(50, &ip(20).octets())],
        );

        let reply = handle_frame(&frame, &mut session, &queue, server_ip())
            .unwrap()
            .expect("an offer is due");
        assert_eq!(reply.yiaddr(), ip(20));
    }

    #[test]
    fn test_discover_falls_back_to_first_eligible_address() {
        let client = mac(0x55);
        let store = populated_store(client);
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        // 192.0.2.99 is not reserved for this client.
        let frame = client_frame(
            MessageType::DHCPDISCOVER,
            client,
            &[opt(50, &ip(99).octets())],
        );

        let reply = handle_frame(&frame, &mut session, &queue, server_ip())
            .unwrap()
            .expect("an offer is due");
        assert_eq!(reply.yiaddr(), ip(10));
    }

    #[test]
    fn test_discover_without_reservation_sends_nothing() {
        let store = MemoryStore::new();
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let frame = client_frame(MessageType::DHCPDISCOVER, mac(0x55), &[]);

        let reply = handle_frame(&frame, &mut session, &queue, server_ip()).unwrap();
        assert!(reply.is_none());
    }

    #[test]
    fn test_request_acquires_lease_and_acks() {
        let client = mac(0x55);
        let store = populated_store(client);
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let frame = client_frame(
            MessageType::DHCPREQUEST,
            client,
            &[opt(50, &ip(10).octets()), opt(54, &server_ip().octets())],
        );

        let reply = handle_frame(&frame, &mut session, &queue, server_ip())
            .unwrap()
            .expect("an ack is due");
        let opts = extract_options(&reply);
        assert_eq!(opts[0], opt(53, &[u8::from(MessageType::DHCPACK)]));
        assert_eq!(opts[1], opt(54, &server_ip().octets()));
        assert_eq!(opts[2], opt(51, &[0, 0, 3, 132]));
        assert_eq!(store.lease_holder(ip(10)), Some(client));
    }

    // A session whose reservation view predates another client's lease, as
    // happens when two workers race for the same address. The acquire step
    // is the arbiter and must refuse the loser.
    struct StaleSession {
        inner: <MemoryStore as Store>::Session,
    }

    impl StoreSession for StaleSession {
        fn get_ips(
            &mut self,
            mac: MacAddr,
            _available_only: bool,
        ) -> Result<Vec<Ipv4Addr>, StoreError> {
            self.inner.get_ips(mac, false)
        }

        fn get_options(&mut self, ip: Ipv4Addr) -> Result<Vec<Vec<u8>>, StoreError> {
            self.inner.get_options(ip)
        }

        fn add_host(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Result<(), StoreError> {
            self.inner.add_host(ip, mac)
        }

        fn remove_host(&mut self, ip: Ipv4Addr) -> Result<(), StoreError> {
            self.inner.remove_host(ip)
        }

        fn add_option(
            &mut self,
            lo: Ipv4Addr,
            hi: Ipv4Addr,
            blob: &[u8],
            replace: bool,
        ) -> Result<(), StoreError> {
            self.inner.add_option(lo, hi, blob, replace)
        }

        fn remove_option(
            &mut self,
            lo: Ipv4Addr,
            hi: Ipv4Addr,
            blob: &[u8],
        ) -> Result<(), StoreError> {
            self.inner.remove_option(lo, hi, blob)
        }

        fn get_all_hosts(&mut self) -> Result<Vec<(Ipv4Addr, MacAddr)>, StoreError> {
            self.inner.get_all_hosts()
        }

        fn get_all_options(
            &mut self,
        ) -> Result<Vec<(Ipv4Addr, Ipv4Addr, Vec<u8>)>, StoreError> {
            self.inner.get_all_options()
        }

        fn get_all_leases(&mut self) -> Result<Vec<crate::store::Lease>, StoreError> {
            self.inner.get_all_leases()
        }

        fn acquire_lease(
            &mut self,
            ip: Ipv4Addr,
            mac: MacAddr,
            seconds: u32,
        ) -> Result<bool, StoreError> {
            self.inner.acquire_lease(ip, mac, seconds)
        }

        fn release_lease(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Result<bool, StoreError> {
            self.inner.release_lease(ip, mac)
        }
    }

    #[test]
    fn test_request_losing_the_lease_race_gets_a_nak() {
        let loser = mac(0x66);
        let winner = mac(0x55);
        let store = populated_store(loser);
        let mut admin = store.start_session().unwrap();
        assert!(admin.acquire_lease(ip(10), winner, 900).unwrap());

        let mut session = StaleSession { inner: store.start_session().unwrap() };
        let queue = PacketQueue::new();
        let frame = client_frame(
            MessageType::DHCPREQUEST,
            loser,
            &[opt(50, &ip(10).octets()), opt(54, &server_ip().octets())],
        );

        let reply = handle_frame(&frame, &mut session, &queue, server_ip())
            .unwrap()
            .expect("a nak is due");
        let opts = extract_options(&reply);
        assert_eq!(
            opts,
            vec![
                opt(53, &[u8::from(MessageType::DHCPNAK)]),
                opt(54, &server_ip().octets()),
            ]
        );
        // The established lease is untouched.
        assert_eq!(store.lease_holder(ip(10)), Some(winner));
    }

    #[test]
    fn test_request_for_another_server_is_ignored() {
        let client = mac(0x55);
        let store = populated_store(client);
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let other_server = Ipv4Addr::new(198, 51, 100, 1);
        let frame = client_frame(
            MessageType::DHCPREQUEST,
            client,
            &[opt(50, &ip(10).octets()), opt(54, &other_server.octets())],
        );

        let reply = handle_frame(&frame, &mut session, &queue, server_ip()).unwrap();
        assert!(reply.is_none());
        assert_eq!(store.lease_holder(ip(10)), None);
    }

    #[test]
    fn test_release_with_matching_server_id_deletes_the_lease() {
        let client = mac(0x55);
        let store = populated_store(client);
        let mut admin = store.start_session().unwrap();
        assert!(admin.acquire_lease(ip(10), client, 900).unwrap());

        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let mut frame = client_frame(
            MessageType::DHCPRELEASE,
            client,
            &[opt(54, &server_ip().octets())],
        );
        frame.set_yiaddr(ip(10));

        let reply = handle_frame(&frame, &mut session, &queue, server_ip()).unwrap();
        assert!(reply.is_none());
        assert_eq!(store.lease_holder(ip(10)), None);
    }

    #[test]
    fn test_release_for_another_server_keeps_the_lease() {
        let client = mac(0x55);
        let store = populated_store(client);
        let mut admin = store.start_session().unwrap();
        assert!(admin.acquire_lease(ip(10), client, 900).unwrap());

        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let mut frame = client_frame(
            MessageType::DHCPRELEASE,
            client,
            &[opt(54, &Ipv4Addr::new(198, 51, 100, 1).octets())],
        );
        frame.set_yiaddr(ip(10));

        let reply = handle_frame(&frame, &mut session, &queue, server_ip()).unwrap();
        assert!(reply.is_none());
        assert_eq!(store.lease_holder(ip(10)), Some(client));
    }

    #[test]
    fn test_reply_frames_are_ignored() {
        let store = MemoryStore::new();
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let mut frame = client_frame(MessageType::DHCPOFFER, mac(0x55), &[]);
        frame.set_op(OpCode::BOOTREPLY);

        let reply = handle_frame(&frame, &mut session, &queue, server_ip()).unwrap();
        assert!(reply.is_none());
    }

    #[test]
    fn test_non_ethernet_hardware_is_rejected() {
        let store = MemoryStore::new();
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let mut frame = client_frame(MessageType::DHCPDISCOVER, mac(0x55), &[]);
        frame.set_htype(crate::protocol::HWADDR_FDDI);

        let result = handle_frame(&frame, &mut session, &queue, server_ip());
        assert!(matches!(
            result,
            Err(ServerError::Protocol(ProtocolError::UnsupportedHardwareType(_)))
        ));
    }

    #[test]
    fn test_short_hardware_address_is_rejected() {
        let store = MemoryStore::new();
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let mut frame = client_frame(MessageType::DHCPDISCOVER, mac(0x55), &[]);
        frame.set_hlen(4);

        let result = handle_frame(&frame, &mut session, &queue, server_ip());
        assert!(matches!(
            result,
            Err(ServerError::Protocol(ProtocolError::UnsupportedHardwareLength(4)))
        ));
    }

    #[test]
    fn test_missing_magic_cookie_drops_the_frame() {
        let store = MemoryStore::new();
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let mut frame = Box::new(Frame::new());
        frame.set_op(OpCode::BOOTREQUEST);
        frame.set_htype(HWADDR_ETHER);
        frame.set_hlen(ETHERNET_HLEN);

        let reply = handle_frame(&frame, &mut session, &queue, server_ip()).unwrap();
        assert!(reply.is_none());
    }

    #[test]
    fn test_malformed_message_type_length_is_an_error() {
        let store = MemoryStore::new();
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let mut frame = Box::new(Frame::new());
        frame.set_op(OpCode::BOOTREQUEST);
        frame.set_htype(HWADDR_ETHER);
        frame.set_hlen(ETHERNET_HLEN);
        fill_options(&mut frame, &[vec![53, 2, 1, 1]]).expect("test options fit");

        let result = handle_frame(&frame, &mut session, &queue, server_ip());
        assert!(matches!(
            result,
            Err(ServerError::Protocol(ProtocolError::InvalidOptionLength(_)))
        ));
    }

    #[test]
    fn test_unknown_message_type_is_an_error() {
        let store = MemoryStore::new();
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let frame = client_frame(MessageType::DHCPDISCOVER, mac(0x55), &[]);
        let mut raw = Box::new(Frame::new());
        raw.as_bytes_mut().copy_from_slice(frame.as_bytes());
        // Overwrite the message type value inside the option region.
        raw.options_mut()[6] = 9;

        let result = handle_frame(&raw, &mut session, &queue, server_ip());
        assert!(matches!(result, Err(ServerError::UnknownMessageType(9))));
    }

    #[test]
    fn test_inform_is_dropped_without_reply() {
        let client = mac(0x55);
        let store = populated_store(client);
        let mut session = store.start_session().unwrap();
        let queue = PacketQueue::new();
        let frame = client_frame(MessageType::DHCPINFORM, client, &[]);

        let reply = handle_frame(&frame, &mut session, &queue, server_ip()).unwrap();
        assert!(reply.is_none());
    }
}
