// Copyright (c) 2012 Ian Godin. All rights reserved.
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Wire format for BOOTP/DHCP frames as defined in RFC 951 / RFC 2131.
//!
//! A [`Frame`] is the fixed 236-byte header followed by the 312-byte option
//! region, kept in wire layout so that a frame can be received into and sent
//! from the same buffer. Typed accessors cover the header fields;
//! [`extract_options`] and [`fill_options`] walk and build the option region.

use crate::lookup;
use byteorder::{BigEndian, ByteOrder};
use num_derive::FromPrimitive;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

const OP_IDX: usize = 0;
const HTYPE_IDX: usize = 1;
const HLEN_IDX: usize = 2;
const HOPS_IDX: usize = 3;
const XID_IDX: usize = 4;
const SECS_IDX: usize = 8;
const FLAGS_IDX: usize = 10;
const CIADDR_IDX: usize = 12;
const YIADDR_IDX: usize = 16;
const SIADDR_IDX: usize = 20;
const GIADDR_IDX: usize = 24;
const CHADDR_IDX: usize = 28;
const SNAME_IDX: usize = 44;
const FILE_IDX: usize = 108;
const OPTIONS_START_IDX: usize = 236;

const CHADDR_LEN: usize = 16;
const FILE_LEN: usize = 128;

/// Size of the option region, magic cookie included.
pub const OPTIONS_LEN: usize = 312;
/// Size of a whole frame on the wire.
pub const FRAME_LEN: usize = OPTIONS_START_IDX + OPTIONS_LEN;

const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

pub const HWADDR_ETHER: u8 = 1;
pub const HWADDR_IEEE802: u8 = 6;
pub const HWADDR_FDDI: u8 = 8;

pub const ETHERNET_HLEN: u8 = 6;

// Option codes consumed by the request handler. Every other code is only
// meaningful through the option grammar.
pub const OPT_PAD: u8 = 0;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MESSAGE_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAMETER_REQUEST_LIST: u8 = 55;
pub const OPT_TFTP_SERVER: u8 = 66;
pub const OPT_BOOT_FILE: u8 = 67;
pub const OPT_END: u8 = 255;

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("can only handle ethernet hardware addresses, got type {0}")]
    UnsupportedHardwareType(u8),
    #[error("expected a 6 byte hardware address, got {0}")]
    UnsupportedHardwareLength(u8),
    #[error("invalid {0} option length")]
    InvalidOptionLength(&'static str),
    #[error("option region overflow: {0} bytes")]
    OptionOverflow(usize),
    #[error("invalid hardware address '{0}'")]
    BadMacAddr(String),
    #[error("cannot resolve TFTP server name '{0}'")]
    UnresolvableServerName(String),
}

/// A BOOTP op code, the first byte of every frame.
#[derive(FromPrimitive, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum OpCode {
    BOOTREQUEST = 1,
    BOOTREPLY = 2,
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        <Self as num_traits::FromPrimitive>::from_u8(n).ok_or(n)
    }
}

/// A DHCP message type, the value of option 53.
#[derive(FromPrimitive, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum MessageType {
    DHCPDISCOVER = 1,
    DHCPOFFER = 2,
    DHCPREQUEST = 3,
    DHCPDECLINE = 4,
    DHCPACK = 5,
    DHCPNAK = 6,
    DHCPRELEASE = 7,
    DHCPINFORM = 8,
    DHCPLEASEQUERY = 10,
    DHCPLEASEUNASSIGNED = 11,
    DHCPLEASEUNKNOWN = 12,
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        <Self as num_traits::FromPrimitive>::from_u8(n).ok_or(n)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self, f)
    }
}

/// An ethernet hardware address.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MacAddr {
    pub octets: [u8; 6],
}

impl MacAddr {
    /// The all-zero address used by wildcard host reservations.
    pub const WILDCARD: MacAddr = MacAddr { octets: [0; 6] };

    pub fn is_wildcard(&self) -> bool {
        self.octets == [0; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.octets;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| ProtocolError::BadMacAddr(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| ProtocolError::BadMacAddr(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ProtocolError::BadMacAddr(s.to_string()));
        }
        Ok(MacAddr { octets })
    }
}

/// A BOOTP/DHCP frame in wire layout.
pub struct Frame {
    buf: [u8; FRAME_LEN],
}

impl Default for Frame {
    fn default() -> Self {
        Frame::new()
    }
}

impl Frame {
    pub fn new() -> Self {
        Frame { buf: [0; FRAME_LEN] }
    }

    pub fn zero(&mut self) {
        self.buf = [0; FRAME_LEN];
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn op(&self) -> u8 {
        self.buf[OP_IDX]
    }

    pub fn set_op(&mut self, op: OpCode) {
        self.buf[OP_IDX] = op.into();
    }

    pub fn htype(&self) -> u8 {
        self.buf[HTYPE_IDX]
    }

    pub fn set_htype(&mut self, htype: u8) {
        self.buf[HTYPE_IDX] = htype;
    }

    pub fn hlen(&self) -> u8 {
        self.buf[HLEN_IDX]
    }

    pub fn set_hlen(&mut self, hlen: u8) {
        self.buf[HLEN_IDX] = hlen;
    }

    pub fn hops(&self) -> u8 {
        self.buf[HOPS_IDX]
    }

    pub fn xid(&self) -> u32 {
        BigEndian::read_u32(&self.buf[XID_IDX..SECS_IDX])
    }

    pub fn set_xid(&mut self, xid: u32) {
        BigEndian::write_u32(&mut self.buf[XID_IDX..SECS_IDX], xid);
    }

    pub fn secs(&self) -> u16 {
        BigEndian::read_u16(&self.buf[SECS_IDX..FLAGS_IDX])
    }

    pub fn flags(&self) -> u16 {
        BigEndian::read_u16(&self.buf[FLAGS_IDX..CIADDR_IDX])
    }

    pub fn ciaddr(&self) -> Ipv4Addr {
        self.addr_at(CIADDR_IDX)
    }

    pub fn yiaddr(&self) -> Ipv4Addr {
        self.addr_at(YIADDR_IDX)
    }

    pub fn set_yiaddr(&mut self, addr: Ipv4Addr) {
        self.buf[YIADDR_IDX..YIADDR_IDX + 4].copy_from_slice(&addr.octets());
    }

    pub fn siaddr(&self) -> Ipv4Addr {
        self.addr_at(SIADDR_IDX)
    }

    pub fn set_siaddr(&mut self, addr: Ipv4Addr) {
        self.buf[SIADDR_IDX..SIADDR_IDX + 4].copy_from_slice(&addr.octets());
    }

    pub fn giaddr(&self) -> Ipv4Addr {
        self.addr_at(GIADDR_IDX)
    }

    fn addr_at(&self, idx: usize) -> Ipv4Addr {
        Ipv4Addr::new(self.buf[idx], self.buf[idx + 1], self.buf[idx + 2], self.buf[idx + 3])
    }

    /// The full 16-byte client hardware address field.
    pub fn chaddr(&self) -> &[u8] {
        &self.buf[CHADDR_IDX..CHADDR_IDX + CHADDR_LEN]
    }

    pub fn set_chaddr(&mut self, chaddr: &[u8]) {
        let n = chaddr.len().min(CHADDR_LEN);
        self.buf[CHADDR_IDX..CHADDR_IDX + n].copy_from_slice(&chaddr[..n]);
    }

    /// The valid prefix of `chaddr`, `hlen` bytes long.
    pub fn hwaddr(&self) -> &[u8] {
        let n = (self.hlen() as usize).min(CHADDR_LEN);
        &self.buf[CHADDR_IDX..CHADDR_IDX + n]
    }

    /// The client hardware address as an ethernet MAC.
    pub fn mac(&self) -> MacAddr {
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&self.buf[CHADDR_IDX..CHADDR_IDX + 6]);
        MacAddr { octets }
    }

    pub fn sname(&self) -> String {
        cstr_field(&self.buf[SNAME_IDX..FILE_IDX])
    }

    pub fn file(&self) -> String {
        cstr_field(&self.buf[FILE_IDX..OPTIONS_START_IDX])
    }

    pub fn set_file(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(FILE_LEN - 1);
        self.buf[FILE_IDX..FILE_IDX + n].copy_from_slice(&bytes[..n]);
        self.buf[FILE_IDX + n] = 0;
    }

    pub fn options(&self) -> &[u8] {
        &self.buf[OPTIONS_START_IDX..]
    }

    pub fn options_mut(&mut self) -> &mut [u8] {
        &mut self.buf[OPTIONS_START_IDX..]
    }

    pub fn has_magic_cookie(&self) -> bool {
        self.options()[..4] == MAGIC_COOKIE
    }
}

fn cstr_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Walks the option region of `frame` and returns one raw blob per option,
/// each spanning its type byte, length byte, and payload.
///
/// Padding is skipped and the walk stops at the end marker, at the end of the
/// region, or at an option whose declared length would run past the region.
/// A missing magic cookie yields no options.
pub fn extract_options(frame: &Frame) -> Vec<Vec<u8>> {
    let options = frame.options();
    if !frame.has_magic_cookie() {
        log::warn!("Invalid DHCP magic cookie for options");
        return Vec::new();
    }

    let mut opts = Vec::new();
    let mut i = MAGIC_COOKIE.len();
    while i < OPTIONS_LEN {
        match options[i] {
            OPT_PAD => i += 1,
            OPT_END => break,
            _ => {
                if i + 1 >= OPTIONS_LEN {
                    break;
                }
                let end = i + 2 + options[i + 1] as usize;
                if end > OPTIONS_LEN {
                    break;
                }
                opts.push(options[i..end].to_vec());
                i = end;
            }
        }
    }
    opts
}

/// Writes `opts` into the option region of `frame` behind the magic cookie
/// and terminates the region with an end marker.
///
/// Two options never land in the region itself: a TFTP server name (66) is
/// resolved and stored in `siaddr`, and a boot file name (67) is copied into
/// the `file` field. Exceeding the 312-byte region is refused.
pub fn fill_options(frame: &mut Frame, opts: &[Vec<u8>]) -> Result<(), ProtocolError> {
    let mut region = Vec::with_capacity(OPTIONS_LEN);
    region.extend_from_slice(&MAGIC_COOKIE);

    let mut siaddr = None;
    let mut file = None;

    for opt in opts {
        if opt.is_empty() {
            continue;
        }
        let payload = opt.get(2..).unwrap_or(&[]);
        match opt[0] {
            OPT_TFTP_SERVER => {
                let name = String::from_utf8_lossy(payload);
                let name = name.trim_end_matches('\0');
                siaddr = Some(
                    lookup::resolve(name)
                        .map_err(|_| ProtocolError::UnresolvableServerName(name.to_string()))?,
                );
            }
            OPT_BOOT_FILE => file = Some(payload.to_vec()),
            _ => region.extend_from_slice(opt),
        }
    }

    if region.len() + 1 > OPTIONS_LEN {
        return Err(ProtocolError::OptionOverflow(region.len() + 1));
    }
    region.push(OPT_END);

    let options = frame.options_mut();
    options[..region.len()].copy_from_slice(&region);
    for b in options[region.len()..].iter_mut() {
        *b = 0;
    }

    if let Some(addr) = siaddr {
        frame.set_siaddr(addr);
    }
    if let Some(name) = file {
        frame.set_file(&name);
    }
    Ok(())
}
