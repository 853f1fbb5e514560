// Copyright (c) 2012 Ian Godin. All rights reserved.
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Forward and reverse name resolution helpers.

use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LookupError {
    #[error("Name lookup failed {0}")]
    NameLookup(String),
}

/// Resolves `name` to an IPv4 address, trying a numeric address first.
pub fn resolve(name: &str) -> Result<Ipv4Addr, LookupError> {
    if let Ok(addr) = name.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let addrs = dns_lookup::lookup_host(name)
        .map_err(|_| LookupError::NameLookup(name.to_string()))?;
    addrs
        .into_iter()
        .find_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| LookupError::NameLookup(name.to_string()))
}

/// Reverse-resolves `addr` to its short host name.
///
/// Returns `None` when the address has no name, including when the resolver
/// merely echoes the address back in numeric form.
pub fn hostname_for(addr: Ipv4Addr) -> Option<String> {
    if addr.is_unspecified() || addr == Ipv4Addr::BROADCAST {
        return None;
    }
    let name = dns_lookup::lookup_addr(&IpAddr::V4(addr)).ok()?;
    if name.parse::<IpAddr>().is_ok() {
        return None;
    }
    name.split('.').next().map(str::to_string)
}

/// Renders `addr` as its resolved name, falling back to the dotted quad.
pub fn display_ip(addr: Ipv4Addr) -> String {
    if addr.is_unspecified() || addr == Ipv4Addr::BROADCAST {
        return addr.to_string();
    }
    match dns_lookup::lookup_addr(&IpAddr::V4(addr)) {
        Ok(name) => name,
        Err(_) => addr.to_string(),
    }
}
