// Copyright (c) 2012 Ian Godin. All rights reserved.
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The reservation/template/lease store.
//!
//! [`Store`] hands out one [`StoreSession`] per worker thread; a session owns
//! its connection and is torn down when dropped. The MySQL implementation
//! keeps reservations in `dhcp_host`, option templates in `dhcp_options` and
//! leases in `dhcp_lease` (see `schema.sql`). IPv4 addresses are stored as
//! host-order integers, hardware addresses as 6-byte binary columns.

use crate::configuration::Configuration;
use crate::protocol::MacAddr;
use mysql::prelude::Queryable;
use mysql::{IsolationLevel, OptsBuilder, Pool, PooledConn, TxOpts};
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store driver error: {0}")]
    Driver(#[from] mysql::Error),
    #[error("Invalid configuration file")]
    MissingSettings,
}

/// A lease row: the right of `mac` to hold `ip` until `expiration`.
#[derive(Clone, Debug, PartialEq)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub expiration: String,
}

/// A handle that can open per-worker store sessions.
pub trait Store: Send + Sync {
    type Session: StoreSession;

    fn start_session(&self) -> Result<Self::Session, StoreError>;
}

/// The per-worker store operations.
pub trait StoreSession {
    /// IPv4 addresses eligible for `mac`, most specific reservation first,
    /// ascending within. With `available_only` set, addresses leased to a
    /// different MAC are excluded.
    fn get_ips(&mut self, mac: MacAddr, available_only: bool)
        -> Result<Vec<Ipv4Addr>, StoreError>;

    /// Raw option blobs of every template whose range covers `ip`.
    fn get_options(&mut self, ip: Ipv4Addr) -> Result<Vec<Vec<u8>>, StoreError>;

    fn add_host(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Result<(), StoreError>;

    fn remove_host(&mut self, ip: Ipv4Addr) -> Result<(), StoreError>;

    fn add_option(
        &mut self,
        lo: Ipv4Addr,
        hi: Ipv4Addr,
        blob: &[u8],
        replace: bool,
    ) -> Result<(), StoreError>;

    fn remove_option(&mut self, lo: Ipv4Addr, hi: Ipv4Addr, blob: &[u8])
        -> Result<(), StoreError>;

    fn get_all_hosts(&mut self) -> Result<Vec<(Ipv4Addr, MacAddr)>, StoreError>;

    fn get_all_options(&mut self) -> Result<Vec<(Ipv4Addr, Ipv4Addr, Vec<u8>)>, StoreError>;

    fn get_all_leases(&mut self) -> Result<Vec<Lease>, StoreError>;

    /// Atomically grants or refreshes the lease on `ip` for `mac`. Returns
    /// `false` when another MAC holds the lease.
    fn acquire_lease(&mut self, ip: Ipv4Addr, mac: MacAddr, seconds: u32)
        -> Result<bool, StoreError>;

    /// Deletes the lease row iff it matches `(ip, mac)`.
    fn release_lease(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Result<bool, StoreError>;
}

/// The MySQL-backed store.
pub struct MysqlStore {
    pool: Pool,
}

impl MysqlStore {
    /// Connects using the `dbhost`, `database`, `dbuser` and `dbpassword`
    /// settings, all of which must be present.
    pub fn connect(config: &Configuration) -> Result<MysqlStore, StoreError> {
        let (host, database, user, password) = match (
            config.dbhost(),
            config.database(),
            config.dbuser(),
            config.dbpassword(),
        ) {
            (Some(h), Some(d), Some(u), Some(p)) => (h, d, u, p),
            _ => return Err(StoreError::MissingSettings),
        };
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(host))
            .db_name(Some(database))
            .user(Some(user))
            .pass(Some(password));
        Ok(MysqlStore { pool: Pool::new(opts)? })
    }
}

impl Store for MysqlStore {
    type Session = MysqlSession;

    fn start_session(&self) -> Result<MysqlSession, StoreError> {
        Ok(MysqlSession { conn: self.pool.get_conn()? })
    }
}

/// One pooled connection, owned by one worker.
pub struct MysqlSession {
    conn: PooledConn,
}

impl StoreSession for MysqlSession {
    fn get_ips(
        &mut self,
        mac: MacAddr,
        available_only: bool,
    ) -> Result<Vec<Ipv4Addr>, StoreError> {
        let mac_bytes = mac.octets.to_vec();
        let wildcard = MacAddr::WILDCARD.octets.to_vec();
        let rows = if available_only {
            self.conn.exec_map(
                "SELECT ip_addr FROM dhcp_host \
                 WHERE (mac_addr = ? OR mac_addr = ?) \
                   AND ip_addr NOT IN \
                       (SELECT ip_addr FROM dhcp_lease WHERE mac_addr <> ?) \
                 ORDER BY mac_addr DESC, ip_addr ASC",
                (mac_bytes.clone(), wildcard, mac_bytes),
                |ip: u32| Ipv4Addr::from(ip),
            )?
        } else {
            self.conn.exec_map(
                "SELECT ip_addr FROM dhcp_host \
                 WHERE mac_addr = ? OR mac_addr = ? \
                 ORDER BY mac_addr DESC, ip_addr ASC",
                (mac_bytes, wildcard),
                |ip: u32| Ipv4Addr::from(ip),
            )?
        };
        Ok(rows)
    }

    fn get_options(&mut self, ip: Ipv4Addr) -> Result<Vec<Vec<u8>>, StoreError> {
        let ip = u32::from(ip);
        Ok(self.conn.exec_map(
            "SELECT options FROM dhcp_options WHERE ? >= ip_addr_from AND ? <= ip_addr_to",
            (ip, ip),
            |blob: Vec<u8>| blob,
        )?)
    }

    fn add_host(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Result<(), StoreError> {
        self.conn.exec_drop(
            "INSERT INTO dhcp_host (ip_addr, mac_addr) VALUES (?, ?)",
            (u32::from(ip), mac.octets.to_vec()),
        )?;
        Ok(())
    }

    fn remove_host(&mut self, ip: Ipv4Addr) -> Result<(), StoreError> {
        self.conn
            .exec_drop("DELETE FROM dhcp_host WHERE ip_addr = ?", (u32::from(ip),))?;
        Ok(())
    }

    fn add_option(
        &mut self,
        lo: Ipv4Addr,
        hi: Ipv4Addr,
        blob: &[u8],
        replace: bool,
    ) -> Result<(), StoreError> {
        if replace {
            let tag = blob.first().copied().unwrap_or(0);
            self.conn.exec_drop(
                "DELETE FROM dhcp_options \
                 WHERE ip_addr_from = ? AND ip_addr_to = ? AND SUBSTRING(options, 1, 1) = ?",
                (u32::from(lo), u32::from(hi), vec![tag]),
            )?;
        }
        self.conn.exec_drop(
            "INSERT INTO dhcp_options (ip_addr_from, ip_addr_to, options) VALUES (?, ?, ?)",
            (u32::from(lo), u32::from(hi), blob.to_vec()),
        )?;
        Ok(())
    }

    fn remove_option(
        &mut self,
        lo: Ipv4Addr,
        hi: Ipv4Addr,
        blob: &[u8],
    ) -> Result<(), StoreError> {
        self.conn.exec_drop(
            "DELETE FROM dhcp_options \
             WHERE ip_addr_from = ? AND ip_addr_to = ? AND options = ?",
            (u32::from(lo), u32::from(hi), blob.to_vec()),
        )?;
        Ok(())
    }

    fn get_all_hosts(&mut self) -> Result<Vec<(Ipv4Addr, MacAddr)>, StoreError> {
        Ok(self.conn.query_map(
            "SELECT ip_addr, mac_addr FROM dhcp_host ORDER BY ip_addr ASC",
            |(ip, mac): (u32, Vec<u8>)| (Ipv4Addr::from(ip), mac_from_bytes(&mac)),
        )?)
    }

    fn get_all_options(&mut self) -> Result<Vec<(Ipv4Addr, Ipv4Addr, Vec<u8>)>, StoreError> {
        Ok(self.conn.query_map(
            "SELECT ip_addr_from, ip_addr_to, options FROM dhcp_options \
             ORDER BY ip_addr_from ASC, ip_addr_to ASC",
            |(lo, hi, blob): (u32, u32, Vec<u8>)| {
                (Ipv4Addr::from(lo), Ipv4Addr::from(hi), blob)
            },
        )?)
    }

    fn get_all_leases(&mut self) -> Result<Vec<Lease>, StoreError> {
        Ok(self.conn.query_map(
            "SELECT ip_addr, mac_addr, \
                    DATE_FORMAT(FROM_UNIXTIME(expiration), '%Y-%m-%d %H:%i:%s') \
             FROM dhcp_lease ORDER BY ip_addr ASC",
            |(ip, mac, expiration): (u32, Vec<u8>, String)| Lease {
                ip: Ipv4Addr::from(ip),
                mac: mac_from_bytes(&mac),
                expiration,
            },
        )?)
    }

    fn acquire_lease(
        &mut self,
        ip: Ipv4Addr,
        mac: MacAddr,
        seconds: u32,
    ) -> Result<bool, StoreError> {
        let opts = TxOpts::default().set_isolation_level(Some(IsolationLevel::Serializable));
        let mut tx = self.conn.start_transaction(opts)?;
        let holder: Option<Vec<u8>> = tx.exec_first(
            "SELECT mac_addr FROM dhcp_lease WHERE ip_addr = ? FOR UPDATE",
            (u32::from(ip),),
        )?;
        let granted = match holder {
            None => {
                tx.exec_drop(
                    "INSERT INTO dhcp_lease (ip_addr, mac_addr, expiration) \
                     VALUES (?, ?, UNIX_TIMESTAMP() + ?)",
                    (u32::from(ip), mac.octets.to_vec(), seconds),
                )?;
                true
            }
            Some(holder) if holder == mac.octets => {
                tx.exec_drop(
                    "UPDATE dhcp_lease SET expiration = UNIX_TIMESTAMP() + ? \
                     WHERE ip_addr = ?",
                    (seconds, u32::from(ip)),
                )?;
                true
            }
            Some(_) => false,
        };
        tx.commit()?;
        Ok(granted)
    }

    fn release_lease(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Result<bool, StoreError> {
        self.conn.exec_drop(
            "DELETE FROM dhcp_lease WHERE ip_addr = ? AND mac_addr = ?",
            (u32::from(ip), mac.octets.to_vec()),
        )?;
        Ok(self.conn.as_mut().affected_rows() >= 1)
    }
}

fn mac_from_bytes(bytes: &[u8]) -> MacAddr {
    let mut octets = [0u8; 6];
    let n = bytes.len().min(6);
    octets[..n].copy_from_slice(&bytes[..n]);
    MacAddr { octets }
}

/// An in-memory store with the same semantics as the MySQL backend, for
/// exercising the request handler without a database.
#[cfg(test)]
pub use memory::MemoryStore;
