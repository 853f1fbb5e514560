// Copyright (c) 2012 Ian Godin. All rights reserved.
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The line-oriented configuration file.
//!
//! Lines are `key = value`. A decimal key in (0,255) declares a DHCP option:
//! the value is `name( type, type, ... )` with types drawn from the grammar
//! vocabulary. Any other key is a free-form setting. Blank lines and lines
//! starting with `#` are ignored.

use crate::options::{ArgType, Grammar, OptionParseError};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Error at line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: OptionParseError,
    },
    #[error("Error at line {0}: expected '='")]
    MissingEquals(usize),
    #[error("unable to read configuration: {0}")]
    Io(#[from] io::Error),
}

// Standard option declarations, always loaded first. Entries in the
// configuration file override these, last one wins.
const BUILTIN_OPTIONS: &str = "\
1 = subnet( ip )
2 = time_offset( uint32 )
3 = router( ip, ... )
4 = time_server( ip, ... )
5 = name_server( ip, ... )
6 = dns( ip, ... )
7 = log_server( ip, ... )
12 = hostname( string )
13 = bootfile_size( uint16 )
15 = domain( string )
26 = mtu( uint16 )
28 = broadcast( ip )
33 = static_route( ip, ip, ... )
42 = ntp_servers( ip, ... )
43 = vendor_specific( hex )
44 = netbios_name_server( ip, ... )
50 = requested_ip( ip )
51 = lease( uint32 )
53 = msgtype( uint8 )
54 = server_id( ip )
55 = param_requested( uint8, ... )
56 = message( string )
57 = max_msg_size( uint16 )
58 = renewal_time( uint32 )
59 = rebinding_time( uint32 )
60 = vendorid( string )
61 = client_id( hex )
66 = tftp_server( string )
67 = bootfile( string )
119 = domain_search( names )
";

/// Settings and the option grammar, loaded once at startup and read-only
/// afterwards.
#[derive(Debug, Default)]
pub struct Configuration {
    settings: HashMap<String, String>,
    grammar: Grammar,
}

impl Configuration {
    /// Loads the configuration file at `path` on top of the built-in option
    /// declarations. A missing file yields the built-ins alone.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Configuration, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Configuration::parse(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Configuration::parse(""),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(text: &str) -> Result<Configuration, ConfigError> {
        let mut config = Configuration::default();
        parse_into(&mut config, BUILTIN_OPTIONS)
            .unwrap_or_else(|e| panic!("built-in option table must parse: {}", e));
        parse_into(&mut config, text)?;
        Ok(config)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn dbhost(&self) -> Option<&str> {
        self.nonempty("dbhost")
    }

    pub fn database(&self) -> Option<&str> {
        self.nonempty("database")
    }

    pub fn dbuser(&self) -> Option<&str> {
        self.nonempty("dbuser")
    }

    pub fn dbpassword(&self) -> Option<&str> {
        self.nonempty("dbpassword")
    }

    /// The listen address, when one is configured.
    pub fn server(&self) -> Option<&str> {
        self.nonempty("server")
    }

    /// Whether the server should stay attached to the terminal.
    pub fn foreground(&self) -> bool {
        truthy(self.get("foreground"))
    }

    /// Whether workers should dump frames instead of serving them.
    pub fn testing(&self) -> bool {
        truthy(self.get("testing"))
    }

    fn nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }
}

fn truthy(value: Option<&str>) -> bool {
    matches!(value, Some("yes") | Some("true") | Some("on"))
}

fn parse_into(config: &mut Configuration, text: &str) -> Result<(), ConfigError> {
    for (n, line) in text.lines().enumerate() {
        let count = n + 1;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let eq = match line.find('=') {
            Some(0) | None => return Err(ConfigError::MissingEquals(count)),
            Some(p) => p,
        };
        let key = line[..eq].trim();
        let value = line[eq + 1..].trim();

        if key.is_empty() {
            return Err(ConfigError::MissingEquals(count));
        }

        if let Ok(code) = key.parse::<u32>() {
            define_option(&mut config.grammar, code, value)
                .map_err(|source| ConfigError::Line { line: count, source })?;
        } else {
            config.settings.insert(key.to_string(), value.to_string());
        }
    }
    Ok(())
}

fn define_option(grammar: &mut Grammar, code: u32, value: &str) -> Result<(), OptionParseError> {
    let (name, tokens) = crate::options::parse_call(value)?;
    let mut args = Vec::with_capacity(tokens.len());
    for token in &tokens {
        let ty = ArgType::parse(token)
            .ok_or_else(|| OptionParseError::UnknownArgType(token.clone()))?;
        args.push(ty);
    }
    grammar.define(code, &name, args)
}
