// Copyright (c) 2012 Ian Godin. All rights reserved.
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The option grammar and the text form of DHCP options.
//!
//! A [`Grammar`] maps option names to numeric codes and codes to argument
//! type vectors. It drives both directions of the text codec:
//! [`encode_option`] turns `name( arg, arg, ... )` into a raw TLV blob and
//! [`decode_option`] turns a blob back into that form, falling back to a hex
//! dump for codes the grammar does not know.

use crate::lookup;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum OptionParseError {
    #[error("Unknown DHCP option '{0}'")]
    UnknownOption(String),
    #[error("malformed option call '{0}'")]
    BadCall(String),
    #[error("Expected {expected} arguments, got {got} instead")]
    ArityMismatch { expected: usize, got: usize },
    #[error("Number (argument {index}) too large for option {option}")]
    ValueTooLarge { index: usize, option: String },
    #[error("invalid integer '{0}'")]
    BadInteger(String),
    #[error("invalid hex string '{0}'")]
    BadHexDigit(String),
    #[error("Name lookup failed {0}")]
    UnresolvableAddress(String),
    #[error("{0}")]
    BadName(&'static str),
    #[error("option too long: {0} bytes")]
    OptionTooLong(usize),
    #[error("hardware address arguments are not supported")]
    HwAddrUnsupported,
    #[error("invalid option specification")]
    InvalidSpec,
    #[error("Invalid empty option")]
    EmptyOption,
    #[error("Not enough data for {0}")]
    NotEnoughData(&'static str),
    #[error("Invalid option size {0}")]
    InvalidOptionSize(usize),
    #[error("Invalid DHCP option {0}")]
    InvalidOptionCode(u32),
    #[error("Unknown type '{0}'")]
    UnknownArgType(String),
    #[error("Can only have a single '{0}' by itself in options")]
    SoleArgType(&'static str),
    #[error("Expected '...' at the end of the argument list")]
    MoreNotLast,
    #[error("Expected other type before '...'")]
    MoreWithoutPredecessor,
    #[error("expected at least one argument type")]
    EmptyArgList,
}

/// The argument types an option declaration may carry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArgType {
    Address,
    HwAddr,
    Uint32,
    Uint16,
    Uint8,
    String,
    Names,
    Hex,
    More,
}

impl ArgType {
    /// Parses a declaration token as it appears in the configuration file.
    pub fn parse(token: &str) -> Option<ArgType> {
        match token {
            "ip" => Some(ArgType::Address),
            "mac" => Some(ArgType::HwAddr),
            "uint32" => Some(ArgType::Uint32),
            "uint16" => Some(ArgType::Uint16),
            "uint8" => Some(ArgType::Uint8),
            "string" => Some(ArgType::String),
            "names" => Some(ArgType::Names),
            "hex" => Some(ArgType::Hex),
            "..." => Some(ArgType::More),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            ArgType::Address => "ip",
            ArgType::HwAddr => "mac",
            ArgType::Uint32 => "uint32",
            ArgType::Uint16 => "uint16",
            ArgType::Uint8 => "uint8",
            ArgType::String => "string",
            ArgType::Names => "names",
            ArgType::Hex => "hex",
            ArgType::More => "...",
        }
    }

    /// An example argument, used when printing the known options.
    pub fn placeholder(&self) -> &'static str {
        match self {
            ArgType::Address => "1.2.3.4",
            ArgType::HwAddr => "00:11:22:33:44:55",
            ArgType::Uint32 => "123456",
            ArgType::Uint16 => "1234",
            ArgType::Uint8 => "12",
            ArgType::String => "something",
            ArgType::Names => "domain.com",
            ArgType::Hex => "0123456789ABCDEF",
            ArgType::More => "...",
        }
    }
}

/// The option registry: name to code, code to name, code to argument types.
///
/// Loaded once at startup and read-only afterwards. Redefining a code or a
/// name replaces the earlier entry.
#[derive(Clone, Debug, Default)]
pub struct Grammar {
    ids: HashMap<String, u8>,
    names: HashMap<u8, String>,
    args: HashMap<u8, Vec<ArgType>>,
}

impl Grammar {
    pub fn new() -> Self {
        Grammar::default()
    }

    pub fn define(
        &mut self,
        code: u32,
        name: &str,
        args: Vec<ArgType>,
    ) -> Result<(), OptionParseError> {
        if code == 0 || code >= 255 {
            return Err(OptionParseError::InvalidOptionCode(code));
        }
        if args.is_empty() {
            return Err(OptionParseError::EmptyArgList);
        }
        for (i, ty) in args.iter().enumerate() {
            match ty {
                ArgType::String | ArgType::Hex | ArgType::Names if args.len() > 1 => {
                    return Err(OptionParseError::SoleArgType(ty.token()))
                }
                ArgType::More => {
                    if i == 0 {
                        return Err(OptionParseError::MoreWithoutPredecessor);
                    }
                    if i + 1 != args.len() {
                        return Err(OptionParseError::MoreNotLast);
                    }
                }
                _ => {}
            }
        }

        let code = code as u8;
        if let Some(old_name) = self.names.insert(code, name.to_string()) {
            if old_name != name {
                self.ids.remove(&old_name);
            }
        }
        if let Some(old_code) = self.ids.insert(name.to_string(), code) {
            if old_code != code {
                self.names.remove(&old_code);
                self.args.remove(&old_code);
            }
        }
        self.args.insert(code, args);
        Ok(())
    }

    pub fn id(&self, name: &str) -> Option<u8> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, code: u8) -> Option<&str> {
        self.names.get(&code).map(String::as_str)
    }

    pub fn arg_types(&self, code: u8) -> Option<&[ArgType]> {
        self.args.get(&code).map(Vec::as_slice)
    }

    /// All entries, sorted by name.
    pub fn entries(&self) -> Vec<(&str, u8, &[ArgType])> {
        let mut entries: Vec<(&str, u8, &[ArgType])> = self
            .ids
            .iter()
            .filter_map(|(name, &code)| {
                self.args.get(&code).map(|args| (name.as_str(), code, args.as_slice()))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

/// Splits `name( arg, arg, ... )` into the name and its trimmed arguments.
pub fn parse_call(text: &str) -> Result<(String, Vec<String>), OptionParseError> {
    let bad = || OptionParseError::BadCall(text.to_string());
    let open = text.find('(').ok_or_else(bad)?;
    let close = text.rfind(')').filter(|&c| c > open).ok_or_else(bad)?;
    let name = text[..open].trim().to_string();
    if name.is_empty() {
        return Err(bad());
    }
    let inner = text[open + 1..close].trim();
    let args = if inner.is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(|a| a.trim().to_string()).collect()
    };
    Ok((name, args))
}

/// Encodes the textual option call `text` into a raw TLV blob.
pub fn encode_option(grammar: &Grammar, text: &str) -> Result<Vec<u8>, OptionParseError> {
    let (name, args) = parse_call(text)?;
    let code =
        grammar.id(&name).ok_or_else(|| OptionParseError::UnknownOption(name.clone()))?;
    let mut types = grammar
        .arg_types(code)
        .ok_or_else(|| OptionParseError::UnknownOption(name.clone()))?
        .to_vec();

    if types.last() == Some(&ArgType::More) {
        types.pop();
        if let Some(&fill) = types.last() {
            while types.len() < args.len() {
                types.push(fill);
            }
        }
    }
    if types.as_slice() == [ArgType::Names] {
        while types.len() < args.len() {
            types.push(ArgType::Names);
        }
    }
    if types.len() != args.len() {
        return Err(OptionParseError::ArityMismatch { expected: types.len(), got: args.len() });
    }

    let mut out = vec![code, 0];
    for (i, (ty, arg)) in types.iter().zip(args.iter()).enumerate() {
        match ty {
            ArgType::Address => {
                let addr = lookup::resolve(arg)
                    .map_err(|_| OptionParseError::UnresolvableAddress(arg.clone()))?;
                out.extend_from_slice(&addr.octets());
            }
            ArgType::HwAddr => return Err(OptionParseError::HwAddrUnsupported),
            ArgType::Uint32 => {
                let v: u32 =
                    arg.parse().map_err(|_| OptionParseError::BadInteger(arg.clone()))?;
                out.extend_from_slice(&v.to_be_bytes());
            }
            ArgType::Uint16 => {
                let v: u16 =
                    arg.parse().map_err(|_| OptionParseError::BadInteger(arg.clone()))?;
                out.extend_from_slice(&v.to_be_bytes());
            }
            ArgType::Uint8 => {
                let v: u32 =
                    arg.parse().map_err(|_| OptionParseError::BadInteger(arg.clone()))?;
                if v > 255 {
                    return Err(OptionParseError::ValueTooLarge { index: i, option: name });
                }
                out.push(v as u8);
            }
            ArgType::String => out.extend_from_slice(arg.as_bytes()),
            ArgType::Hex => {
                let bytes = from_hex(arg)?;
                out.extend_from_slice(&bytes);
            }
            ArgType::Names => {
                let packed = pack_name(arg)?;
                out.extend_from_slice(&packed);
            }
            ArgType::More => return Err(OptionParseError::InvalidSpec),
        }
    }

    let len = out.len() - 2;
    if len > 255 {
        return Err(OptionParseError::OptionTooLong(len));
    }
    out[1] = len as u8;
    Ok(out)
}

/// Decodes a raw TLV blob into its textual call form.
///
/// A code the grammar does not know decodes to a hex dump of the whole blob.
pub fn decode_option(grammar: &Grammar, blob: &[u8]) -> Result<String, OptionParseError> {
    if blob.is_empty() {
        return Err(OptionParseError::EmptyOption);
    }
    let code = blob[0];
    let name = match grammar.name(code) {
        Some(name) => name,
        None => return Ok(to_hex(blob)),
    };
    let mut types = match grammar.arg_types(code) {
        Some(types) => types.to_vec(),
        None => return Ok(to_hex(blob)),
    };
    let declared = if blob.len() >= 2 { blob[1] as usize } else { 0 };

    let mut out = format!("{}(", name);
    let mut p = 2usize;
    let mut last = ArgType::More;
    let mut i = 0;
    while i < types.len() && p < blob.len() {
        if i > 0 {
            out.push(',');
        }
        out.push(' ');

        let mut ty = types[i];
        if ty == ArgType::More {
            ty = last;
            types.push(ArgType::More);
        }
        if ty == ArgType::More {
            return Err(OptionParseError::InvalidSpec);
        }

        match ty {
            ArgType::Address => {
                if p + 4 > blob.len() {
                    return Err(OptionParseError::NotEnoughData("IP address"));
                }
                let addr = Ipv4Addr::new(blob[p], blob[p + 1], blob[p + 2], blob[p + 3]);
                out.push_str(&addr.to_string());
                p += 4;
            }
            ArgType::HwAddr => return Err(OptionParseError::HwAddrUnsupported),
            ArgType::Uint32 => {
                if p + 4 > blob.len() {
                    return Err(OptionParseError::NotEnoughData("uint32"));
                }
                let v =
                    u32::from_be_bytes([blob[p], blob[p + 1], blob[p + 2], blob[p + 3]]);
                out.push_str(&v.to_string());
                p += 4;
            }
            ArgType::Uint16 => {
                if p + 2 > blob.len() {
                    return Err(OptionParseError::NotEnoughData("uint16"));
                }
                let v = u16::from_be_bytes([blob[p], blob[p + 1]]);
                out.push_str(&v.to_string());
                p += 2;
            }
            ArgType::Uint8 => {
                if p + 1 > blob.len() {
                    return Err(OptionParseError::NotEnoughData("uint8"));
                }
                out.push_str(&blob[p].to_string());
                p += 1;
            }
            ArgType::String => {
                let end = (p + declared).min(blob.len());
                out.push_str(&String::from_utf8_lossy(&blob[p..end]));
                p = end;
            }
            ArgType::Hex => {
                if blob.len() < 3 {
                    return Err(OptionParseError::InvalidOptionSize(blob.len()));
                }
                let end = (2 + declared).min(blob.len());
                out.push_str(&to_hex(&blob[2..end]));
                p = end;
            }
            ArgType::Names => {
                let end = (p + declared).min(blob.len());
                let names = unpack_names(&blob[p..end]);
                out.push_str(&names.join(", "));
                p = end;
            }
            ArgType::More => return Err(OptionParseError::InvalidSpec),
        }
        last = ty;
        i += 1;
    }
    out.push_str(" )");
    Ok(out)
}

/// Encodes a dotted domain name as length-prefixed labels with a zero
/// terminator.
pub fn pack_name(name: &str) -> Result<Vec<u8>, OptionParseError> {
    let mut out = vec![0u8];
    let mut loc = 0;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch as u8);
            out[loc] += 1;
        } else if ch == '.' {
            loc = out.len();
            out.push(0);
        } else if !ch.is_whitespace() {
            return Err(OptionParseError::BadName("Invalid character in domain name"));
        }
    }
    if out.len() == 1 {
        return Err(OptionParseError::BadName("Domain name is empty"));
    }
    if out.ends_with(&[0]) {
        return Err(OptionParseError::BadName("Domain name ended with '.'"));
    }
    out.push(0);
    Ok(out)
}

/// Decodes zero-delimited groups of length-prefixed labels back into dotted
/// names.
pub fn unpack_names(bytes: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    while i < bytes.len() {
        let len = bytes[i] as usize;
        i += 1;
        if len == 0 {
            if !current.is_empty() {
                names.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push('.');
            }
            let end = (i + len).min(bytes.len());
            current.push_str(&String::from_utf8_lossy(&bytes[i..end]));
            i = end;
        }
    }
    if !current.is_empty() {
        names.push(current);
    }
    names
}

/// Decodes pairs of hex digits into bytes, dropping an odd trailing digit.
pub fn from_hex(text: &str) -> Result<Vec<u8>, OptionParseError> {
    let text = text.trim();
    if !text.is_ascii() {
        return Err(OptionParseError::BadHexDigit(text.to_string()));
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    let mut i = 0;
    while i + 1 < text.len() {
        let byte = u8::from_str_radix(&text[i..i + 2], 16)
            .map_err(|_| OptionParseError::BadHexDigit(text.to_string()))?;
        out.push(byte);
        i += 2;
    }
    Ok(out)
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
