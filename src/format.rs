// Copyright (c) 2012 Ian Godin. All rights reserved.
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Human-readable frame dumps for the monitor and testing modes.

use crate::lookup;
use crate::options::{decode_option, to_hex, Grammar};
use crate::protocol::{
    extract_options, Frame, OpCode, HWADDR_ETHER, HWADDR_FDDI, HWADDR_IEEE802,
};
use std::fmt;

/// Renders a frame as labeled lines, one field per line, each option decoded
/// through the grammar.
pub struct FrameSummary<'a> {
    frame: &'a Frame,
    grammar: &'a Grammar,
}

impl<'a> FrameSummary<'a> {
    pub fn new(frame: &'a Frame, grammar: &'a Grammar) -> Self {
        FrameSummary { frame, grammar }
    }
}

impl fmt::Display for FrameSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.frame;

        match OpCode::try_from(p.op()) {
            Ok(OpCode::BOOTREQUEST) => writeln!(f, "  request")?,
            Ok(OpCode::BOOTREPLY) => writeln!(f, "  reply")?,
            Err(_) => writeln!(f, "  unknown")?,
        }

        let hwkind = match p.htype() {
            HWADDR_ETHER => "ethernet",
            HWADDR_IEEE802 => "ieee_802",
            HWADDR_FDDI => "fddi",
            _ => "unknown",
        };
        writeln!(f, "  hwaddr({},{})", hwkind, hexblob(p.hwaddr()))?;

        if p.hops() != 0 {
            writeln!(f, "  hops({})", p.hops())?;
        }

        writeln!(f, "  xid({})", p.xid())?;
        writeln!(f, "  seconds({})", p.secs())?;
        writeln!(f, "  flags({})", if p.flags() == 0 { "no broadcast" } else { "broadcast" })?;
        writeln!(f, "  ciaddr({})", lookup::display_ip(p.ciaddr()))?;
        writeln!(f, "  yiaddr({})", lookup::display_ip(p.yiaddr()))?;
        writeln!(f, "  siaddr({})", lookup::display_ip(p.siaddr()))?;
        writeln!(f, "  giaddr({})", lookup::display_ip(p.giaddr()))?;
        writeln!(f, "  server({})", p.sname())?;
        writeln!(f, "  bootfile({})", p.file())?;

        if p.has_magic_cookie() {
            for opt in extract_options(p) {
                let rendered =
                    decode_option(self.grammar, &opt).unwrap_or_else(|_| to_hex(&opt));
                writeln!(f, "  {}: {}", opt[0], rendered)?;
            }
        } else {
            writeln!(f, "  Invalid magic option cookie")?;
        }

        Ok(())
    }
}

fn hexblob(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
