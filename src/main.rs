// Copyright (c) 2012 Ian Godin. All rights reserved.
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! The dhcpdb command line: the server itself plus the administrative
//! subcommands that manage reservations, option templates, and leases.

use anyhow::{bail, Context, Result};
use argh::FromArgs;
use dhcpdb::configuration::Configuration;
use dhcpdb::daemon;
use dhcpdb::format::FrameSummary;
use dhcpdb::lookup;
use dhcpdb::options::{decode_option, encode_option, from_hex, to_hex};
use dhcpdb::protocol::{
    fill_options, Frame, MacAddr, OpCode, ETHERNET_HLEN, HWADDR_ETHER, OPT_HOSTNAME, SERVER_PORT,
};
use dhcpdb::server::serve;
use dhcpdb::socket;
use dhcpdb::store::{MysqlStore, Store, StoreSession};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::thread;

const DEFAULT_CONFIG_PATH: &str = "/etc/dhcpdb.conf";

/// A BOOTP/DHCP server backed by a MySQL store of host reservations and
/// option templates.
#[derive(FromArgs)]
struct Args {
    /// path to the configuration file
    #[argh(option, default = "DEFAULT_CONFIG_PATH.to_string()")]
    config: String,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Server(ServerCmd),
    Options(OptionsCmd),
    AddOption(AddOptionCmd),
    ReplaceOption(ReplaceOptionCmd),
    RemoveOption(RemoveOptionCmd),
    AddHost(AddHostCmd),
    ReplaceHost(ReplaceHostCmd),
    RemoveHost(RemoveHostCmd),
    Leases(LeasesCmd),
    ListAll(ListAllCmd),
    ListAvailable(ListAvailableCmd),
    Encode(EncodeCmd),
    Decode(DecodeCmd),
    Discover(DiscoverCmd),
    Monitor(MonitorCmd),
}

/// start the DHCP server
#[derive(FromArgs)]
#[argh(subcommand, name = "server")]
struct ServerCmd {
    /// write the daemon pid to this file
    #[argh(option)]
    pidfile: Option<String>,
}

/// show the options covering an IP, or all option templates
#[derive(FromArgs)]
#[argh(subcommand, name = "options")]
struct OptionsCmd {
    /// address or host name to look up
    #[argh(positional)]
    ip: Option<String>,
}

/// add an option template for an IP range
#[derive(FromArgs)]
#[argh(subcommand, name = "add-option")]
struct AddOptionCmd {
    /// ip [ip] option: arguments for adding an option template
    #[argh(positional)]
    args: Vec<String>,
}

/// replace an option template for an IP range
#[derive(FromArgs)]
#[argh(subcommand, name = "replace-option")]
struct ReplaceOptionCmd {
    /// ip [ip] option: arguments for replacing an option template
    #[argh(positional)]
    args: Vec<String>,
}

/// remove an option template for an IP range
#[derive(FromArgs)]
#[argh(subcommand, name = "remove-option")]
struct RemoveOptionCmd {
    /// ip [ip] option: arguments for removing an option template
    #[argh(positional)]
    args: Vec<String>,
}

/// add a host reservation
#[derive(FromArgs)]
#[argh(subcommand, name = "add-host")]
struct AddHostCmd {
    /// address or host name to reserve
    #[argh(positional)]
    ip: String,
    /// hardware address the reservation is for
    #[argh(positional)]
    mac: String,
}

/// move a reservation to a new MAC (and optionally a new IP)
#[derive(FromArgs)]
#[argh(subcommand, name = "replace-host")]
struct ReplaceHostCmd {
    /// ip [new-ip] mac: arguments for replacing a host reservation
    #[argh(positional)]
    args: Vec<String>,
}

/// remove the reservation for an IP
#[derive(FromArgs)]
#[argh(subcommand, name = "remove-host")]
struct RemoveHostCmd {
    /// address or host name to remove
    #[argh(positional)]
    ip: String,
}

/// list all leases
#[derive(FromArgs)]
#[argh(subcommand, name = "leases")]
struct LeasesCmd {}

/// list reservations, optionally restricted to a MAC
#[derive(FromArgs)]
#[argh(subcommand, name = "list-all")]
struct ListAllCmd {
    /// hardware address to list reservations for
    #[argh(positional)]
    mac: Option<String>,
}

/// list the addresses currently available to a MAC
#[derive(FromArgs)]
#[argh(subcommand, name = "list-available")]
struct ListAvailableCmd {
    /// hardware address to list available addresses for
    #[argh(positional)]
    mac: String,
}

/// encode options into hex strings
#[derive(FromArgs)]
#[argh(subcommand, name = "encode")]
struct EncodeCmd {
    /// options of the form name( arg, ... )
    #[argh(positional)]
    options: Vec<String>,
}

/// decode hex strings into readable options
#[derive(FromArgs)]
#[argh(subcommand, name = "decode")]
struct DecodeCmd {
    /// hex encoded options
    #[argh(positional)]
    hex: Vec<String>,
}

/// send a test DISCOVER frame to a server
#[derive(FromArgs)]
#[argh(subcommand, name = "discover")]
struct DiscoverCmd {
    /// server address to send to
    #[argh(positional)]
    ip: String,
    /// hardware address to claim
    #[argh(positional)]
    mac: String,
    /// extra options to include
    #[argh(positional)]
    options: Vec<String>,
}

/// listen on the server port and dump every frame
#[derive(FromArgs)]
#[argh(subcommand, name = "monitor")]
struct MonitorCmd {
    /// address to bind, all interfaces when absent
    #[argh(positional)]
    ip: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();
    let config = Arc::new(
        Configuration::load(&args.config)
            .with_context(|| format!("failed to load configuration '{}'", args.config))?,
    );

    match args.command {
        Command::Server(cmd) => cmd_server(config, cmd.pidfile),
        Command::Options(cmd) => cmd_options(&config, cmd.ip),
        Command::AddOption(cmd) => cmd_add_option(&config, &cmd.args, false),
        Command::ReplaceOption(cmd) => cmd_add_option(&config, &cmd.args, true),
        Command::RemoveOption(cmd) => cmd_remove_option(&config, &cmd.args),
        Command::AddHost(cmd) => cmd_add_host(&config, &cmd.ip, &cmd.mac),
        Command::ReplaceHost(cmd) => cmd_replace_host(&config, &cmd.args),
        Command::RemoveHost(cmd) => cmd_remove_host(&config, &cmd.ip),
        Command::Leases(_) => cmd_leases(&config),
        Command::ListAll(cmd) => cmd_list_all(&config, cmd.mac),
        Command::ListAvailable(cmd) => cmd_list_available(&config, &cmd.mac),
        Command::Encode(cmd) => cmd_encode(&config, &cmd.options),
        Command::Decode(cmd) => cmd_decode(&config, &cmd.hex),
        Command::Discover(cmd) => cmd_discover(&config, &cmd),
        Command::Monitor(cmd) => cmd_monitor(&config, cmd.ip),
    }
}

fn open_session(config: &Configuration) -> Result<<MysqlStore as Store>::Session> {
    let store = MysqlStore::connect(config).context("unable to open the store")?;
    Ok(store.start_session()?)
}

fn cmd_server(config: Arc<Configuration>, pidfile: Option<String>) -> Result<()> {
    daemon::daemonize(config.foreground()).context("unable to daemonize")?;
    if let Some(path) = &pidfile {
        daemon::write_pidfile(path).with_context(|| format!("unable to write '{}'", path))?;
    }

    let store = Arc::new(MysqlStore::connect(&config).context("unable to open the store")?);

    let mut listeners: Vec<Ipv4Addr> = Vec::new();
    if let Some(server) = config.server() {
        listeners.push(lookup::resolve(server)?);
    } else {
        for iface in pnet::datalink::interfaces() {
            for network in &iface.ips {
                if let IpAddr::V4(addr) = network.ip() {
                    listeners.push(addr);
                }
            }
        }
    }
    if listeners.is_empty() {
        bail!("no IPv4 interface addresses to listen on");
    }

    let mut handles = Vec::new();
    for addr in listeners {
        let store = Arc::clone(&store);
        let config = Arc::clone(&config);
        handles.push(thread::spawn(move || {
            if let Err(e) = serve(addr, addr, store, config) {
                log::error!("listener on {} failed: {}", addr, e);
            }
        }));
    }
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn cmd_options(config: &Configuration, ip: Option<String>) -> Result<()> {
    let mut session = open_session(config)?;
    match ip {
        Some(ip) => {
            let addr = lookup::resolve(&ip)?;
            let mut options = session.get_options(addr)?;
            if !options.iter().any(|o| o.first() == Some(&OPT_HOSTNAME)) {
                if let Some(name) = lookup::hostname_for(addr) {
                    let mut opt = vec![OPT_HOSTNAME, name.len() as u8];
                    opt.extend_from_slice(name.as_bytes());
                    options.push(opt);
                }
            }
            options.sort();
            for opt in &options {
                println!("{}", decode_option(config.grammar(), opt)?);
            }
            if options.is_empty() {
                println!("no options found");
            }
        }
        None => {
            for (lo, hi, opt) in session.get_all_options()? {
                println!("{}\t{}\t{}", lo, hi, decode_option(config.grammar(), &opt)?);
            }
        }
    }
    Ok(())
}

fn parse_range(args: &[String]) -> Result<(Ipv4Addr, Ipv4Addr, &str)> {
    match args {
        [ip, option] => {
            let addr = lookup::resolve(ip)?;
            Ok((addr, addr, option.as_str()))
        }
        [ip1, ip2, option] => {
            Ok((lookup::resolve(ip1)?, lookup::resolve(ip2)?, option.as_str()))
        }
        _ => bail!("expected <ip> [<ip>] <option>"),
    }
}

fn cmd_add_option(config: &Configuration, args: &[String], replace: bool) -> Result<()> {
    let (lo, hi, option) = parse_range(args)?;
    let blob = encode_option(config.grammar(), option)?;
    let mut session = open_session(config)?;
    session.add_option(lo, hi, &blob, replace)?;
    println!("{}\t{}\t{}", lo, hi, decode_option(config.grammar(), &blob)?);
    Ok(())
}

fn cmd_remove_option(config: &Configuration, args: &[String]) -> Result<()> {
    let (lo, hi, option) = parse_range(args)?;
    let blob = encode_option(config.grammar(), option)?;
    let mut session = open_session(config)?;
    session.remove_option(lo, hi, &blob)?;
    Ok(())
}

fn cmd_add_host(config: &Configuration, ip: &str, mac: &str) -> Result<()> {
    let addr = lookup::resolve(ip)?;
    let mac: MacAddr = mac.parse()?;
    let mut session = open_session(config)?;
    session.add_host(addr, mac)?;
    println!("{}\t{}\t{}", addr, lookup::display_ip(addr), mac);
    Ok(())
}

fn cmd_replace_host(config: &Configuration, args: &[String]) -> Result<()> {
    let (ip, new_ip, mac) = match args {
        [ip, mac] => (ip, None, mac),
        [ip, new_ip, mac] => (ip, Some(new_ip), mac),
        _ => bail!("expected <ip> [<new-ip>] <mac>"),
    };
    let mut addr = lookup::resolve(ip)?;
    let mac: MacAddr = mac.parse()?;
    let mut session = open_session(config)?;
    session.remove_host(addr)?;
    if let Some(new_ip) = new_ip {
        addr = lookup::resolve(new_ip)?;
    }
    session.add_host(addr, mac)?;
    println!("{}\t{}\t{}", addr, lookup::display_ip(addr), mac);
    Ok(())
}

fn cmd_remove_host(config: &Configuration, ip: &str) -> Result<()> {
    let addr = lookup::resolve(ip)?;
    let mut session = open_session(config)?;
    session.remove_host(addr)?;
    Ok(())
}

fn cmd_leases(config: &Configuration) -> Result<()> {
    let mut session = open_session(config)?;
    for lease in session.get_all_leases()? {
        println!(
            "{}\t{}\t{}\t{}",
            lease.ip,
            lookup::display_ip(lease.ip),
            lease.mac,
            lease.expiration
        );
    }
    Ok(())
}

fn cmd_list_all(config: &Configuration, mac: Option<String>) -> Result<()> {
    let mut session = open_session(config)?;
    match mac {
        Some(mac) => {
            let mac: MacAddr = mac.parse()?;
            let ips = session.get_ips(mac, false)?;
            for ip in &ips {
                println!("{}", ip);
            }
            if ips.is_empty() {
                println!("no addresses found for {}", mac);
            }
        }
        None => {
            for (ip, mac) in session.get_all_hosts()? {
                println!("{}\t{}\t{}", ip, lookup::display_ip(ip), mac);
            }
        }
    }
    Ok(())
}

fn cmd_list_available(config: &Configuration, mac: &str) -> Result<()> {
    let mac: MacAddr = mac.parse()?;
    let mut session = open_session(config)?;
    let ips = session.get_ips(mac, true)?;
    for ip in &ips {
        println!("{}", lookup::display_ip(*ip));
    }
    if ips.is_empty() {
        println!("no addresses found for {}", mac);
    }
    Ok(())
}

fn cmd_encode(config: &Configuration, options: &[String]) -> Result<()> {
    if options.is_empty() {
        println!("Known options:");
        for (name, _, args) in config.grammar().entries() {
            let placeholders =
                args.iter().map(|t| t.placeholder()).collect::<Vec<_>>().join(", ");
            println!("  {}( {} )", name, placeholders);
        }
        return Ok(());
    }
    for option in options {
        println!("{}", to_hex(&encode_option(config.grammar(), option)?));
    }
    Ok(())
}

fn cmd_decode(config: &Configuration, hex: &[String]) -> Result<()> {
    if hex.is_empty() {
        bail!("expected at least one hex option to decode");
    }
    for blob in hex {
        println!("{}", decode_option(config.grammar(), &from_hex(blob)?)?);
    }
    Ok(())
}

fn cmd_discover(config: &Configuration, cmd: &DiscoverCmd) -> Result<()> {
    let addr = lookup::resolve(&cmd.ip)?;
    let mac: MacAddr = cmd.mac.parse()?;
    let grammar = config.grammar();

    let mut frame = Frame::new();
    frame.set_op(OpCode::BOOTREQUEST);
    frame.set_htype(HWADDR_ETHER);
    frame.set_hlen(ETHERNET_HLEN);
    frame.set_xid(0xCAFEBEEF);
    frame.set_chaddr(&mac.octets);

    let mut opts = vec![
        encode_option(grammar, "msgtype(1)")?,
        encode_option(grammar, "param_requested(1,3,6,12,15,54,66,67)")?,
        encode_option(grammar, "vendorid(DHCPDB discover test)")?,
    ];
    for extra in &cmd.options {
        opts.push(encode_option(grammar, extra)?);
    }
    fill_options(&mut frame, &opts)?;

    let sock = socket::bind_reply(Ipv4Addr::UNSPECIFIED, 0)?;
    socket::send_frame(&sock, addr, SERVER_PORT, &frame)?;
    println!("Sent:\n{}", FrameSummary::new(&frame, grammar));
    Ok(())
}

fn cmd_monitor(config: &Configuration, ip: Option<String>) -> Result<()> {
    let addr = match &ip {
        Some(ip) => lookup::resolve(ip)?,
        None => Ipv4Addr::UNSPECIFIED,
    };
    let sock = socket::bind_listener(addr, SERVER_PORT)
        .with_context(|| format!("unable to bind {}:{}", addr, SERVER_PORT))?;

    let mut frame = Frame::new();
    loop {
        frame.zero();
        match socket::recv_frame(&sock, &mut frame) {
            Ok(_) => println!("Received:\n{}", FrameSummary::new(&frame, config.grammar())),
            Err(e) => {
                println!("Error: {}", e);
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_range_with_single_address_covers_itself() {
        let args = strings(&["192.0.2.1", "router(192.0.2.1)"]);
        let (lo, hi, option) = parse_range(&args).expect("two arguments suffice");
        assert_eq!(lo, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(hi, lo);
        assert_eq!(option, "router(192.0.2.1)");
    }

    #[test]
    fn test_parse_range_with_two_addresses() {
        let args = strings(&["192.0.2.0", "192.0.2.255", "lease(900)"]);
        let (lo, hi, option) = parse_range(&args).expect("three arguments suffice");
        assert_eq!(lo, Ipv4Addr::new(192, 0, 2, 0));
        assert_eq!(hi, Ipv4Addr::new(192, 0, 2, 255));
        assert_eq!(option, "lease(900)");
    }

    #[test]
    fn test_parse_range_rejects_wrong_arity() {
        assert!(parse_range(&strings(&["lease(900)"])).is_err());
        assert!(parse_range(&strings(&[])).is_err());
        let four = strings(&["192.0.2.1", "192.0.2.2", "192.0.2.3", "lease(900)"]);
        assert!(parse_range(&four).is_err());
    }
}
