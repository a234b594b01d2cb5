//! sixscan command-line interface

mod args;
mod output;

use anyhow::{Context, Result};
use args::{Cli, Command, CommonOpts, TraceProbe};
use clap::Parser;
use serde_json::Value;
use sixscan_core::config::{ScanConfig, SweepRange, Timing};
use sixscan_core::targets;
use sixscan_scanner::dhcp::{self, DhcpEnumerator, DhcpLocator, DhcpPinger, DhcpScaler};
use sixscan_scanner::{
    DhcpScanner, DnsScanner, HostScanner, OsScanner, PortScanner, RouteTracer, TraceVariant,
};
use std::io::BufRead;
use std::net::IpAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Host(args) => run(&args.common, |timing| {
            let specs = targets_or_stdin(&args.targets)?;
            let addrs = targets::expand_addrs(&specs, args.no_max_check)?;
            let results = HostScanner::new(addrs, timing)?.scan()?;
            Ok(output::host_json(&results))
        }),
        Command::Port(args) => run(&args.common, |timing| {
            let specs = targets_or_stdin(&args.targets)?;
            let ports: Vec<String> = args.ports.split(',').map(str::to_string).collect();
            let tuples = targets::expand_addr_ports(&specs, &ports, args.no_max_check)?;
            let results = PortScanner::new(tuples, args.iface.as_deref(), timing)?.scan()?;
            Ok(output::port_json(&results))
        }),
        Command::Trace(args) => run(&args.common, |timing| {
            let target = targets::resolve_host(&args.target)?;
            let variant = match args.probe {
                TraceProbe::Ping => TraceVariant::Ping,
                TraceProbe::Dns => TraceVariant::Dns {
                    name: args.name.clone(),
                    port: args.target_port,
                },
                TraceProbe::Syn => TraceVariant::Syn {
                    port: args.target_port,
                },
                TraceProbe::Dhcp => TraceVariant::Dhcp {
                    linkaddr: args
                        .linkaddr
                        .as_deref()
                        .map(targets::resolve_host)
                        .transpose()?,
                },
            };
            let hops = RouteTracer::new(
                target,
                variant,
                args.iface.as_deref(),
                args.hop,
                args.limit,
                timing,
            )?
            .scan()?;
            Ok(output::trace_json(&hops))
        }),
        Command::Os(args) => run(&args.common, |timing| {
            let target = targets::resolve_host(&args.target)?;
            let fingerprint = OsScanner::new(
                target,
                args.open_port,
                args.closed_port,
                args.iface.clone(),
                timing,
            )?
            .scan()?;
            Ok(output::os_json(&fingerprint))
        }),
        Command::Dns(args) => run(&args.common, |timing| {
            let nameserver: Option<IpAddr> = args
                .nameserver
                .as_deref()
                .map(|ns| ns.parse().context("invalid nameserver address"))
                .transpose()?;
            let names = DnsScanner::new(
                &args.basename,
                nameserver,
                args.limit,
                args.no_recursive,
                args.skip_check_autogen,
                args.tcp,
                timing.timewait,
            )?
            .scan()?;
            Ok(output::dns_json(&names))
        }),
        Command::Dhcp(args) => run(&args.common, |timing| {
            let target = targets::resolve_host(&args.target)?;
            let linkaddr = args
                .dhcp
                .linkaddr
                .as_deref()
                .map(targets::resolve_host)
                .transpose()?;
            let default_sweep = SweepRange::default();
            let config = ScanConfig {
                timing,
                count: args.dhcp.count,
                lossrate: args.dhcp.lossrate,
                step: args.step,
                diff: args.diff,
                limit: Some(args.limit as u64),
                sweep: SweepRange::new(default_sweep.beg, default_sweep.end, args.step)?,
                ..Default::default()
            };
            let info = DhcpScanner::new(target, linkaddr, &config)?.scan()?;
            Ok(output::dhcp_json(&info))
        }),
        Command::DhcpPing(args) => run(&args.common, |timing| {
            let target = targets::resolve_host(&args.target)?;
            let linkaddr = args
                .linkaddr
                .as_deref()
                .map(targets::resolve_host)
                .transpose()?;
            let transport = dhcp::server_transport()?;
            let ping = DhcpPinger::new(target, linkaddr, timing).scan(&transport)?;
            Ok(output::dhcp_ping_json(
                ping.reply.as_ref().map(|m| m.raw.as_slice()),
                ping.advertise.as_ref().map(|m| m.raw.as_slice()),
            ))
        }),
        Command::DhcpScale(args) => run(&args.common, |timing| {
            let target = targets::resolve_host(&args.target)?;
            let linkaddr = args
                .dhcp
                .linkaddr
                .as_deref()
                .map(targets::resolve_host)
                .transpose()?;
            let transport = dhcp::server_transport()?;
            let scales = DhcpScaler::new(
                target,
                linkaddr,
                args.dhcp.count,
                args.dhcp.lossrate,
                timing,
            )
            .scan(&transport)?;
            Ok(output::dhcp_scale_json(&scales))
        }),
        Command::DhcpLocate(args) => run(&args.common, |timing| {
            let target = targets::resolve_host(&args.target)?;
            let linkaddr = args
                .dhcp
                .linkaddr
                .as_deref()
                .map(targets::resolve_host)
                .transpose()?;
            let transport = dhcp::server_transport()?;
            let located = DhcpLocator::new(
                target,
                linkaddr,
                args.dhcp.count,
                args.dhcp.lossrate,
                timing,
            )
            .scan(&transport)?;
            Ok(output::dhcp_locate_json(located.plen, &located.scales))
        }),
        Command::DhcpEnum(args) => run(&args.common, |timing| {
            let target = targets::resolve_host(&args.target)?;
            let linkaddr = args
                .linkaddr
                .as_deref()
                .map(targets::resolve_host)
                .transpose()?;
            let transport = dhcp::server_transport()?;
            let answers = DhcpEnumerator::new(target, linkaddr, args.plen, args.diff, timing)?
                .scan(&transport)?;
            let raw: Vec<_> = answers
                .into_iter()
                .map(|(addr, message)| (addr, message.map(|m| m.raw)))
                .collect();
            Ok(output::dhcp_enum_json(&raw))
        }),
    }
}

/// Initialize logging, run the scan, emit its JSON result.
fn run(common: &CommonOpts, scan: impl FnOnce(Timing) -> Result<Value>) -> Result<()> {
    init_logging(common.debug);
    let timing = Timing {
        retry: common.retry,
        timewait: Duration::from_secs_f64(common.timewait),
        interval: Duration::from_secs_f64(common.interval),
    };
    let value = scan(timing)?;
    let rendered = serde_json::to_string_pretty(&value)?;
    match &common.output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("writing {}", path))?
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Positional targets, or stdin lines when none were given (skipping blanks
/// and `#` comments).
fn targets_or_stdin(targets: &[String]) -> Result<Vec<String>> {
    if !targets.is_empty() {
        return Ok(targets.to_vec());
    }
    let stdin = std::io::stdin();
    let mut specs = Vec::new();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        specs.push(line.to_string());
    }
    Ok(specs)
}
