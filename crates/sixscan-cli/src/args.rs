//! Command-line argument definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use sixscan_core::defaults;

#[derive(Debug, Parser)]
#[command(name = "sixscan", version, about = "IPv6 network reconnaissance toolkit")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Flags every scanner understands
#[derive(Debug, Args)]
pub struct CommonOpts {
    /// Log at debug level
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Write the JSON result to a file instead of stdout
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: Option<String>,

    /// Retry rounds for stateful probing
    #[arg(short = 'R', long, default_value_t = defaults::RETRY)]
    pub retry: usize,

    /// Quiescence after each probe batch, in seconds
    #[arg(short = 'T', long, default_value_t = defaults::TIMEWAIT)]
    pub timewait: f64,

    /// Spacing between consecutive probes, in seconds
    #[arg(short = 'I', long, default_value_t = defaults::INTERVAL)]
    pub interval: f64,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// ICMPv6 echo sweep over the expanded targets
    Host(HostArgs),
    /// TCP SYN scan over the expanded address-port tuples
    Port(PortArgs),
    /// Hop-by-hop route trace towards one target
    Trace(TraceArgs),
    /// Nmap-style OS fingerprint probes against one target
    Os(OsArgs),
    /// Recursive PTR-zone crawl under an ip6.arpa. base name
    Dns(DnsArgs),
    /// Full DHCPv6 reconnaissance of one server
    Dhcp(DhcpArgs),
    /// DHCPv6 reachability ping only
    DhcpPing(DhcpPingArgs),
    /// DHCPv6 pool-regularity measurement only
    DhcpScale(DhcpScaleArgs),
    /// DHCPv6 served-prefix location only
    DhcpLocate(DhcpLocateArgs),
    /// DHCPv6 sub-subnet enumeration only
    DhcpEnum(DhcpEnumArgs),
}

#[derive(Debug, Args)]
pub struct HostArgs {
    #[command(flatten)]
    pub common: CommonOpts,

    /// Expand past the target cap
    #[arg(short = 'N', long)]
    pub no_max_check: bool,

    /// Targets: address, range, CIDR or host name; stdin when empty
    pub targets: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PortArgs {
    #[command(flatten)]
    pub common: CommonOpts,

    /// Capture interface
    #[arg(short = 'i', long)]
    pub iface: Option<String>,

    /// Ports: N or N-M, comma separated
    #[arg(short = 'p', long, default_value = defaults::POP_PORTS)]
    pub ports: String,

    /// Expand past the target cap
    #[arg(short = 'N', long)]
    pub no_max_check: bool,

    /// Targets: address, range, CIDR or host name; stdin when empty
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TraceProbe {
    Ping,
    Dns,
    Syn,
    Dhcp,
}

#[derive(Debug, Args)]
pub struct TraceArgs {
    #[command(flatten)]
    pub common: CommonOpts,

    /// Capture interface (dns / syn / dhcp probes)
    #[arg(short = 'i', long)]
    pub iface: Option<String>,

    /// Probe flavor
    #[arg(long, value_enum, default_value_t = TraceProbe::Ping)]
    pub probe: TraceProbe,

    /// First hop limit
    #[arg(short = 'H', long, default_value_t = defaults::TRACEROUTE_HOP)]
    pub hop: u8,

    /// Last hop limit
    #[arg(short = 'l', long, default_value_t = defaults::TRACEROUTE_LIMIT)]
    pub limit: u8,

    /// Destination port of dns / syn probes
    #[arg(long, default_value_t = 53)]
    pub target_port: u16,

    /// Query name of dns probes
    #[arg(long, default_value = "www.google.com")]
    pub name: String,

    /// Relay link address of dhcp probes (defaults to the target)
    #[arg(long)]
    pub linkaddr: Option<String>,

    /// Target address or host name
    pub target: String,
}

#[derive(Debug, Args)]
pub struct OsArgs {
    #[command(flatten)]
    pub common: CommonOpts,

    /// Capture interface
    #[arg(short = 'i', long)]
    pub iface: Option<String>,

    /// A port answering SYN with SYN/ACK
    #[arg(short = 'O', long)]
    pub open_port: Option<u16>,

    /// A port answering SYN with RST
    #[arg(short = 'C', long)]
    pub closed_port: Option<u16>,

    /// Target address or host name
    pub target: String,
}

#[derive(Debug, Args)]
pub struct DnsArgs {
    #[command(flatten)]
    pub common: CommonOpts,

    /// Nibble levels to explore below the base name
    #[arg(short = 'l', long, default_value_t = defaults::DNS_LIMIT)]
    pub limit: u8,

    /// Send non-recursive queries
    #[arg(short = 'N', long)]
    pub no_recursive: bool,

    /// Skip the auto-generated-zone pre-check
    #[arg(short = 'S', long)]
    pub skip_check_autogen: bool,

    /// Query over TCP instead of UDP
    #[arg(long)]
    pub tcp: bool,

    /// Base name ending in ip6.arpa.
    #[arg(default_value = defaults::SUFFIX)]
    pub basename: String,

    /// Nameserver address (defaults to the system resolver)
    pub nameserver: Option<String>,
}

#[derive(Debug, Args)]
pub struct DhcpCommonOpts {
    /// Relay link address (defaults to the target)
    #[arg(long)]
    pub linkaddr: Option<String>,

    /// Solicits per scale measurement
    #[arg(short = 'c', long, default_value_t = defaults::DHCP_SCALE_COUNT)]
    pub count: usize,

    /// Minimal answer ratio for a classification
    #[arg(short = 'L', long, default_value_t = defaults::DHCP_SCALE_LOSSRATE)]
    pub lossrate: f64,
}

#[derive(Debug, Args)]
pub struct DhcpArgs {
    #[command(flatten)]
    pub common: CommonOpts,

    #[command(flatten)]
    pub dhcp: DhcpCommonOpts,

    /// Prefix-length step of the stateless sweep
    #[arg(short = 's', long, default_value_t = defaults::DHCP_LOCATE_STEP)]
    pub step: u8,

    /// Sub-subnet size exponent for enumeration (defaults to the step)
    #[arg(short = 'D', long)]
    pub diff: Option<u8>,

    /// Populated sub-subnets tolerated before scaling is skipped
    #[arg(short = 'l', long, default_value_t = defaults::DHCP_ENUM_LIMIT)]
    pub limit: usize,

    /// Target address or host name
    pub target: String,
}

#[derive(Debug, Args)]
pub struct DhcpPingArgs {
    #[command(flatten)]
    pub common: CommonOpts,

    /// Relay link address (defaults to the target)
    #[arg(long)]
    pub linkaddr: Option<String>,

    /// Target address or host name
    pub target: String,
}

#[derive(Debug, Args)]
pub struct DhcpScaleArgs {
    #[command(flatten)]
    pub common: CommonOpts,

    #[command(flatten)]
    pub dhcp: DhcpCommonOpts,

    /// Target address or host name
    pub target: String,
}

#[derive(Debug, Args)]
pub struct DhcpLocateArgs {
    #[command(flatten)]
    pub common: CommonOpts,

    #[command(flatten)]
    pub dhcp: DhcpCommonOpts,

    /// Target address or host name
    pub target: String,
}

#[derive(Debug, Args)]
pub struct DhcpEnumArgs {
    #[command(flatten)]
    pub common: CommonOpts,

    /// Relay link address (defaults to the target)
    #[arg(long)]
    pub linkaddr: Option<String>,

    /// Prefix length of the enumerated sub-subnets
    #[arg(short = 'P', long)]
    pub plen: u8,

    /// Sub-subnet size exponent
    #[arg(short = 'D', long, default_value_t = defaults::DHCP_LOCATE_STEP)]
    pub diff: u8,

    /// Target address or host name
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_defaults() {
        let cli = Cli::parse_from(["sixscan", "host", "2001:db8::1"]);
        let Command::Host(args) = cli.command else {
            panic!("expected host command");
        };
        assert_eq!(args.common.retry, 2);
        assert_eq!(args.common.timewait, 1.0);
        assert_eq!(args.common.interval, 0.1);
        assert_eq!(args.targets, vec!["2001:db8::1".to_string()]);
    }

    #[test]
    fn test_port_short_flags() {
        let cli = Cli::parse_from([
            "sixscan", "port", "-p", "22,80-90", "-i", "eth0", "-R", "3", "2001:db8::1",
        ]);
        let Command::Port(args) = cli.command else {
            panic!("expected port command");
        };
        assert_eq!(args.ports, "22,80-90");
        assert_eq!(args.iface.as_deref(), Some("eth0"));
        assert_eq!(args.common.retry, 3);
    }

    #[test]
    fn test_trace_probe_variants() {
        let cli = Cli::parse_from([
            "sixscan",
            "trace",
            "--probe",
            "syn",
            "--target-port",
            "443",
            "-l",
            "8",
            "2001:db8::1",
        ]);
        let Command::Trace(args) = cli.command else {
            panic!("expected trace command");
        };
        assert_eq!(args.probe, TraceProbe::Syn);
        assert_eq!(args.target_port, 443);
        assert_eq!(args.limit, 8);
    }

    #[test]
    fn test_os_ports() {
        let cli = Cli::parse_from(["sixscan", "os", "-O", "80", "-C", "81", "2001:db8::1"]);
        let Command::Os(args) = cli.command else {
            panic!("expected os command");
        };
        assert_eq!(args.open_port, Some(80));
        assert_eq!(args.closed_port, Some(81));
    }

    #[test]
    fn test_dhcp_enum_requires_plen() {
        assert!(Cli::try_parse_from(["sixscan", "dhcp-enum", "2001:db8::1"]).is_err());
        let cli = Cli::parse_from(["sixscan", "dhcp-enum", "-P", "64", "2001:db8::1"]);
        let Command::DhcpEnum(args) = cli.command else {
            panic!("expected dhcp-enum command");
        };
        assert_eq!(args.plen, 64);
        assert_eq!(args.diff, 4);
    }
}
