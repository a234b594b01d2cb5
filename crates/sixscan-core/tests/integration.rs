//! Integration tests for sixscan-core

use sixscan_core::*;
use std::net::Ipv6Addr;

#[test]
fn test_expand_mixed_specs() {
    let specs = vec![
        "2001:db8::8".to_string(),
        "2001:db8::1-2001:db8::4".to_string(),
        "2001:db8:1::/126".to_string(),
    ];
    let addrs = expand_addrs(&specs, false).unwrap();
    // 1 single + 3 from the range + 4 from the CIDR
    assert_eq!(addrs.len(), 8);
    assert!(addrs.contains(&"2001:db8::8".parse::<Ipv6Addr>().unwrap()));
    assert!(addrs.contains(&"2001:db8::3".parse::<Ipv6Addr>().unwrap()));
    assert!(!addrs.contains(&"2001:db8::4".parse::<Ipv6Addr>().unwrap()));
    assert!(addrs.contains(&"2001:db8:1::3".parse::<Ipv6Addr>().unwrap()));
}

#[test]
fn test_expand_overlapping_specs_collapse() {
    let specs = vec![
        "2001:db8::/126".to_string(),
        "2001:db8::1-2001:db8::3".to_string(),
    ];
    let addrs = expand_addrs(&specs, false).unwrap();
    assert_eq!(addrs.len(), 4);
}

#[test]
fn test_pop_ports_expand() {
    let specs: Vec<String> = defaults::POP_PORTS.split(',').map(str::to_string).collect();
    let ports = expand_ports(&specs).unwrap();
    assert_eq!(ports.len(), 25);
    assert!(ports.contains(&3389));
}

#[test]
fn test_scale_pipeline_linear_pool() {
    // An arithmetic advertise sequence classifies linear and its acceptance
    // range drives the prefix search.
    let base = u128::from("2001:db8::10".parse::<Ipv6Addr>().unwrap());
    let addrs: Vec<u128> = (0..0x28).map(|i| base + i).collect();
    let scale = PoolScale::classify(&addrs).unwrap();
    assert_eq!(scale.kind, ScaleKind::Linear);
    assert_eq!(scale.d, 1);

    let (lo, hi) = scale.accept_range();
    assert_eq!(lo, base + 0x27);
    assert_eq!(hi, base + 0x27 + 128);
    assert!(scale.accepts(base + 0x30));
    assert!(!scale.accepts(base));

    let mut search = PrefixSearch::new();
    while !search.done() {
        search.note(search.mid() >= 120);
    }
    assert_eq!(search.result(), 120);
}

#[test]
fn test_config_json_roundtrip() {
    let config = ScanConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let loaded: ScanConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(config.timing.retry, loaded.timing.retry);
    assert_eq!(config.count, loaded.count);
    assert_eq!(config.sweep.step, loaded.sweep.step);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_select_plen_priority_pinned() {
    // In-limit populations outrank a single response near 64, which
    // outranks everything above the limit; 64 is the fallback.
    let samples = [(40u8, 5usize), (60, 1), (80, 14)];
    assert_eq!(select_plen(&samples, 4, 0.5).unwrap(), 40);
    let samples = [(60u8, 1usize), (80, 14)];
    assert_eq!(select_plen(&samples, 4, 0.5).unwrap(), 60);
    let samples = [(40u8, 0usize), (80, 14)];
    assert_eq!(select_plen(&samples, 4, 0.5).unwrap(), 80);
    let samples = [(40u8, 0usize), (80, 0)];
    assert_eq!(select_plen(&samples, 4, 0.5).unwrap(), 64);
}
