//! JSON serialization of scan results
//!
//! Raw packet bytes serialize as base64; addresses as canonical IPv6 text.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use sixscan_core::types::{DhcpInfo, SubnetScales};
use sixscan_core::{PoolScale, PortState, TraceHop};
use sixscan_scanner::os::OsFingerprint;
use std::net::Ipv6Addr;

pub fn host_json(results: &[(Ipv6Addr, bool)]) -> Value {
    Value::Array(
        results
            .iter()
            .map(|(addr, alive)| json!([addr.to_string(), alive]))
            .collect(),
    )
}

pub fn port_json(results: &[(Ipv6Addr, u16, PortState)]) -> Value {
    Value::Array(
        results
            .iter()
            .map(|(addr, port, state)| json!([addr.to_string(), port, state.to_string()]))
            .collect(),
    )
}

pub fn trace_json(hops: &[TraceHop]) -> Value {
    Value::Array(
        hops.iter()
            .map(|hop| {
                let addr = hop.addr.map(|a| a.to_string()).unwrap_or_default();
                let reason = hop.reason.map(|r| r.as_str().to_string()).unwrap_or_default();
                json!([hop.hop, addr, reason, hop.arrived])
            })
            .collect(),
    )
}

pub fn os_json(fingerprint: &OsFingerprint) -> Value {
    Value::Object(
        fingerprint
            .iter()
            .map(|(name, packet)| {
                let encoded = match packet {
                    Some(bytes) => Value::String(BASE64.encode(bytes)),
                    None => Value::Null,
                };
                (name.clone(), encoded)
            })
            .collect(),
    )
}

pub fn dns_json(names: &[String]) -> Value {
    json!(names)
}

fn scale_json(scale: &PoolScale) -> Value {
    json!({
        "t": scale.kind.as_str(),
        "a1": Ipv6Addr::from(scale.a1).to_string(),
        "a2": Ipv6Addr::from(scale.a2).to_string(),
        "d": scale.d.to_string(),
    })
}

fn scales_json(scales: &SubnetScales) -> Value {
    Value::Object(
        scales
            .iter()
            .map(|(kind, scale)| {
                let value = match scale {
                    Some(scale) => scale_json(scale),
                    None => Value::Null,
                };
                (kind.as_str().to_string(), value)
            })
            .collect(),
    )
}

pub fn dhcp_json(info: &DhcpInfo) -> Value {
    let subnets: serde_json::Map<String, Value> = info
        .subnets
        .iter()
        .map(|(addr, scales)| {
            let value = match scales {
                Some(scales) => scales_json(scales),
                None => Value::Null,
            };
            (addr.to_string(), value)
        })
        .collect();
    json!({
        "target": info.target.to_string(),
        "linkaddr": info.linkaddr.to_string(),
        "plen": info.plen,
        "reply": BASE64.encode(&info.reply),
        "advertise": BASE64.encode(&info.advertise),
        "kind": info.kind.as_str(),
        "subnets": Value::Object(subnets),
    })
}

pub fn dhcp_ping_json(reply: Option<&[u8]>, advertise: Option<&[u8]>) -> Value {
    let encode = |bytes: Option<&[u8]>| match bytes {
        Some(bytes) => Value::String(BASE64.encode(bytes)),
        None => Value::Null,
    };
    json!({
        "reply": encode(reply),
        "advertise": encode(advertise),
    })
}

pub fn dhcp_scale_json(scales: &SubnetScales) -> Value {
    scales_json(scales)
}

pub fn dhcp_locate_json(plen: u8, scales: &SubnetScales) -> Value {
    json!({
        "plen": plen,
        "scale": scales_json(scales),
    })
}

pub fn dhcp_enum_json(answers: &[(Ipv6Addr, Option<Vec<u8>>)]) -> Value {
    Value::Object(
        answers
            .iter()
            .map(|(addr, advertise)| {
                let value = match advertise {
                    Some(bytes) => Value::String(BASE64.encode(bytes)),
                    None => Value::Null,
                };
                (addr.to_string(), value)
            })
            .collect(),
    )
}
