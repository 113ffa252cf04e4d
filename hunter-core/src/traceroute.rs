//! Traceroute hops and last-hop selection.

use std::collections::HashSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{HuntError, Result};
use crate::geo::GeoPoint;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    /// TTL of the hop, starting at 1.
    pub position: u32,
    /// One entry per probe packet; `None` when the packet got no reply.
    pub replies: Vec<Option<IpAddr>>,
}

impl Hop {
    pub fn new(position: u32, replies: Vec<Option<IpAddr>>) -> Self {
        Self { position, replies }
    }

    /// Distinct replying addresses in first-seen order.
    pub fn addresses(&self) -> Vec<IpAddr> {
        let mut seen = HashSet::new();
        self.replies
            .iter()
            .flatten()
            .filter(|ip| seen.insert(**ip))
            .copied()
            .collect()
    }

    pub fn is_unresponsive(&self) -> bool {
        self.replies.iter().all(Option::is_none)
    }

    /// Probes of the same hop came back from different routers.
    pub fn is_ambiguous(&self) -> bool {
        self.addresses().len() > 1
    }

    /// The hop's single replying address, if it has exactly one.
    pub fn address(&self) -> Option<IpAddr> {
        match self.addresses().as_slice() {
            [ip] => Some(*ip),
            _ => None,
        }
    }
}

/// Policy deciding whether a router address is anycast.
pub trait AnycastCheck {
    fn is_anycast(&self, addr: &IpAddr) -> bool;
}

/// Treats no address as anycast.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnycast;

impl AnycastCheck for NoAnycast {
    fn is_anycast(&self, _addr: &IpAddr) -> bool {
        false
    }
}

/// A fixed list of known anycast addresses.
#[derive(Debug, Clone, Default)]
pub struct AnycastList(HashSet<IpAddr>);

impl AnycastList {
    pub fn new<I: IntoIterator<Item = IpAddr>>(addrs: I) -> Self {
        Self(addrs.into_iter().collect())
    }
}

impl AnycastCheck for AnycastList {
    fn is_anycast(&self, addr: &IpAddr) -> bool {
        self.0.contains(addr)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastHop {
    pub address: IpAddr,
    /// Position in the hop list.
    pub index: usize,
    /// Distance from the final hop, 0 being the final hop itself.
    pub from_end: usize,
    pub geolocation: Option<GeoPoint>,
}

/// Scans the hops from the end for the last router worth geolocating.
pub fn select_last_hop(
    hops: &[Hop],
    target: IpAddr,
    anycast: &dyn AnycastCheck,
) -> Result<LastHop> {
    for (from_end, hop) in hops.iter().rev().enumerate() {
        let index = hops.len() - 1 - from_end;
        if hop.is_unresponsive() {
            debug!(index, "skipping unresponsive hop");
            continue;
        }
        let Some(address) = hop.address() else {
            debug!(index, "skipping hop with disagreeing replies");
            continue;
        };
        if address == target {
            debug!(index, "skipping hop equal to target");
            continue;
        }
        if anycast.is_anycast(&address) {
            debug!(index, %address, "skipping anycast hop");
            continue;
        }
        return Ok(LastHop {
            address,
            index,
            from_end,
            geolocation: None,
        });
    }
    Err(HuntError::NoValidLastHop { hops: hops.len() })
}

#[derive(Debug, Deserialize)]
struct RawTraceroute {
    prb_id: u64,
    result: Vec<RawHop>,
}

#[derive(Debug, Deserialize)]
struct RawHop {
    hop: Option<u32>,
    #[serde(default)]
    result: Vec<Value>,
}

/// Decodes platform traceroute results into the hop list of the first
/// well-formed probe result. Malformed entries are skipped.
pub fn decode_platform_traceroute(results: &[Value]) -> Result<Vec<Hop>> {
    for raw in results {
        let parsed: RawTraceroute = match serde_json::from_value(raw.clone()) {
            Ok(p) => p,
            Err(err) => {
                warn!("{}", HuntError::malformed(format!("traceroute result: {err}")));
                continue;
            }
        };
        debug!(probe = parsed.prb_id, hops = parsed.result.len(), "decoding traceroute");
        let hops = parsed
            .result
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let position = h.hop.unwrap_or(i as u32 + 1);
                let mut replies: Vec<Option<IpAddr>> =
                    h.result.iter().filter_map(|r| decode_reply(position, r)).collect();
                if replies.is_empty() {
                    replies.push(None);
                }
                Hop::new(position, replies)
            })
            .collect();
        return Ok(hops);
    }
    Err(HuntError::malformed("no usable traceroute result"))
}

fn decode_reply(position: u32, reply: &Value) -> Option<Option<IpAddr>> {
    if let Some(from) = reply.get("from").and_then(Value::as_str) {
        match from.parse::<IpAddr>() {
            Ok(ip) => return Some(Some(ip)),
            Err(_) => {
                warn!("{}", HuntError::malformed(format!("hop {position}: bad address {from}")));
                return None;
            }
        }
    }
    if reply.get("x").is_some() {
        return Some(None);
    }
    warn!("{}", HuntError::malformed(format!("hop {position}: reply without from or x")));
    None
}

/// Decodes the text printed by a system `traceroute` run. The header line
/// is skipped; every parenthesised address on a line is one reply.
pub fn parse_host_traceroute(output: &str) -> Vec<Hop> {
    output
        .lines()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            let position = line
                .split_whitespace()
                .next()
                .and_then(|t| t.parse::<u32>().ok())
                .unwrap_or(i as u32 + 1);
            let mut replies: Vec<Option<IpAddr>> = line
                .split('(')
                .skip(1)
                .filter_map(|chunk| chunk.split(')').next())
                .filter_map(|s| s.trim().parse::<IpAddr>().ok())
                .map(Some)
                .collect();
            if replies.is_empty() {
                replies.push(None);
            }
            Hop::new(position, replies)
        })
        .collect()
}
