//! Tunnel address allocation

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

use super::PeerRecord;
use crate::config::host_in_subnet;
use crate::error::{Error, Result};

/// Host offsets handed out to provisioned peers
pub type AllocationRange = RangeInclusive<u32>;

/// .1 is the gateway/DNS and .2 the admin peer; provisioned peers start at .10
pub const ALLOCATION_RANGE: AllocationRange = 10..=199;

/// First free `/32` in the allocation range, scanning upwards.
///
/// `peers` must come from a fresh dump so addresses released by a removal
/// are reused and addresses taken moments ago are not.
pub fn allocate(subnet_base: Option<Ipv4Addr>, peers: &[PeerRecord]) -> Result<String> {
    let base = subnet_base.ok_or(Error::SubnetNotConfigured)?;

    let used: HashSet<&str> = peers.iter().flat_map(|p| p.assigned_ips()).collect();

    ALLOCATION_RANGE
        .clone()
        .map(|host| host_in_subnet(base, host).to_string())
        .find(|candidate| !used.contains(candidate.as_str()))
        .map(|ip| format!("{}/32", ip))
        .ok_or(Error::AddressPoolExhausted {
            first: *ALLOCATION_RANGE.start(),
            last: *ALLOCATION_RANGE.end(),
        })
}
