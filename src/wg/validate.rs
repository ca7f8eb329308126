//! Input validation for keys and addresses supplied by callers

use std::net::IpAddr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::{Error, Result};

/// Check that `key` is a base64-encoded 32-byte WireGuard key
pub fn validate_public_key(key: &str) -> Result<()> {
    if key.len() != 44 || !key.ends_with('=') {
        return Err(Error::InvalidPublicKey);
    }
    match BASE64.decode(key) {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        _ => Err(Error::InvalidPublicKey),
    }
}

/// Check that `cidr` is an address with an optional, in-range prefix length
pub fn validate_cidr(cidr: &str) -> Result<()> {
    let invalid = || Error::InvalidCidr(cidr.to_string());

    let (addr, prefix) = match cidr.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (cidr, None),
    };
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };

    if let Some(prefix) = prefix {
        let bits: u8 = prefix.parse().map_err(|_| invalid())?;
        if bits > max {
            return Err(invalid());
        }
    }
    Ok(())
}
