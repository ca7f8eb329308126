//! IP geolocation for log annotations

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::OnceLock;

use maxminddb::{geoip2, Reader};

/// Resolves an IP to a short display string, empty when unknown
pub trait GeoLookup: Send + Sync {
    fn describe(&self, ip: &str) -> String;
}

/// Geolocation disabled
pub struct NoGeo;

impl GeoLookup for NoGeo {
    fn describe(&self, _ip: &str) -> String {
        String::new()
    }
}

/// MaxMind City database, opened on the first lookup that finds it
pub struct GeoIp {
    path: PathBuf,
    reader: OnceLock<Reader<Vec<u8>>>,
}

impl GeoIp {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            reader: OnceLock::new(),
        }
    }

    /// Only a successfully opened database is kept; a missing one is retried next lookup
    fn reader(&self) -> Option<&Reader<Vec<u8>>> {
        if let Some(reader) = self.reader.get() {
            return Some(reader);
        }
        if !self.path.exists() {
            tracing::debug!("GeoIP database {:?} not present", self.path);
            return None;
        }
        match Reader::open_readfile(&self.path) {
            Ok(reader) => {
                if self.reader.set(reader).is_ok() {
                    tracing::info!("GeoIP database loaded from {:?}", self.path);
                }
                self.reader.get()
            }
            Err(e) => {
                tracing::warn!("Failed to open GeoIP database {:?}: {}", self.path, e);
                None
            }
        }
    }
}

impl GeoLookup for GeoIp {
    fn describe(&self, ip: &str) -> String {
        let Some(reader) = self.reader() else {
            return String::new();
        };
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return String::new();
        };
        let city: geoip2::City = match reader.lookup(addr) {
            Ok(city) => city,
            Err(_) => return String::new(),
        };

        let iso = city.country.as_ref().and_then(|c| c.iso_code);
        let name = city
            .city
            .and_then(|c| c.names)
            .and_then(|n| n.get("en").copied());

        match iso {
            Some(iso) => format_location(iso, name),
            None => String::new(),
        }
    }
}

/// Regional-indicator flag for a two-letter country code
pub fn flag(iso: &str) -> Option<String> {
    let bytes = iso.as_bytes();
    if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_alphabetic) {
        return None;
    }
    bytes
        .iter()
        .map(|b| char::from_u32(b.to_ascii_uppercase() as u32 + 127_397))
        .collect()
}

/// "🇩🇪 DE · Berlin", or "🇩🇪 DE" without a city
pub fn format_location(iso: &str, city: Option<&str>) -> String {
    let Some(flag) = flag(iso) else {
        return String::new();
    };
    match city {
        Some(city) if !city.is_empty() => format!("{} {} · {}", flag, iso, city),
        _ => format!("{} {}", flag, iso),
    }
}
