//! Country lookup for reported hosts.
use std::net::IpAddr;
use std::path::Path;

use log::{info, warn};
use maxminddb::{geoip2, Reader};
use parking_lot::Mutex;

/// Returned whenever no country is known.
pub const UNAVAILABLE: &str = "N/A";

/// Maps an address to an ISO country code. Implementations must never fail;
/// anything that goes wrong is reported as [`UNAVAILABLE`].
pub trait GeoLookup: Send + Sync {
    fn country_of(&self, ip: IpAddr) -> String;
}

/// Lookup that knows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeo;

impl GeoLookup for NoGeo {
    fn country_of(&self, _ip: IpAddr) -> String {
        UNAVAILABLE.to_owned()
    }
}

/// Lookup backed by a MaxMind country database.
///
/// Calls are serialized through one lock; the reader is not shared between
/// concurrent lookups.
pub struct MaxMindGeo {
    reader: Option<Mutex<Reader<Vec<u8>>>>,
}

impl MaxMindGeo {
    /// Opens the database at `path`. A missing or broken file leaves the
    /// lookup disabled instead of failing the scan.
    pub fn open(path: &Path) -> Self {
        match Reader::open_readfile(path) {
            Ok(reader) => {
                info!("Enabled GeoIP from {}", path.display());
                Self {
                    reader: Some(Mutex::new(reader)),
                }
            }
            Err(e) => {
                warn!("Cannot open {}: {e}", path.display());
                Self { reader: None }
            }
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.reader.is_some()
    }
}

impl GeoLookup for MaxMindGeo {
    fn country_of(&self, ip: IpAddr) -> String {
        let Some(reader) = &self.reader else {
            return UNAVAILABLE.to_owned();
        };
        let reader = reader.lock();
        match reader.lookup::<geoip2::Country>(ip) {
            Ok(country) => country
                .country
                .and_then(|c| c.iso_code)
                .map_or_else(|| UNAVAILABLE.to_owned(), str::to_owned),
            // not in the database
            Err(_) => UNAVAILABLE.to_owned(),
        }
    }
}
