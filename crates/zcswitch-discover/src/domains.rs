//! Domain browsing: reshaping resolved hosts into a service-domain lookup.
//!
//! Browsing is not a separate wire operation. A browse resolves a list of
//! service types and expands every host into one row per service and
//! address, grouped by the service key.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::backend::DomainCallback;
use crate::host::{service_type, ZeroconfHost};

/// Ordered multimap from service domain to `"<ip>: <service type>"` rows.
///
/// Keys keep first-seen order, and values keep insertion order within a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainLookup {
    entries: Vec<(String, Vec<String>)>,
    index: HashMap<String, usize>,
}

impl DomainLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1.push(value.into()),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, vec![value.into()]));
            }
        }
    }

    /// Values for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.index.get(key).map(|&i| self.entries[i].1.as_slice())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Groups in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of rows across all keys.
    pub fn row_count(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).sum()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DomainLookup {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut lookup = DomainLookup::new();
        for (k, v) in iter {
            lookup.push(k, v);
        }
        lookup
    }
}

impl IntoIterator for DomainLookup {
    type Item = (String, Vec<String>);
    type IntoIter = std::vec::IntoIter<(String, Vec<String>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for DomainLookup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, values) in &self.entries {
            map.serialize_entry(key, values)?;
        }
        map.end()
    }
}

/// Format one lookup row.
pub fn domain_row(ip: &IpAddr, service_name: &str) -> String {
    format!("{}: {}", ip, service_type(service_name, false))
}

/// Expand hosts into a domain lookup.
///
/// Every host contributes one row per (service, address) pair. The callback
/// is invoked once per row, before grouping, with the service key and the
/// address.
pub fn expand_hosts(hosts: &[ZeroconfHost], callback: Option<&DomainCallback>) -> DomainLookup {
    let mut lookup = DomainLookup::new();
    for host in hosts {
        for (key, service) in host.services() {
            for ip in host.ip_addresses() {
                if let Some(callback) = callback {
                    callback(key, ip);
                }
                lookup.push(key.as_str(), domain_row(ip, &service.name));
            }
        }
    }
    lookup
}
