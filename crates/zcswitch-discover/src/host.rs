//! Discovered host and service types.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// TTL reported for services whose backend does not expose record TTLs.
pub const DEFAULT_SERVICE_TTL: u32 = 120;

/// A service advertised by a discovered host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    /// Full instance name (e.g., "Office Printer._ipp._tcp.local.").
    pub name: String,
    /// Port the service listens on.
    pub port: u16,
    /// Record time-to-live in seconds.
    pub ttl: u32,
    /// TXT record property sets.
    pub properties: Vec<BTreeMap<String, String>>,
}

impl Service {
    /// Create a service with no TXT properties.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            ttl: DEFAULT_SERVICE_TTL,
            properties: Vec::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Add a TXT property set.
    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties.push(properties);
        self
    }

    /// The DNS-SD service type of this service's instance name.
    pub fn service_type(&self, include_delimiter: bool) -> String {
        service_type(&self.name, include_delimiter)
    }
}

/// A discovered network node and the services it advertises.
///
/// Values are immutable once a backend returns them. Build them with
/// [`ZeroconfHost::builder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZeroconfHost {
    id: String,
    display_name: String,
    ip_addresses: Vec<IpAddr>,
    #[serde(serialize_with = "services_as_map")]
    services: Vec<(String, Service)>,
}

impl ZeroconfHost {
    /// Start building a host with the given identifier.
    pub fn builder(id: impl Into<String>) -> ZeroconfHostBuilder {
        let id = id.into();
        ZeroconfHostBuilder {
            host: ZeroconfHost {
                display_name: id.clone(),
                id,
                ip_addresses: Vec::new(),
                services: Vec::new(),
            },
        }
    }

    /// Stable host identifier (host name, or first address when unnamed).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name, usually the first service instance name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Addresses of the host, in discovery order, without duplicates.
    pub fn ip_addresses(&self) -> &[IpAddr] {
        &self.ip_addresses
    }

    /// Services keyed by service type and domain (e.g., "_http._tcp.local."),
    /// in the order they were discovered.
    pub fn services(&self) -> &[(String, Service)] {
        &self.services
    }

    /// The service registered under `key`.
    pub fn service(&self, key: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, service)| service)
    }
}

fn services_as_map<S: Serializer>(
    services: &[(String, Service)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(services.len()))?;
    for (key, service) in services {
        map.serialize_entry(key, service)?;
    }
    map.end()
}

impl fmt::Display for ZeroconfHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addresses: Vec<String> = self.ip_addresses.iter().map(|ip| ip.to_string()).collect();
        write!(
            f,
            "{} ({}) [{}]",
            self.display_name,
            self.id,
            addresses.join(", ")
        )?;
        for (key, service) in &self.services {
            write!(f, "\n  {} -> {}:{}", key, service.name, service.port)?;
            for set in &service.properties {
                for (k, v) in set {
                    write!(f, "\n    {k}={v}")?;
                }
            }
        }
        Ok(())
    }
}

/// Builder for [`ZeroconfHost`].
#[derive(Debug, Clone)]
pub struct ZeroconfHostBuilder {
    host: ZeroconfHost,
}

impl ZeroconfHostBuilder {
    /// Set the display name.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.host.display_name = name.into();
        self
    }

    /// Add an address. Duplicates are ignored.
    pub fn address(mut self, ip: IpAddr) -> Self {
        if !self.host.ip_addresses.contains(&ip) {
            self.host.ip_addresses.push(ip);
        }
        self
    }

    /// Add several addresses. Duplicates are ignored.
    pub fn addresses(self, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        ips.into_iter().fold(self, |builder, ip| builder.address(ip))
    }

    /// Add a service under the given key. The first service for a key wins.
    pub fn service(mut self, key: impl Into<String>, service: Service) -> Self {
        let key = key.into();
        if self.host.service(&key).is_none() {
            self.host.services.push((key, service));
        }
        self
    }

    pub fn build(self) -> ZeroconfHost {
        self.host
    }
}

/// A single unsolicited service announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceAnnouncement {
    /// Service type the announcement was received for.
    pub service_type: String,
    /// The announcing host.
    pub host: ZeroconfHost,
}

impl fmt::Display for ServiceAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.service_type, self.host)
    }
}

/// A resolved service instance as reported by a backend, before grouping
/// into hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DiscoveredService {
    pub fullname: String,
    pub ty_domain: String,
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub properties: BTreeMap<String, String>,
}

impl DiscoveredService {
    /// Instance label of the full name: "My Server._http._tcp.local." -> "My Server".
    pub fn instance_name(&self) -> &str {
        self.fullname
            .strip_suffix(self.ty_domain.as_str())
            .map(|s| s.trim_end_matches('.'))
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.fullname)
    }

    fn host_id(&self) -> String {
        let hostname = self.hostname.trim_end_matches('.');
        if !hostname.is_empty() {
            return hostname.to_string();
        }
        self.addresses
            .first()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| self.fullname.clone())
    }
}

/// Group resolved service instances into hosts, preserving first-seen host
/// order.
pub(crate) fn group_into_hosts(records: Vec<DiscoveredService>) -> Vec<ZeroconfHost> {
    let mut builders: Vec<(String, ZeroconfHostBuilder)> = Vec::new();

    for record in records {
        let id = record.host_id();
        let index = match builders.iter().position(|(existing, _)| *existing == id) {
            Some(index) => index,
            None => {
                let builder = ZeroconfHost::builder(id.clone()).display_name(record.instance_name());
                builders.push((id, builder));
                builders.len() - 1
            }
        };

        let mut service = Service::new(record.fullname.clone(), record.port);
        if !record.properties.is_empty() {
            service = service.with_properties(record.properties.clone());
        }

        let (_, builder) = &mut builders[index];
        *builder = builder
            .clone()
            .addresses(record.addresses.iter().copied())
            .service(record.ty_domain.clone(), service);
    }

    builders.into_iter().map(|(_, b)| b.build()).collect()
}

/// Extract the DNS-SD service type from a service or instance name.
///
/// The service type is the run of `_`-prefixed labels ending at the
/// transport label (`_tcp` or `_udp`). With `include_delimiter` the `.`
/// separating the type from the domain is kept. Names without a transport
/// label are returned unchanged.
///
/// ```
/// use zcswitch_discover::service_type;
///
/// assert_eq!(service_type("Office._ipp._tcp.local.", false), "_ipp._tcp");
/// assert_eq!(service_type("Office._ipp._tcp.local.", true), "_ipp._tcp.");
/// assert_eq!(service_type("printer._tcp.local.", false), "_tcp");
/// ```
pub fn service_type(name: &str, include_delimiter: bool) -> String {
    let labels: Vec<&str> = name.split('.').collect();
    let Some(transport) = labels
        .iter()
        .position(|l| l.eq_ignore_ascii_case("_tcp") || l.eq_ignore_ascii_case("_udp"))
    else {
        return name.to_string();
    };

    let mut start = transport;
    while start > 0 && labels[start - 1].starts_with('_') {
        start -= 1;
    }

    let mut ty = labels[start..=transport].join(".");
    if include_delimiter {
        ty.push('.');
    }
    ty
}
