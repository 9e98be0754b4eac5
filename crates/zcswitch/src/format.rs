//! Output formatting for discovery results.

use serde_json::json;
use zcswitch_discover::{DomainLookup, ListenerEvent, ServiceAnnouncement, ZeroconfHost};

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Format the hosts returned by a resolve.
pub fn hosts(hosts: &[ZeroconfHost], format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(hosts)?),
        OutputFormat::Text => {
            if hosts.is_empty() {
                return Ok("No hosts found.".to_string());
            }
            let mut out = String::new();
            for host in hosts {
                out.push_str(&host.to_string());
                out.push_str("\n\n");
            }
            out.push_str(&format!("{} host(s)", hosts.len()));
            Ok(out)
        }
    }
}

/// Format a service-domain lookup, one group per service domain.
pub fn lookup(lookup: &DomainLookup, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(lookup)?),
        OutputFormat::Text => {
            if lookup.is_empty() {
                return Ok("No service domains found.".to_string());
            }
            let lines: Vec<String> = lookup
                .iter()
                .flat_map(|(domain, rows)| {
                    std::iter::once(domain.to_string())
                        .chain(rows.iter().map(|row| format!("  {row}")))
                })
                .collect();
            Ok(lines.join("\n"))
        }
    }
}

/// Format a single announcement as one line (JSON) or a host block (text).
pub fn announcement(announcement: &ServiceAnnouncement, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(announcement)?),
        OutputFormat::Text => Ok(announcement.to_string()),
    }
}

/// Format a listener event.
pub fn listener_event(event: &ListenerEvent, format: OutputFormat) -> anyhow::Result<String> {
    let (kind, host) = match event {
        ListenerEvent::Found(host) => ("found", host),
        ListenerEvent::Lost(host) => ("lost", host),
    };
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(&json!({
            "event": kind,
            "host": host,
        }))?),
        OutputFormat::Text => {
            let marker = if kind == "found" { '+' } else { '-' };
            Ok(format!("{marker} {host}"))
        }
    }
}
