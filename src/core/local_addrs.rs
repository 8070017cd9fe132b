//! Host address enumeration for the snapshot's local-address list.
//!
//! Informational only: the list tells a reader which snapshot addresses are
//! this host's own. Enumeration failure degrades to the loopback entries
//! rather than failing capture start.

use sysinfo::Networks;

/// Collect the host's IPv4 and IPv6 addresses, deduplicated and sorted.
/// Loopback addresses are always included.
pub fn local_ip_addresses() -> Vec<String> {
    let mut ips = vec!["127.0.0.1".to_string(), "::1".to_string()];

    let networks = Networks::new_with_refreshed_list();
    for (_name, data) in networks.iter() {
        for network in data.ip_networks() {
            ips.push(network.addr.to_string());
        }
    }

    ips.sort();
    ips.dedup();
    ips
}
