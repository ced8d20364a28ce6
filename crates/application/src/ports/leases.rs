use std::net::IpAddr;

/// Contract with the embedded DHCP server.
///
/// The core only consumes hostname-for-IP and MAC-for-IP lookups; the lease
/// table itself is an external collaborator.
pub trait LeaseLookup: Send + Sync {
    fn hostname_for_ip(&self, ip: IpAddr) -> Option<String>;
    fn mac_for_ip(&self, ip: IpAddr) -> Option<String>;
}

/// No-DHCP stand-in.
pub struct NoLeases;

impl LeaseLookup for NoLeases {
    fn hostname_for_ip(&self, _ip: IpAddr) -> Option<String> {
        None
    }

    fn mac_for_ip(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}
