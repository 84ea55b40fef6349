use std::net::Ipv4Addr;

/// SSDP multicast group
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// SSDP port
pub const SSDP_PORT: u16 = 1900;

/// Search target matching every device and service
pub const ST_ALL: &str = "ssdp:all";

/// MAN header value of an M-SEARCH
pub const MAN_DISCOVER: &str = "\"ssdp:discover\"";

/// ST prefix of root device announcements
pub const ST_ROOT_DEVICE: &str = "upnp:rootdevice";

/// ST prefix of typed device and service announcements
pub const ST_URN_PREFIX: &str = "urn:";

/// Index key used for root device announcements
pub const ROOT_DEVICE_KEY: &str = "rootdevice";

/// Header names read from search responses (stored upper-cased)
pub const HEADER_ST: &str = "ST";
pub const HEADER_LOCATION: &str = "LOCATION";
pub const HEADER_USN: &str = "USN";
pub const HEADER_SERVER: &str = "SERVER";

/// API path prefix
pub const API_PREFIX: &str = "/v1";
