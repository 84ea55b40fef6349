use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use url::Url;
use shared::protocol::{
    MAN_DISCOVER, ROOT_DEVICE_KEY, SSDP_MULTICAST_ADDR, SSDP_PORT, ST_ALL, ST_ROOT_DEVICE,
    ST_URN_PREFIX,
};
use shared::types::{short_type_name, AnnouncementRecord, ScanStats, ServiceAnnouncementIndex};
use super::ScanError;

const RECV_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Where the M-SEARCH is sent, normally the SSDP multicast group
    pub target: SocketAddr,
    /// ST header; ssdp:all when unset
    pub search_target: Option<String>,
    /// Total collection time, also advertised as MX
    pub timeout: Duration,
    pub multicast_ttl: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(SSDP_MULTICAST_ADDR, SSDP_PORT)),
            search_target: None,
            timeout: Duration::from_secs(5),
            multicast_ttl: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub index: ServiceAnnouncementIndex,
    pub stats: ScanStats,
    /// Set when the socket could not be used; the index is empty then
    pub socket_error: Option<String>,
}

/// Where a parsed reply belongs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Accepted { host: String, service: String },
    /// ST is neither urn: nor upnp:rootdevice
    Filtered,
    MissingLocation,
}

/// Send one M-SEARCH and collect the replies until `options.timeout` has elapsed.
///
/// Socket failures are logged and reported through `ScanOutcome::socket_error`;
/// they never abort the caller.
pub async fn scan(options: &ScanOptions) -> ScanOutcome {
    match try_scan(options).await {
        Ok((index, stats)) => {
            tracing::info!(
                "SSDP scan complete: {} replies, {} indexed on {} host(s)",
                stats.replies,
                stats.indexed,
                index.len()
            );
            ScanOutcome {
                index,
                stats,
                socket_error: None,
            }
        }
        Err(e) => {
            tracing::warn!("SSDP scan aborted: {}", e);
            ScanOutcome {
                socket_error: Some(e.to_string()),
                ..Default::default()
            }
        }
    }
}

async fn try_scan(
    options: &ScanOptions,
) -> Result<(ServiceAnnouncementIndex, ScanStats), ScanError> {
    let deadline = Instant::now() + options.timeout;
    let socket = open_socket(options.multicast_ttl)?;

    let st = options.search_target.as_deref().unwrap_or(ST_ALL);
    let probe = build_msearch(options.target, st, options.timeout);
    socket.send_to(probe.as_bytes(), options.target).await?;
    tracing::info!("M-SEARCH sent to {} (ST={})", options.target, st);

    let mut indexer = AnnouncementIndexer::new();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Ok((len, from))) => {
                let data = String::from_utf8_lossy(&buf[..len]);
                tracing::trace!("SSDP reply from {}:\n{}", from, data);
                indexer.ingest(&data);
            }
            Ok(Err(e)) => {
                tracing::debug!("SSDP receive error: {}", e);
            }
        }
    }

    Ok(indexer.finish())
}

/// Ephemeral-port IPv4 socket able to send to the multicast group.
/// Port 1900 is never bound: replies to an M-SEARCH come back unicast.
fn open_socket(multicast_ttl: u32) -> Result<UdpSocket, ScanError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&bind_addr.into())?;
    socket.set_multicast_ttl_v4(multicast_ttl)?;
    socket.set_nonblocking(true)?;

    let socket: std::net::UdpSocket = socket.into();
    tracing::debug!("SSDP socket bound to {}", socket.local_addr()?);
    Ok(UdpSocket::from_std(socket)?)
}

pub fn build_msearch(target: SocketAddr, st: &str, timeout: Duration) -> String {
    // MX must be at least 1
    let mx = timeout.as_secs().max(1);
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: {}\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        target, MAN_DISCOVER, mx, st
    )
}

/// Split a reply into header fields. The status line is discarded.
/// Returns the record and the number of lines that had no colon.
pub fn parse_reply(data: &str) -> (AnnouncementRecord, usize) {
    let mut record = AnnouncementRecord::new();
    let mut malformed_lines = 0;

    for line in data.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => record.insert(name, value),
            _ => {
                tracing::trace!("Skipping header line without name: '{}'", line);
                malformed_lines += 1;
            }
        }
    }

    (record, malformed_lines)
}

pub fn classify(record: &AnnouncementRecord) -> Result<Announcement, ScanError> {
    let st = record
        .st()
        .ok_or_else(|| ScanError::MalformedAnnouncement("missing ST header".to_string()))?;

    let service = if st.starts_with(ST_URN_PREFIX) {
        short_type_name(st)
            .ok_or_else(|| ScanError::MalformedAnnouncement(format!("ST without type: {}", st)))?
            .to_string()
    } else if st.starts_with(ST_ROOT_DEVICE) {
        ROOT_DEVICE_KEY.to_string()
    } else {
        return Ok(Announcement::Filtered);
    };

    let Some(location) = record.location() else {
        return Ok(Announcement::MissingLocation);
    };

    Ok(Announcement::Accepted {
        host: location_host(location)?,
        service,
    })
}

/// Host part of a LOCATION URL, without port or IPv6 brackets
pub fn location_host(location: &str) -> Result<String, ScanError> {
    let url = Url::parse(location)
        .map_err(|e| ScanError::MalformedAnnouncement(format!("LOCATION {}: {}", location, e)))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ScanError::MalformedAnnouncement(format!("LOCATION without host: {}", location)))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

/// Accumulates replies into a `ServiceAnnouncementIndex`.
/// The first record indexed for a (host, service) pair is kept.
#[derive(Debug, Default)]
pub struct AnnouncementIndexer {
    index: ServiceAnnouncementIndex,
    stats: ScanStats,
}

impl AnnouncementIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and index one datagram. Returns the (host, service) key when it was indexed.
    pub fn ingest(&mut self, data: &str) -> Option<(String, String)> {
        self.stats.replies += 1;
        let (record, malformed_lines) = parse_reply(data);
        self.stats.malformed_lines += malformed_lines;

        match classify(&record) {
            Err(e) => {
                tracing::debug!("Dropping SSDP reply: {}", e);
                self.stats.malformed += 1;
                None
            }
            Ok(Announcement::Filtered) => {
                self.stats.filtered += 1;
                None
            }
            Ok(Announcement::MissingLocation) => {
                tracing::debug!("Dropping SSDP reply without LOCATION (ST={:?})", record.st());
                self.stats.missing_location += 1;
                None
            }
            Ok(Announcement::Accepted { host, service }) => {
                let services = self.index.entry(host.clone()).or_default();
                if services.contains_key(&service) {
                    self.stats.duplicates += 1;
                    return None;
                }
                tracing::debug!("Indexed {} on {}", service, host);
                services.insert(service.clone(), record);
                self.stats.indexed += 1;
                Some((host, service))
            }
        }
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn finish(self) -> (ServiceAnnouncementIndex, ScanStats) {
        (self.index, self.stats)
    }
}
