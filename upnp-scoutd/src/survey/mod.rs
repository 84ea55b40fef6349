//! End-to-end discovery: SSDP scan, root descriptors, device merge and
//! capability enrichment.

mod builder;

use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use url::Url;
use shared::types::{
    ActionRecord, DiscoveryResult, ScanStats, ServiceAnnouncementIndex, SkipReason,
    SkipStage, Skipped,
};
use crate::descriptor::{self, DescriptorError, DeviceList};
use crate::fetch::{DescriptorFetcher, FetchError, HttpFetcher};
use crate::ssdp::{self, ScanOptions};

pub use builder::{CapabilityPlan, CapabilityTarget, DiscoveryBuilder, MergeStats};

#[derive(Debug, thiserror::Error)]
pub enum SurveyError {
    #[error("invalid host filter {0:?}: expected an IP address or host name")]
    InvalidHostFilter(String),

    #[error("invalid search target {0:?}")]
    InvalidSearchTarget(String),
}

#[derive(Debug, Clone)]
pub struct SurveySettings {
    pub scan: ScanOptions,
    /// Timeout of every descriptor request
    pub fetch_timeout: Duration,
    /// Descriptor requests in flight at once
    pub concurrency: usize,
}

impl Default for SurveySettings {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            fetch_timeout: Duration::from_secs(3),
            concurrency: 8,
        }
    }
}

/// Host selected by a discovery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostFilter {
    /// Compared as an address, so `::1` matches a LOCATION of `[::1]`
    Ip(IpAddr),
    /// Lower-cased host name, for LOCATIONs that do not use an address
    Name(String),
}

impl HostFilter {
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostFilter::Ip(ip) => host.parse::<IpAddr>().is_ok_and(|host_ip| host_ip == *ip),
            HostFilter::Name(name) => host.eq_ignore_ascii_case(name),
        }
    }
}

impl FromStr for HostFilter {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let host = s.trim().trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(HostFilter::Ip(ip));
        }
        match url::Host::parse(host) {
            Ok(url::Host::Domain(name)) => Ok(HostFilter::Name(name)),
            Ok(url::Host::Ipv4(ip)) => Ok(HostFilter::Ip(ip.into())),
            Ok(url::Host::Ipv6(ip)) => Ok(HostFilter::Ip(ip.into())),
            Err(_) => Err(SurveyError::InvalidHostFilter(s.to_string())),
        }
    }
}

/// Filters of one discovery run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurveyRequest {
    /// Only describe this host: an IP address or a LOCATION host name
    pub host: Option<String>,
    /// ST of the M-SEARCH, overriding the configured one
    pub search_target: Option<String>,
}

impl SurveyRequest {
    pub fn host_filter(&self) -> Result<Option<HostFilter>, SurveyError> {
        self.host.as_deref().map(str::parse).transpose()
    }

    pub fn search_target(&self) -> Result<Option<&str>, SurveyError> {
        match self.search_target.as_deref() {
            None => Ok(None),
            Some(st) if st.trim().is_empty() || st.contains(['\r', '\n']) => {
                Err(SurveyError::InvalidSearchTarget(st.to_string()))
            }
            Some(st) => Ok(Some(st.trim())),
        }
    }
}

/// Result of one discovery run
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub result: DiscoveryResult,
    pub scan: ScanStats,
    /// Documents whose contribution is missing from `result`
    pub skipped: Vec<Skipped>,
    pub socket_error: Option<String>,
}

/// Root descriptor to fetch for one host
#[derive(Debug, Clone)]
struct RootJob {
    host: String,
    location: String,
    base_url: String,
}

/// Runs discoveries. Holds no state between runs.
pub struct Survey<F = HttpFetcher> {
    fetcher: Arc<F>,
    settings: SurveySettings,
}

impl<F> Clone for Survey<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            settings: self.settings.clone(),
        }
    }
}

impl<F: DescriptorFetcher> Survey<F> {
    pub fn new(fetcher: F, settings: SurveySettings) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            settings,
        }
    }

    pub fn settings(&self) -> &SurveySettings {
        &self.settings
    }

    /// Scan the network and describe every announced device.
    ///
    /// Only invalid filters are errors. Unreachable or broken documents end up
    /// in `Discovery::skipped`, a socket failure in `Discovery::socket_error`.
    pub async fn discover(&self, request: &SurveyRequest) -> Result<Discovery, SurveyError> {
        let host_filter = request.host_filter()?;
        let mut scan = self.settings.scan.clone();
        if let Some(st) = request.search_target()? {
            scan.search_target = Some(st.to_string());
        }

        tracing::info!(
            "Starting discovery (host={:?}, ST={:?}, {:?})",
            host_filter,
            scan.search_target,
            scan.timeout
        );
        let outcome = ssdp::scan(&scan).await;

        let mut discovery = self.describe(&outcome.index, host_filter).await;
        discovery.scan = outcome.stats;
        discovery.socket_error = outcome.socket_error;
        Ok(discovery)
    }

    /// Fetch, merge and enrich the devices of an announcement index
    pub async fn describe(
        &self,
        index: &ServiceAnnouncementIndex,
        host_filter: Option<HostFilter>,
    ) -> Discovery {
        let mut builder = DiscoveryBuilder::new();
        let mut skipped = Vec::new();
        let concurrency = self.settings.concurrency.max(1);

        let jobs = root_jobs(index, host_filter.as_ref(), &mut skipped);

        // buffered() yields in job order, which keeps first-wins merging deterministic
        let roots: Vec<_> = stream::iter(jobs)
            .map(|job| async move {
                let devices = self.load_devices(&job).await;
                (job, devices)
            })
            .buffered(concurrency)
            .collect()
            .await;

        for (job, devices) in roots {
            match devices {
                Ok(list) => {
                    for detail in list.malformed {
                        tracing::warn!("Skipping device in {}: {}", job.location, detail);
                        skipped.push(Skipped {
                            stage: SkipStage::Root,
                            host: job.host.clone(),
                            url: job.location.clone(),
                            reason: SkipReason::MalformedDescriptor(detail),
                        });
                    }
                    let stats = builder.merge_devices(&job.host, list.devices);
                    tracing::debug!(
                        "{}: {} device(s) merged, {} already known",
                        job.location,
                        stats.inserted,
                        stats.kept
                    );
                }
                Err(reason) => {
                    tracing::warn!("Skipping root descriptor {}: {:?}", job.location, reason);
                    skipped.push(Skipped {
                        stage: SkipStage::Root,
                        host: job.host,
                        url: job.location,
                        reason,
                    });
                }
            }
        }

        let CapabilityPlan { targets, unresolved } = builder.capability_plan();
        skipped.extend(unresolved);
        let capabilities: Vec<_> = stream::iter(targets)
            .map(|target| async move {
                let actions = self.load_actions(&target.url).await;
                (target, actions)
            })
            .buffered(concurrency)
            .collect()
            .await;

        for (target, actions) in capabilities {
            match actions {
                Ok(actions) => {
                    if !builder.attach_actions(&target, actions) {
                        tracing::debug!("{} vanished before enrichment", target.service);
                    }
                }
                Err(reason) => {
                    tracing::warn!("Skipping capability document {}: {:?}", target.url, reason);
                    skipped.push(Skipped {
                        stage: SkipStage::Capability,
                        host: target.host,
                        url: target.url,
                        reason,
                    });
                }
            }
        }

        let result = builder.finish();
        tracing::info!(
            "Discovery complete: {} host(s), {} device(s), {} skipped",
            result.len(),
            result.values().map(|devices| devices.len()).sum::<usize>(),
            skipped.len()
        );

        Discovery {
            result,
            scan: ScanStats::default(),
            skipped,
            socket_error: None,
        }
    }

    async fn load_devices(&self, job: &RootJob) -> Result<DeviceList, SkipReason> {
        let root = self.load_document(&job.location).await?;
        let mut list = descriptor::extract_devices(&root);

        for device in list.devices.values_mut() {
            device.base_url = Some(job.base_url.clone());
        }
        Ok(list)
    }

    async fn load_actions(
        &self,
        url: &str,
    ) -> Result<IndexMap<String, ActionRecord>, SkipReason> {
        let root = self.load_document(url).await?;
        let list = descriptor::extract_actions(&root);
        if list.unnamed > 0 || list.duplicates > 0 {
            tracing::debug!(
                "{}: {} unnamed and {} duplicate action(s) dropped",
                url,
                list.unnamed,
                list.duplicates
            );
        }
        Ok(list.actions)
    }

    async fn load_document(&self, url: &str) -> Result<xmltree::Element, SkipReason> {
        let bytes = self.fetcher.fetch(url, self.settings.fetch_timeout).await?;
        Ok(descriptor::read_document(&bytes)?)
    }
}

/// One job per distinct LOCATION of every host passing the filter
fn root_jobs(
    index: &ServiceAnnouncementIndex,
    host_filter: Option<&HostFilter>,
    skipped: &mut Vec<Skipped>,
) -> Vec<RootJob> {
    let mut jobs = Vec::new();

    for (host, services) in index {
        if host_filter.is_some_and(|filter| !filter.matches(host)) {
            tracing::trace!("Host {} filtered out", host);
            continue;
        }

        let mut seen = HashSet::new();
        for record in services.values() {
            let Some(location) = record.location() else {
                continue;
            };
            if !seen.insert(location.to_string()) {
                continue;
            }
            match base_url(location) {
                Some(base_url) => jobs.push(RootJob {
                    host: host.clone(),
                    location: location.to_string(),
                    base_url,
                }),
                None => skipped.push(Skipped {
                    stage: SkipStage::Root,
                    host: host.clone(),
                    url: location.to_string(),
                    reason: SkipReason::Fetch("LOCATION is not an absolute URL".to_string()),
                }),
            }
        }
    }

    jobs
}

/// scheme://host:port of a descriptor URL
pub fn base_url(location: &str) -> Option<String> {
    let url = Url::parse(location).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}://{}:{}", url.scheme(), host, port))
}

impl From<FetchError> for SkipReason {
    fn from(err: FetchError) -> Self {
        SkipReason::Fetch(err.to_string())
    }
}

impl From<DescriptorError> for SkipReason {
    fn from(err: DescriptorError) -> Self {
        match err {
            DescriptorError::Parse(e) => SkipReason::Parse(e.to_string()),
        }
    }
}
