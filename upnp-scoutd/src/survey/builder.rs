use std::collections::btree_map::Entry;
use indexmap::IndexMap;
use shared::types::{ActionRecord, DeviceRecord, DiscoveryResult, SkipReason, SkipStage, Skipped};

/// Outcome of merging one descriptor's devices into a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    /// Devices whose short type was already present for the host
    pub kept: usize,
}

/// A service whose capability document still has to be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTarget {
    pub host: String,
    pub device: String,
    pub service: String,
    pub url: String,
}

/// Capability documents to read, plus the services that have none
#[derive(Debug, Clone, Default)]
pub struct CapabilityPlan {
    pub targets: Vec<CapabilityTarget>,
    pub unresolved: Vec<Skipped>,
}

/// Accumulates a `DiscoveryResult`.
///
/// Merging never overwrites a device already present for a host, so feeding
/// the same descriptors twice leaves the result unchanged.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryBuilder {
    result: DiscoveryResult,
}

impl DiscoveryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_devices(
        &mut self,
        host: &str,
        devices: impl IntoIterator<Item = (String, DeviceRecord)>,
    ) -> MergeStats {
        let mut stats = MergeStats::default();
        let mut devices = devices.into_iter().peekable();
        if devices.peek().is_none() {
            return stats;
        }

        let known = self.result.entry(host.to_string()).or_default();
        for (short_type, device) in devices {
            match known.entry(short_type) {
                Entry::Vacant(slot) => {
                    slot.insert(device);
                    stats.inserted += 1;
                }
                Entry::Occupied(_) => stats.kept += 1,
            }
        }
        stats
    }

    /// One target per service whose SCPDURL resolves against its device.
    /// Every other listed service ends up in `unresolved`.
    pub fn capability_plan(&self) -> CapabilityPlan {
        let mut plan = CapabilityPlan::default();
        for (host, devices) in &self.result {
            for (short_type, device) in devices {
                let Some(services) = &device.services else {
                    continue;
                };
                for (name, service) in services {
                    let scpd = service.scpd_url.as_deref();
                    match scpd.and_then(|scpd| device.resolve_url(scpd)) {
                        Some(url) => plan.targets.push(CapabilityTarget {
                            host: host.clone(),
                            device: short_type.clone(),
                            service: name.clone(),
                            url,
                        }),
                        None => {
                            let detail = match scpd {
                                Some(scpd) => {
                                    format!("SCPDURL {} of service {} cannot be resolved", scpd, name)
                                }
                                None => format!("service {} without SCPDURL", name),
                            };
                            tracing::debug!("{}/{}: {}", host, short_type, detail);
                            plan.unresolved.push(Skipped {
                                stage: SkipStage::Capability,
                                host: host.clone(),
                                url: scpd.unwrap_or_default().to_string(),
                                reason: SkipReason::MalformedDescriptor(detail),
                            });
                        }
                    }
                }
            }
        }
        plan
    }

    /// Set the action list of a service. Returns false when the service is unknown.
    pub fn attach_actions(
        &mut self,
        target: &CapabilityTarget,
        actions: IndexMap<String, ActionRecord>,
    ) -> bool {
        let service = self
            .result
            .get_mut(&target.host)
            .and_then(|devices| devices.get_mut(&target.device))
            .and_then(|device| device.services.as_mut())
            .and_then(|services| services.get_mut(&target.service));

        match service {
            Some(service) => {
                service.actions = Some(actions);
                true
            }
            None => false,
        }
    }

    pub fn result(&self) -> &DiscoveryResult {
        &self.result
    }

    pub fn finish(self) -> DiscoveryResult {
        self.result
    }
}
