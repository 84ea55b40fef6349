use sha2::{Digest, Sha256};
use shared::types::DiscoveryResult;

/// SHA-256 of a discovery result.
/// Hosts and device types are map keys in sorted order, so the output does
/// not depend on the order in which devices were merged.
pub fn compute_fingerprint(result: &DiscoveryResult) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(result)?;
    let hash = Sha256::digest(&json);
    Ok(hex::encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use shared::types::{DescriptorNode, DeviceRecord, ServiceRecord};
    use crate::survey::DiscoveryBuilder;

    fn test_device(short_type: &str) -> DeviceRecord {
        let mut services = IndexMap::new();
        services.insert("Any".to_string(), ServiceRecord::default());
        DeviceRecord {
            device_type: format!("urn:schemas-upnp-org:device:{}:1", short_type),
            short_type: short_type.to_string(),
            friendly_name: Some("Router".to_string()),
            base_url: Some("http://192.168.2.1:49000".to_string()),
            services: Some(services),
            fields: DescriptorNode::new(),
        }
    }

    #[test]
    fn test_fingerprint_independent_of_merge_order() {
        let mut forward = DiscoveryBuilder::new();
        forward.merge_devices("192.168.2.1", [("WANDevice".to_string(), test_device("WANDevice"))]);
        forward.merge_devices("10.0.0.5", [("MediaServer".to_string(), test_device("MediaServer"))]);

        let mut backward = DiscoveryBuilder::new();
        backward.merge_devices("10.0.0.5", [("MediaServer".to_string(), test_device("MediaServer"))]);
        backward.merge_devices("192.168.2.1", [("WANDevice".to_string(), test_device("WANDevice"))]);

        assert_eq!(
            compute_fingerprint(&forward.finish()).unwrap(),
            compute_fingerprint(&backward.finish()).unwrap(),
            "Fingerprint should not depend on merge order"
        );
    }

    #[test]
    fn test_fingerprint_changes_on_modification() {
        let mut builder = DiscoveryBuilder::new();
        builder.merge_devices("192.168.2.1", [("WANDevice".to_string(), test_device("WANDevice"))]);
        let original = builder.finish();

        let mut modified = original.clone();
        if let Some(device) = modified
            .get_mut("192.168.2.1")
            .and_then(|devices| devices.get_mut("WANDevice"))
        {
            device.friendly_name = Some("Renamed".to_string());
        }

        assert_ne!(
            compute_fingerprint(&original).unwrap(),
            compute_fingerprint(&modified).unwrap(),
            "Fingerprint should change when a device changes"
        );
    }

    #[test]
    fn test_empty_result_has_fingerprint() {
        let fingerprint = compute_fingerprint(&DiscoveryResult::new()).unwrap();
        assert_eq!(fingerprint.len(), 64);
    }
}
