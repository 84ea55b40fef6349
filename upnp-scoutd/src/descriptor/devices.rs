use indexmap::IndexMap;
use xmltree::Element;
use shared::types::{
    short_type_name, ActionRecord, ArgumentRecord, DescriptorNode, DeviceRecord, ServiceRecord,
    TreeValue,
};
use super::tree::{find_all, parse_element, KeyRules};

/// Devices of one root descriptor, keyed by short device type
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    pub devices: IndexMap<String, DeviceRecord>,
    /// Devices dropped because an earlier one had the same short type
    pub duplicates: usize,
    /// Why each unusable device element was dropped, in document order
    pub malformed: Vec<String>,
}

/// Actions of one capability document, keyed by action name
#[derive(Debug, Clone, Default)]
pub struct ActionList {
    pub actions: IndexMap<String, ActionRecord>,
    pub duplicates: usize,
    /// Actions without a name element
    pub unnamed: usize,
}

/// Extract every `device` element of a root descriptor, nested ones included.
///
/// Each device is parsed on its own and stored without its `deviceList`,
/// since the nested devices are visited by the same walk. The first device
/// of a given short type wins. A device without a usable `deviceType` is
/// dropped and reported in `DeviceList::malformed`; its nested devices are
/// still extracted.
pub fn extract_devices(root: &Element) -> DeviceList {
    let rules = KeyRules::upnp();
    let mut list = DeviceList::default();

    for element in find_all(root, "device") {
        let device = match device_from_node(parse_element(element, &rules)) {
            Ok(device) => device,
            Err(detail) => {
                tracing::debug!("Dropping device: {}", detail);
                list.malformed.push(detail);
                continue;
            }
        };
        if list.devices.contains_key(&device.short_type) {
            tracing::debug!("Dropping second device of type {}", device.short_type);
            list.duplicates += 1;
            continue;
        }
        list.devices.insert(device.short_type.clone(), device);
    }

    list
}

/// Extract every `action` element of a capability (SCPD) document.
pub fn extract_actions(root: &Element) -> ActionList {
    let rules = KeyRules::upnp();
    let mut list = ActionList::default();

    for element in find_all(root, "action") {
        let Some(action) = action_from_node(&parse_element(element, &rules)) else {
            tracing::debug!("Skipping action without name");
            list.unnamed += 1;
            continue;
        };
        if list.actions.contains_key(&action.name) {
            list.duplicates += 1;
            continue;
        }
        list.actions.insert(action.name.clone(), action);
    }

    list
}

/// Err carries the reason the device cannot be keyed
fn device_from_node(mut node: DescriptorNode) -> Result<DeviceRecord, String> {
    let device_type =
        non_empty(&node, "deviceType").ok_or_else(|| "device without deviceType".to_string())?;
    let short_type = short_type_name(&device_type)
        .ok_or_else(|| format!("device type without short name: {}", device_type))?
        .to_string();

    node.remove("deviceList");
    let services = node.remove("serviceList").map(|list| services_from_value(&list));
    let friendly_name = non_empty(&node, "friendlyName");

    Ok(DeviceRecord {
        device_type,
        short_type,
        friendly_name,
        base_url: None,
        services,
        fields: node,
    })
}

fn services_from_value(list: &TreeValue) -> IndexMap<String, ServiceRecord> {
    let Some(list) = list.as_node() else {
        // <serviceList/>
        return IndexMap::new();
    };
    list.iter()
        .filter_map(|(key, value)| Some((key.clone(), service_from_node(value.as_node()?))))
        .collect()
}

fn service_from_node(node: &DescriptorNode) -> ServiceRecord {
    ServiceRecord {
        service_type: non_empty(node, "serviceType"),
        service_id: non_empty(node, "serviceId"),
        control_url: non_empty(node, "controlURL"),
        event_sub_url: non_empty(node, "eventSubURL"),
        scpd_url: non_empty(node, "SCPDURL"),
        actions: None,
    }
}

fn action_from_node(node: &DescriptorNode) -> Option<ActionRecord> {
    let name = non_empty(node, "name")?;
    let arguments = node.get("argumentList").map(arguments_from_value);
    Some(ActionRecord { name, arguments })
}

fn arguments_from_value(list: &TreeValue) -> IndexMap<String, ArgumentRecord> {
    let Some(list) = list.as_node() else {
        // <argumentList/>: present but empty
        return IndexMap::new();
    };
    list.iter()
        .filter_map(|(key, value)| {
            let arg = value.as_node()?;
            let name = non_empty(arg, "name").unwrap_or_else(|| key.clone());
            Some((
                name.clone(),
                ArgumentRecord {
                    name,
                    direction: non_empty(arg, "direction"),
                    related_state_variable: non_empty(arg, "relatedStateVariable"),
                },
            ))
        })
        .collect()
}

fn non_empty(node: &DescriptorNode, key: &str) -> Option<String> {
    node.leaf(key)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(xml: &str) -> Element {
        Element::parse(xml.as_bytes()).unwrap()
    }

    const GATEWAY: &str = r#"<?xml version="1.0"?>
<root>
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:InternetGatewayDevice:1</deviceType>
    <friendlyName>FRITZ!Box 7490</friendlyName>
    <UDN>uuid:75802409-bccb-40e7-8e6c-fa095ecce13e</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-any-com:service:Any:1</serviceType>
        <serviceId>urn:any-com:serviceId:any1</serviceId>
        <controlURL>/igdupnp/control/any</controlURL>
        <eventSubURL>/igdupnp/control/any</eventSubURL>
        <SCPDURL>/any.xml</SCPDURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:WANDevice:1</deviceType>
        <friendlyName>WANDevice - FRITZ!Box 7490</friendlyName>
        <serviceList/>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn test_nested_devices_extracted_flat() {
        let list = extract_devices(&root(GATEWAY));

        let keys: Vec<&String> = list.devices.keys().collect();
        assert_eq!(keys, ["InternetGatewayDevice", "WANDevice"]);
        for device in list.devices.values() {
            assert!(
                !device.fields.contains_key("deviceList"),
                "{} kept its deviceList",
                device.short_type
            );
        }
    }

    #[test]
    fn test_device_fields_and_services() {
        let list = extract_devices(&root(GATEWAY));
        let igd = &list.devices["InternetGatewayDevice"];

        assert_eq!(igd.friendly_name.as_deref(), Some("FRITZ!Box 7490"));
        assert_eq!(igd.fields.leaf("UDN"), Some("uuid:75802409-bccb-40e7-8e6c-fa095ecce13e"));
        assert!(igd.base_url.is_none());

        let any = igd.service("Any").unwrap();
        assert_eq!(any.scpd_url.as_deref(), Some("/any.xml"));
        assert_eq!(any.control_url.as_deref(), Some("/igdupnp/control/any"));
        assert!(any.actions.is_none());

        let wan = &list.devices["WANDevice"];
        assert_eq!(wan.services.as_ref().map(|s| s.len()), Some(0), "<serviceList/> is an empty list");
    }

    #[test]
    fn test_device_without_service_list() {
        let list = extract_devices(&root(
            "<root><device><deviceType>urn:schemas-upnp-org:device:Basic:1</deviceType></device></root>",
        ));
        assert!(list.devices["Basic"].services.is_none());
    }

    #[test]
    fn test_first_device_per_type_wins() {
        let list = extract_devices(&root(
            r#"<root><device>
                <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
                <friendlyName>first</friendlyName>
                <deviceList><device>
                    <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
                    <friendlyName>second</friendlyName>
                </device></deviceList>
            </device></root>"#,
        ));

        assert_eq!(list.devices.len(), 1);
        assert_eq!(list.duplicates, 1);
        assert_eq!(list.devices["MediaServer"].friendly_name.as_deref(), Some("first"));
    }

    #[test]
    fn test_untyped_devices_dropped_individually() {
        let list = extract_devices(&root(
            r#"<root><device>
                <deviceType>urn:dslforum-org:device:InternetGatewayDevice:1</deviceType>
                <deviceList>
                    <device><friendlyName>nameless</friendlyName>
                        <deviceList><device>
                            <deviceType>urn:dslforum-org:device:WANDevice:1</deviceType>
                        </device></deviceList>
                    </device>
                    <device><deviceType>urn:schemas-upnp-org:device</deviceType></device>
                </deviceList>
            </device></root>"#,
        ));

        let keys: Vec<&String> = list.devices.keys().collect();
        assert_eq!(keys, ["InternetGatewayDevice", "WANDevice"], "Valid devices survive");
        assert_eq!(
            list.malformed,
            [
                "device without deviceType",
                "device type without short name: urn:schemas-upnp-org:device",
            ]
        );
    }

    const SCPD: &str = r#"<scpd>
  <actionList>
    <action>
      <name>GetStatusInfo</name>
      <argumentList>
        <argument><name>NewConnectionStatus</name><direction>out</direction><relatedStateVariable>ConnectionStatus</relatedStateVariable></argument>
        <argument><name>NewUptime</name><direction>out</direction><relatedStateVariable>Uptime</relatedStateVariable></argument>
      </argumentList>
    </action>
    <action><name>ForceTermination</name></action>
    <action><name>Empty</name><argumentList/></action>
    <action><name>ForceTermination</name><argumentList><argument><name>X</name></argument></argumentList></action>
    <action><argumentList/></action>
  </actionList>
  <serviceStateTable/>
</scpd>"#;

    #[test]
    fn test_extract_actions() {
        let list = extract_actions(&root(SCPD));

        let names: Vec<&String> = list.actions.keys().collect();
        assert_eq!(names, ["GetStatusInfo", "ForceTermination", "Empty"]);
        assert_eq!(list.duplicates, 1);
        assert_eq!(list.unnamed, 1);

        let status = &list.actions["GetStatusInfo"];
        let args = status.arguments.as_ref().unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args["NewUptime"].direction.as_deref(), Some("out"));
        assert_eq!(
            args["NewConnectionStatus"].related_state_variable.as_deref(),
            Some("ConnectionStatus")
        );
    }

    #[test]
    fn test_argument_less_action_distinct_from_empty_argument_list() {
        let list = extract_actions(&root(SCPD));
        assert!(list.actions["ForceTermination"].is_argument_less());
        assert_eq!(list.actions["Empty"].arguments.as_ref().map(|a| a.len()), Some(0));
    }
}
