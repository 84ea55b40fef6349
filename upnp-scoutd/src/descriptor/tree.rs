use std::borrow::Cow;
use xmltree::{Element, XMLNode};
use shared::types::{short_type_name, DescriptorNode, TreeValue};

/// How the value of a rule field becomes a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransform {
    Verbatim,
    /// 4th colon segment of a URN
    ShortTypeName,
}

/// Re-keys a repeated tag by one of its own child fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRule {
    pub tag: &'static str,
    pub field: &'static str,
    pub transform: KeyTransform,
}

impl KeyRule {
    pub const fn new(tag: &'static str, field: &'static str, transform: KeyTransform) -> Self {
        Self { tag, field, transform }
    }

    /// Key for a parsed child, None when the field is missing or yields nothing
    pub fn derive_key<'a>(&self, child: &'a DescriptorNode) -> Option<&'a str> {
        let value = child.leaf(self.field)?;
        let key = match self.transform {
            KeyTransform::Verbatim => value,
            KeyTransform::ShortTypeName => short_type_name(value)?,
        };
        (!key.is_empty()).then_some(key)
    }
}

const UPNP_RULES: [KeyRule; 3] = [
    KeyRule::new("service", "serviceType", KeyTransform::ShortTypeName),
    KeyRule::new("action", "name", KeyTransform::Verbatim),
    KeyRule::new("argument", "name", KeyTransform::Verbatim),
];

/// Tag -> key rule table used by `parse_element`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRules {
    rules: Vec<KeyRule>,
}

impl KeyRules {
    pub fn new(rules: Vec<KeyRule>) -> Self {
        Self { rules }
    }

    /// service by serviceType, action and argument by name
    pub fn upnp() -> Self {
        Self::new(UPNP_RULES.to_vec())
    }

    /// No re-keying at all
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn rule_for(&self, tag: &str) -> Option<&KeyRule> {
        self.rules.iter().find(|rule| rule.tag == tag)
    }

    /// Key of a non-leaf child. Falls back to the tag when no rule applies.
    pub fn key_for<'a>(&self, tag: &'a str, child: &'a DescriptorNode) -> &'a str {
        self.rule_for(tag)
            .and_then(|rule| rule.derive_key(child))
            .unwrap_or(tag)
    }
}

impl Default for KeyRules {
    fn default() -> Self {
        Self::upnp()
    }
}

/// Turn the children of `element` into a `DescriptorNode`.
///
/// Elements without child elements become leaves holding their trimmed text.
/// Other elements are parsed recursively and keyed through `rules`. When a
/// key is already present in the node the later child is dropped.
pub fn parse_element(element: &Element, rules: &KeyRules) -> DescriptorNode {
    let mut tree = DescriptorNode::new();

    for child in child_elements(element) {
        let (key, value) = if has_child_elements(child) {
            let subtree = parse_element(child, rules);
            let key = rules.key_for(&child.name, &subtree).to_string();
            (key, TreeValue::Node(subtree))
        } else {
            (child.name.clone(), TreeValue::Leaf(text_of(child)))
        };

        if !tree.insert_first(key.as_str(), value) {
            tracing::trace!("Dropping duplicate <{}> keyed '{}'", child.name, key);
        }
    }

    tree
}

/// Every element named `tag`, depth-first in document order, `root` included
pub fn find_all<'a>(root: &'a Element, tag: &str) -> Vec<&'a Element> {
    let mut found = Vec::new();
    collect(root, tag, &mut found);
    found
}

fn collect<'a>(element: &'a Element, tag: &str, found: &mut Vec<&'a Element>) {
    if element.name == tag {
        found.push(element);
    }
    for child in child_elements(element) {
        collect(child, tag, found);
    }
}

fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(child) => Some(child),
        _ => None,
    })
}

fn has_child_elements(element: &Element) -> bool {
    child_elements(element).next().is_some()
}

fn text_of(element: &Element) -> String {
    element
        .get_text()
        .map(|text: Cow<'_, str>| text.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> DescriptorNode {
        let root = Element::parse(xml.as_bytes()).unwrap();
        parse_element(&root, &KeyRules::upnp())
    }

    const RENDERER: &str = r#"<root>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>  Living Room  </friendlyName>
    <presentationURL/>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <controlURL>/upnp/control/avt</controlURL>
        <SCPDURL>/avt.xml</SCPDURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <controlURL>/upnp/control/rc</controlURL>
        <SCPDURL>/rc.xml</SCPDURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    #[test]
    fn test_services_keyed_by_short_type() {
        let tree = parse(RENDERER);
        let services = tree.node("device").unwrap().node("serviceList").unwrap();

        let keys: Vec<&String> = services.keys().collect();
        assert_eq!(keys, ["AVTransport", "RenderingControl"]);
        assert_eq!(
            services.node("RenderingControl").unwrap().leaf("controlURL"),
            Some("/upnp/control/rc")
        );
    }

    #[test]
    fn test_leaves_hold_trimmed_text() {
        let tree = parse(RENDERER);
        let device = tree.node("device").unwrap();
        assert_eq!(device.leaf("friendlyName"), Some("Living Room"));
        assert_eq!(device.leaf("presentationURL"), Some(""));
    }

    #[test]
    fn test_duplicate_action_names_collapse_to_first() {
        let tree = parse(
            r#"<scpd><actionList>
                <action><name>GetStatus</name><argumentList><argument><name>A</name></argument></argumentList></action>
                <action><name>GetStatus</name></action>
                <action><name>Reset</name></action>
            </actionList></scpd>"#,
        );
        let actions = tree.node("actionList").unwrap();

        assert_eq!(actions.len(), 2, "The second GetStatus is dropped");
        assert!(
            actions.node("GetStatus").unwrap().contains_key("argumentList"),
            "The first GetStatus is the one kept"
        );
        assert!(actions.node("Reset").is_some());
    }

    #[test]
    fn test_arguments_keyed_by_name() {
        let tree = parse(
            r#"<action><name>SetVolume</name><argumentList>
                <argument><name>InstanceID</name><direction>in</direction></argument>
                <argument><name>DesiredVolume</name><direction>in</direction></argument>
            </argumentList></action>"#,
        );
        let args = tree.node("argumentList").unwrap();
        let keys: Vec<&String> = args.keys().collect();
        assert_eq!(keys, ["InstanceID", "DesiredVolume"]);
    }

    #[test]
    fn test_unruled_repeated_tags_keep_first() {
        let tree = parse(
            r#"<device><iconList>
                <icon><mimetype>image/png</mimetype></icon>
                <icon><mimetype>image/jpeg</mimetype></icon>
            </iconList></device>"#,
        );
        let icons = tree.node("iconList").unwrap();
        assert_eq!(icons.len(), 1);
        assert_eq!(icons.node("icon").unwrap().leaf("mimetype"), Some("image/png"));
    }

    #[test]
    fn test_rule_without_field_falls_back_to_tag() {
        let tree = parse(r#"<serviceList><service><controlURL>/c</controlURL></service></serviceList>"#);
        assert!(tree.node("service").is_some());
    }

    #[test]
    fn test_key_rules_in_isolation() {
        let rules = KeyRules::upnp();
        let mut child = DescriptorNode::new();
        child.insert_first(
            "serviceType",
            TreeValue::Leaf("urn:dslforum-org:service:WANIPConnection:1".to_string()),
        );

        assert_eq!(rules.key_for("service", &child), "WANIPConnection");
        assert_eq!(rules.key_for("device", &child), "device");
        assert_eq!(KeyRules::none().key_for("service", &child), "service");

        let custom = KeyRules::new(vec![KeyRule::new("icon", "url", KeyTransform::Verbatim)]);
        let mut icon = DescriptorNode::new();
        icon.insert_first("url", TreeValue::Leaf("/icon.png".to_string()));
        assert_eq!(custom.key_for("icon", &icon), "/icon.png");
    }

    #[test]
    fn test_find_all_is_depth_first() {
        let root = Element::parse(
            r#"<root><device><deviceType>a</deviceType><deviceList>
                <device><deviceType>b</deviceType><deviceList><device><deviceType>c</deviceType></device></deviceList></device>
                <device><deviceType>d</deviceType></device>
            </deviceList></device></root>"#
                .as_bytes(),
        )
        .unwrap();

        let types: Vec<String> = find_all(&root, "device")
            .into_iter()
            .map(|d| text_of(d.get_child("deviceType").unwrap()))
            .collect();
        assert_eq!(types, ["a", "b", "c", "d"]);
    }
}
