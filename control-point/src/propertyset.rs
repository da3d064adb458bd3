//! Decoding of GENA `propertyset` bodies.

use xmltree::{Element, XMLNode};

use crate::error::{ControlPointError, Result};

/// Flatten a NOTIFY body into `(variable, value)` pairs in document order.
///
/// ```text
/// <e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
///   <e:property><Volume>12</Volume></e:property>
/// </e:propertyset>
/// ```
pub fn decode(xml: &str) -> Result<Vec<(String, String)>> {
    let root = Element::parse(xml.as_bytes())
        .map_err(|e| ControlPointError::InvalidEvent(e.to_string()))?;

    if root.name != "propertyset" {
        return Err(ControlPointError::InvalidEvent(format!(
            "expected propertyset, found {}",
            root.name
        )));
    }

    let properties = root
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .filter(|property| property.name == "property")
        .flat_map(|property| property.children.iter().filter_map(XMLNode::as_element))
        .map(|variable| {
            let value = variable
                .get_text()
                .map(|text| text.trim().to_string())
                .unwrap_or_default();
            (variable.name.clone(), value)
        })
        .collect();

    Ok(properties)
}
