//! SOAP envelope construction and response decoding.

use xmltree::{Element, XMLNode};

use crate::error::SoapError;

/// Escape text for inclusion in XML character data.
pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render action arguments as `<Name>value</Name>` elements.
pub(crate) fn render_args(args: &[(&str, &str)]) -> String {
    args.iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape(value)))
        .collect()
}

pub(crate) fn build(service_type: &str, action: &str, payload: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{action} xmlns:u="{service_type}">{payload}</u:{action}></s:Body></s:Envelope>"#
    )
}

/// Pull the `<{action}Response>` element out of an envelope, or turn a
/// `<Fault>` into [`SoapError::Fault`].
pub(crate) fn extract_response(xml: &Element, action: &str) -> Result<Element, SoapError> {
    let body = xml
        .get_child("Body")
        .ok_or_else(|| SoapError::Parse("Missing SOAP Body".to_string()))?;

    if let Some(fault) = body.get_child("Fault") {
        return Err(fault_error(fault));
    }

    let response_name = format!("{action}Response");
    body.get_child(response_name.as_str())
        .cloned()
        .ok_or_else(|| SoapError::Parse(format!("Missing {response_name} element")))
}

/// Decode a fault body that arrived with a non-success HTTP status.
///
/// Returns `None` when the body is not a SOAP fault.
pub(crate) fn fault_from_body(body: &str) -> Option<SoapError> {
    let xml = Element::parse(body.as_bytes()).ok()?;
    let fault = xml.get_child("Body")?.get_child("Fault")?;
    Some(fault_error(fault))
}

fn fault_error(fault: &Element) -> SoapError {
    let upnp_error = fault
        .get_child("detail")
        .and_then(|d| d.get_child("UPnPError").or_else(|| d.get_child("UpnPError")));

    let code = upnp_error
        .and_then(|e| e.get_child("errorCode"))
        .and_then(|c| c.get_text())
        .and_then(|t| t.trim().parse::<u16>().ok())
        .unwrap_or(500);

    let description = upnp_error
        .and_then(|e| e.get_child("errorDescription"))
        .or_else(|| fault.get_child("faultstring"))
        .and_then(|d| d.get_text())
        .map(|t| t.trim().to_string())
        .unwrap_or_default();

    SoapError::Fault { code, description }
}

/// Output arguments of a response element, in document order.
pub(crate) fn output_args(response: &Element) -> Vec<(String, String)> {
    response
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .map(|child| {
            let value = child.get_text().map(|t| t.into_owned()).unwrap_or_default();
            (child.name.clone(), value)
        })
        .collect()
}
