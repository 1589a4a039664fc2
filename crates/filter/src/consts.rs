//! Well-known namespace URIs and dialect identifiers.

/// The `xml` prefix binding (cannot be overridden).
pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace of `xmlns` attributes.
pub const XMLNS_URI: &str = "http://www.w3.org/2000/xmlns/";

/// Dialect URI accepted in the `Dialect` attribute of an XPath filter element.
pub const XPATH_DIALECT: &str = "http://www.w3.org/TR/1999/REC-xpath-19991116";

/// SOAP 1.1 envelope namespace.
pub const SOAP11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// SOAP 1.2 envelope namespace.
pub const SOAP12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// WS-Addressing (August 2004 submission) namespace.
pub const WSA_AUGUST_2004_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";

/// WS-Addressing 1.0 namespace.
pub const WSA10_NS: &str = "http://www.w3.org/2005/08/addressing";

/// Namespace of the message functions (`sm:header()`, `sm:to()`, ...).
pub const MESSAGE_FUNCTIONS_NS: &str = "http://schemas.microsoft.com/serviceModel/2004/05/xpathfunctions";

/// Conventional `tempuri` namespace bound by default in message contexts.
pub const TEMPURI_NS: &str = "http://tempuri.org/";

pub const ENVELOPE: &str = "Envelope";
pub const HEADER: &str = "Header";
pub const BODY: &str = "Body";
