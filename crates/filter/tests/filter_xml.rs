use msgfilter::{EnvelopeVersion, FilterError, Message, NodeQuota, XPathFilter, XPathMessageContext};
use rstest::rstest;

#[test]
fn written_filters_read_back_identically() {
    let ctx = XPathMessageContext::new().with_namespace("p", "urn:p");
    let original = XPathFilter::with_context("/p:a[@x < 3] and sm:action() = 'urn:go'", ctx)
        .unwrap()
        .with_node_quota(NodeQuota::new(250).unwrap());
    let xml = original.write_xml().unwrap();
    assert!(xml.contains("NodeQuota=\"250\""), "{xml}");
    assert!(xml.contains("&lt;"), "{xml}");

    let read = XPathFilter::read_xml(&xml).unwrap();
    assert_eq!(read.xpath(), original.xpath());
    assert_eq!(read.node_quota(), original.node_quota());
    assert_eq!(read.namespaces().lookup_namespace("p"), Some("urn:p"));
    assert_eq!(read.write_xml().unwrap(), xml);
}

#[test]
fn unbounded_quota_is_omitted() {
    let xml = XPathFilter::new("/s12:Envelope").unwrap().write_xml().unwrap();
    assert!(!xml.contains("NodeQuota"), "{xml}");
    assert!(xml.contains(msgfilter::consts::XPATH_DIALECT), "{xml}");
    assert!(XPathFilter::read_xml(&xml).unwrap().node_quota().is_unbounded());
}

#[test]
fn read_filters_evaluate() {
    let filter = XPathFilter::read_xml(
        r#"<XPathMessageFilter NodeQuota="100"><XPath xmlns:w="http://www.w3.org/2005/08/addressing">/s12:Envelope/s12:Header/w:Action = 'urn:ping'</XPath></XPathMessageFilter>"#,
    )
    .unwrap();
    let message = Message::builder(EnvelopeVersion::Soap12).action("urn:ping").build().unwrap();
    assert!(filter.matches(&message).unwrap());
}

#[rstest]
#[case(r#"<F NodeQuota="-4"><X>1</X></F>"#)]
#[case(r#"<F><X>/undeclared:a</X></F>"#)]
#[case(r#"<F><X>/a[</X></F>"#)]
#[case(r#"<F><X>1</X>"#)]
fn broken_documents_never_produce_a_filter(#[case] xml: &str) {
    assert!(XPathFilter::read_xml(xml).is_err());
}

#[test]
fn quota_errors_name_the_attribute() {
    let err = XPathFilter::read_xml(r#"<F NodeQuota="x"><X>1</X></F>"#).unwrap_err();
    assert!(matches!(err, FilterError::MalformedFilter { ref name, .. } if name == "NodeQuota"), "{err}");
}
