use msgfilter::{EnvelopeVersion, Message, MessageBuffer, XPathFilter, XPathMessageContext, XPathResult};
use rstest::{fixture, rstest};

#[fixture]
fn mixed() -> MessageBuffer {
    Message::builder(EnvelopeVersion::Soap11)
        .action("urn:a:Mixed")
        .body(
            "<a:Item xmlns:a=\"urn:a\" a:flag=\"1\" plain=\"2\"/>\
             <b:Item xmlns:b=\"urn:b\"/>\
             <Item/>\
             <a:Other xmlns:a=\"urn:a\"/>\
             <Bare xmlns=\"urn:b\"/>",
        )
        .build_buffer()
        .unwrap()
}

fn count(expr: &str, target: &MessageBuffer) -> f64 {
    let ctx = XPathMessageContext::new().with_namespace("a", "urn:a").with_namespace("b", "urn:b");
    let filter = XPathFilter::with_context(&format!("count({expr})"), ctx).unwrap();
    match filter.evaluate(target).unwrap() {
        XPathResult::Number(n) => n,
        other => panic!("expected a number, got {other:?}"),
    }
}

#[rstest]
#[case::any_name("/s11:Envelope/s11:Body/*", 5.0)]
#[case::any_local_in_namespace("/s11:Envelope/s11:Body/a:*", 2.0)]
#[case::default_namespace_element("/s11:Envelope/s11:Body/b:*", 2.0)]
#[case::unprefixed_means_no_namespace("/s11:Envelope/s11:Body/Item", 1.0)]
#[case::exact_name("/s11:Envelope/s11:Body/a:Item", 1.0)]
#[case::exact_name_other_namespace("/s11:Envelope/s11:Body/b:Item", 1.0)]
#[case::default_namespace_is_not_inherited_by_the_query("/s11:Envelope/s11:Body/Bare", 0.0)]
fn element_name_tests(mixed: MessageBuffer, #[case] expr: &str, #[case] expected: f64) {
    assert_eq!(count(expr, &mixed), expected);
}

#[rstest]
#[case::any_attribute("/s11:Envelope/s11:Body/a:Item/@*", 2.0)]
#[case::attribute_in_namespace("/s11:Envelope/s11:Body/a:Item/@a:*", 1.0)]
#[case::unprefixed_attribute("/s11:Envelope/s11:Body/a:Item/@plain", 1.0)]
#[case::prefixed_attribute("/s11:Envelope/s11:Body/a:Item/@a:flag", 1.0)]
#[case::attribute_namespace_mismatch("/s11:Envelope/s11:Body/a:Item/@flag", 0.0)]
fn attribute_name_tests(mixed: MessageBuffer, #[case] expr: &str, #[case] expected: f64) {
    assert_eq!(count(expr, &mixed), expected);
}
