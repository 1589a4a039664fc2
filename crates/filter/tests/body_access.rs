use msgfilter::{
    EnvelopeVersion, Filter, FilterError, FilterTable, Message, MessageFilterTable, NavigatorError, XPathFilter,
};
use rstest::{fixture, rstest};

#[fixture]
fn message() -> Message {
    Message::builder(EnvelopeVersion::Soap12)
        .to("http://svc/")
        .action("urn:ping")
        .body("<p:Ping xmlns:p=\"urn:p\">hello</p:Ping>")
        .build()
        .unwrap()
}

#[rstest]
#[case("/s12:Envelope/s12:Header/wsa10:Action = 'urn:ping'")]
#[case("sm:action() = 'urn:ping'")]
#[case("count(sm:header()/*) = 2")]
#[case("sm:to() = 'http://svc/'")]
fn header_filters_run_on_header_only_messages(message: Message, #[case] expr: &str) {
    assert!(Filter::xpath(expr).unwrap().matches(&message).unwrap());
}

#[rstest]
#[case("/s12:Envelope/s12:Body/*")]
#[case("count(//*) > 0")]
#[case("string(sm:body()) = 'hello'")]
fn body_filters_fail_on_header_only_messages(message: Message, #[case] expr: &str) {
    let err = Filter::xpath(expr).unwrap().matches(&message).unwrap_err();
    match &err {
        FilterError::Navigator { filter, source, .. } => {
            assert_eq!(*source, NavigatorError::BodyAccessDenied);
            assert_eq!(filter, expr);
        }
        other => panic!("expected a navigator error, got {other}"),
    }
    assert!(err.is_recoverable());
}

#[rstest]
fn buffers_allow_body_access(message: Message) {
    let buffer = message.create_buffer();
    let filter = XPathFilter::new("/s12:Envelope/s12:Body/* = 'hello'").unwrap();
    assert!(filter.matches(&buffer).unwrap());
}

#[rstest]
fn tables_report_the_failing_filter(message: Message) {
    let mut table = MessageFilterTable::default();
    table.add(Filter::xpath("sm:action() = 'urn:ping'").unwrap(), "header").unwrap();
    table.add(Filter::xpath("/s12:Envelope/s12:Body/* = 'hello'").unwrap(), "body").unwrap();
    let err = table.get_matching_value(&message).unwrap_err();
    assert!(matches!(err, FilterError::Navigator { source: NavigatorError::BodyAccessDenied, .. }), "{err}");
    let err = table.get_matching_value(&message.create_buffer()).unwrap_err();
    assert!(matches!(err, FilterError::AmbiguousMatch { ref filters } if filters.len() == 2), "{err}");
}
