use msgfilter::{EnvelopeVersion, Message, MessageBuffer, XPathFilter, XPathMessageContext, XPathResult};
use rstest::{fixture, rstest};

const NS: &str = "urn:orders";

#[fixture]
fn order() -> MessageBuffer {
    Message::builder(EnvelopeVersion::Soap12)
        .to("http://shop/orders")
        .action("urn:orders:Submit")
        .message_id("urn:uuid:1")
        .header(NS, "Customer", "  ada   lovelace ")
        .body(format!(
            "<o:Order xmlns:o=\"{NS}\" id=\"17\" o:priority=\"high\">\
               <o:Line qty=\"2\">apple</o:Line>\
               <o:Line qty=\"5\">pear</o:Line>\
               <o:Line qty=\"1\">plum</o:Line>\
               <o:Note>fragile<!--c--><?pi data?></o:Note>\
             </o:Order>"
        ))
        .build_buffer()
        .unwrap()
}

fn eval(expr: &str, target: &MessageBuffer) -> XPathResult {
    let ctx = XPathMessageContext::new().with_namespace("o", NS);
    XPathFilter::with_context(expr, ctx).unwrap().evaluate(target).unwrap()
}

fn number(expr: &str, target: &MessageBuffer) -> f64 {
    match eval(expr, target) {
        XPathResult::Number(n) => n,
        other => panic!("{expr}: expected a number, got {other:?}"),
    }
}

fn string(expr: &str, target: &MessageBuffer) -> String {
    match eval(expr, target) {
        XPathResult::String(s) => s.to_string(),
        other => panic!("{expr}: expected a string, got {other:?}"),
    }
}

fn boolean(expr: &str, target: &MessageBuffer) -> bool {
    match eval(expr, target) {
        XPathResult::Boolean(b) => b,
        other => panic!("{expr}: expected a boolean, got {other:?}"),
    }
}

#[rstest]
#[case("count(/s12:Envelope/s12:Body/o:Order/o:Line)", 3.0)]
#[case("count(//o:Line)", 3.0)]
#[case("count(/s12:Envelope/s12:Body/o:Order/o:Line[@qty > 1])", 2.0)]
#[case("count(/s12:Envelope/s12:Body/o:Order/o:Line[position() = last()])", 1.0)]
#[case("sum(//o:Line/@qty)", 8.0)]
#[case("count(/s12:Envelope/s12:Body/o:Order/@*)", 2.0)]
#[case("count(//o:Note/node())", 3.0)]
#[case("count(//o:Note/comment())", 1.0)]
#[case("count(//o:Note/processing-instruction('pi'))", 1.0)]
#[case("count(//o:Line | //o:Note)", 4.0)]
#[case("count(sm:header()/*)", 4.0)]
#[case("string-length(//o:Note)", 7.0)]
#[case("floor(7 div 2) + ceiling(0.2) + round(2.5)", 7.0)]
#[case("-(3 mod 2)", -1.0)]
#[case("number(/s12:Envelope/s12:Body/o:Order/@id) * 2", 34.0)]
fn numeric_results(order: MessageBuffer, #[case] expr: &str, #[case] expected: f64) {
    assert_eq!(number(expr, &order), expected, "{expr}");
}

#[rstest]
#[case("string(//o:Line[2])", "pear")]
#[case("string(/s12:Envelope/s12:Body/o:Order/o:Line[last()]/@qty)", "1")]
#[case("normalize-space(/s12:Envelope/s12:Header/o:Customer)", "ada lovelace")]
#[case("concat(//o:Line[1], '-', //o:Line[3])", "apple-plum")]
#[case("substring('message', 2, 3)", "ess")]
#[case("substring-before('a:b', ':')", "a")]
#[case("substring-after('a:b', ':')", "b")]
#[case("translate('abc', 'abc', 'AB')", "AB")]
#[case("local-name(/s12:Envelope/s12:Body/*)", "Order")]
#[case("namespace-uri(//o:Note)", NS)]
#[case("sm:action()", "urn:orders:Submit")]
#[case("sm:to()", "http://shop/orders")]
#[case("sm:message-id()", "urn:uuid:1")]
#[case("sm:soap-uri()", "http://www.w3.org/2003/05/soap-envelope")]
#[case("string(1 div 0)", "Infinity")]
#[case("string(0 div 0)", "NaN")]
fn string_results(order: MessageBuffer, #[case] expr: &str, #[case] expected: &str) {
    assert_eq!(string(expr, &order), expected, "{expr}");
}

#[rstest]
#[case("//o:Line = 'pear'", true)]
#[case("//o:Line != 'pear'", true)]
#[case("not(//o:Line = 'fig')", true)]
#[case("//o:Line/@qty > 4", true)]
#[case("//o:Line/@qty > 5", false)]
#[case("starts-with(sm:action(), 'urn:orders:')", true)]
#[case("contains(//o:Note, 'agil')", true)]
#[case("/s12:Envelope/s12:Body/o:Order/@o:priority = 'high'", true)]
#[case("boolean(/s12:Envelope/s12:Body/o:Missing)", false)]
#[case("1 < 2 and 'a' = 'a'", true)]
#[case("false() or 2 = 2.0", true)]
#[case("lang('en')", false)]
fn boolean_results(order: MessageBuffer, #[case] expr: &str, #[case] expected: bool) {
    assert_eq!(boolean(expr, &order), expected, "{expr}");
}

#[rstest]
fn node_sets_come_back_in_document_order(order: MessageBuffer) {
    let XPathResult::NodeSet(nodes) = eval("//o:Note | //o:Line", &order) else {
        panic!("expected a node-set");
    };
    assert_eq!(nodes.len(), 4);
    assert!(nodes.windows(2).all(|w| w[0] < w[1]));
}

#[rstest]
fn variables_are_bound_at_compile_time(order: MessageBuffer) {
    let mut ctx = XPathMessageContext::new().with_namespace("o", NS);
    ctx.set_variable("fruit", "plum");
    ctx.set_variable("min", 2.0);
    let filter = XPathFilter::with_context("//o:Line[. = $fruit] and count(//o:Line[@qty >= $min]) = 2", ctx).unwrap();
    assert!(filter.matches(&order).unwrap());
}

#[rstest]
fn filters_match_through_shared_buffers(order: MessageBuffer) {
    let filter = XPathFilter::with_context(
        "/s12:Envelope/s12:Body/o:Order[@id = 17]/o:Line[@qty = 5] = 'pear'",
        XPathMessageContext::new().with_namespace("o", NS),
    )
    .unwrap();
    let copy = order.create_message().create_buffer();
    assert!(filter.matches(&order).unwrap());
    assert!(filter.matches(&copy).unwrap());
}
