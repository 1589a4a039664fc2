use msgfilter::{
    EnvelopeVersion, Filter, FilterError, FilterTable, Message, MessageBuffer, NodeQuota, TableOptions, XPathFilter,
    XPathFilterTable, XPathMessageContext,
};
use rstest::rstest;

const NS: &str = "urn:inventory";

fn inventory(items: usize) -> MessageBuffer {
    let mut body = format!("<i:Stock xmlns:i=\"{NS}\">");
    for n in 0..items {
        body.push_str(&format!("<i:Item sku=\"{n}\"><i:Name>item {n}</i:Name></i:Item>"));
    }
    body.push_str("</i:Stock>");
    Message::builder(EnvelopeVersion::Soap11).action("urn:inventory:Report").body(body).build_buffer().unwrap()
}

fn filter(expr: &str) -> XPathFilter {
    XPathFilter::with_context(expr, XPathMessageContext::new().with_namespace("i", NS)).unwrap()
}

fn quota(n: usize) -> NodeQuota {
    NodeQuota::new(i64::try_from(n).unwrap()).unwrap()
}

/// Outcome of matching with a given quota: `None` when the quota ran out.
fn outcome(expr: &str, n: usize, target: &MessageBuffer) -> Option<bool> {
    match filter(expr).with_node_quota(quota(n)).matches(target) {
        Ok(matched) => Some(matched),
        Err(FilterError::QuotaExceeded { max }) => {
            assert_eq!(max, n);
            None
        }
        Err(other) => panic!("unexpected {other}"),
    }
}

#[rstest]
#[case("count(//i:Item) = 12")]
#[case("/s11:Envelope/s11:Body/i:Stock/i:Item[@sku = '11']/i:Name = 'item 11'")]
#[case("//i:Name = 'missing'")]
fn raising_the_quota_never_changes_a_result(#[case] expr: &str) {
    let target = inventory(12);
    let unbounded = filter(expr).matches(&target).unwrap();
    let mut first_success = None;
    for n in 1..=600 {
        match outcome(expr, n, &target) {
            Some(matched) => {
                assert_eq!(matched, unbounded, "quota {n}");
                first_success.get_or_insert(n);
            }
            None => assert!(first_success.is_none(), "quota {n} failed after a smaller quota succeeded"),
        }
    }
    let threshold = first_success.expect("600 steps are enough for this document");
    assert!(threshold > 1);
}

#[test]
fn a_quota_of_one_stops_any_path() {
    assert_eq!(outcome("/s11:Envelope/s11:Body", 1, &inventory(1)), None);
}

#[test]
fn literal_expressions_need_no_steps() {
    assert_eq!(outcome("1 + 1 = 2", 1, &inventory(1)), Some(true));
}

fn table_outcome(exprs: &[&str], n: usize, target: &MessageBuffer) -> Result<Vec<usize>, usize> {
    let mut table = XPathFilterTable::new(TableOptions::default().with_node_quota(quota(n)));
    for (i, expr) in exprs.iter().enumerate() {
        table.add(Filter::from(filter(expr)), i).unwrap();
    }
    let mut values = Vec::new();
    match table.get_matching_values(target, &mut values) {
        Ok(_) => Ok(values.into_iter().copied().collect()),
        Err(FilterError::QuotaExceeded { max }) => Err(max),
        Err(other) => panic!("unexpected {other}"),
    }
}

#[test]
fn shared_paths_are_charged_to_every_filter() {
    let target = inventory(8);
    let forward = [
        "count(/s11:Envelope/s11:Body/i:Stock/i:Item) = 8",
        "/s11:Envelope/s11:Body/i:Stock/i:Item/i:Name = 'item 3'",
    ];
    let backward = [forward[1], forward[0]];
    for n in 1..=400 {
        let a = table_outcome(&forward, n, &target);
        let b = table_outcome(&backward, n, &target);
        match (&a, &b) {
            (Ok(x), Ok(y)) => assert_eq!(x.len(), y.len(), "quota {n}"),
            (Err(x), Err(y)) => assert_eq!(x, y),
            _ => panic!("registration order changed the quota outcome at {n}: {a:?} vs {b:?}"),
        }
    }
    assert_eq!(table_outcome(&forward, 400, &target), Ok(vec![0, 1]));
}

#[test]
fn the_quota_resets_between_filters() {
    let target = inventory(4);
    let expr = "count(//i:Item) = 4";
    let needed = (1..=400).find(|&n| outcome(expr, n, &target).is_some()).unwrap();
    let repeated = [expr, expr, expr, expr];
    assert_eq!(table_outcome(&repeated, needed, &target), Ok(vec![0, 1, 2, 3]));
    assert_eq!(table_outcome(&repeated, needed - 1, &target), Err(needed - 1));
}
