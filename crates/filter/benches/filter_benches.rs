use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use msgfilter::{
    CompiledXPath, EndpointAddressFilter, EnvelopeVersion, Filter, FilterTable, Message, MessageBuffer,
    PrefixEndpointAddressFilter, PrefixEndpointAddressFilterTable, Trie, XPathFilter, XPathFilterTable,
    XPathMessageContext, parse_xpath,
};

const NS: &str = "urn:bench";

fn sample_queries() -> Vec<&'static str> {
    vec![
        "/s12:Envelope/s12:Header/wsa10:Action = 'urn:bench:Submit'",
        "count(/s12:Envelope/s12:Body/b:Order/b:Line[@qty > 2]) >= 1",
        "starts-with(sm:to(), 'http://bench/') and not(sm:header()/b:Trace)",
        "sum(/s12:Envelope/s12:Body/b:Order/b:Line/@qty) div 4 > 1.5",
    ]
}

fn context() -> XPathMessageContext {
    XPathMessageContext::new().with_namespace("b", NS)
}

fn sample_buffer() -> MessageBuffer {
    let lines: String = (1..=12).map(|i| format!("<b:Line qty=\"{i}\">item-{i}</b:Line>")).collect();
    Message::builder(EnvelopeVersion::Soap12)
        .to("http://bench/orders/17")
        .action("urn:bench:Submit")
        .header(NS, "Region", "region-7")
        .body(format!("<b:Order xmlns:b=\"{NS}\">{lines}</b:Order>"))
        .build_buffer()
        .expect("build failure")
}

fn benchmark_compiler(c: &mut Criterion) {
    let queries = sample_queries();
    let ctx = context();
    c.bench_function("parser/parse_xpath", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(parse_xpath(black_box(q)).expect("parse failure"));
            }
        })
    });
    c.bench_function("compiler/compile_filter", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(CompiledXPath::filter(black_box(q), &ctx).expect("compile failure"));
            }
        })
    });
}

fn xpath_table(filters: usize) -> XPathFilterTable<usize> {
    let ctx = context();
    let mut table = XPathFilterTable::default();
    for i in 0..filters {
        let expr = match i % 3 {
            0 => format!("/s12:Envelope/s12:Header/b:Region = 'region-{i}'"),
            1 => format!("starts-with(/s12:Envelope/s12:Header/wsa10:Action, 'urn:bench:{i}')"),
            _ => format!("count(/s12:Envelope/s12:Body/b:Order/b:Line) = {i}"),
        };
        let filter = XPathFilter::with_context(&expr, ctx.clone()).expect("compile failure");
        table.add(filter.into(), i).expect("add failure");
    }
    table
}

fn benchmark_tables(c: &mut Criterion) {
    let buffer = sample_buffer();
    let mut group = c.benchmark_group("table/xpath");
    for filters in [10, 100, 1000] {
        let table = xpath_table(filters);
        group.bench_with_input(BenchmarkId::from_parameter(filters), &table, |b, table| {
            let mut values = Vec::new();
            b.iter(|| {
                values.clear();
                black_box(table.get_matching_values(black_box(&buffer), &mut values).expect("match failure"));
            });
        });
    }
    group.finish();

    let mut prefixes = PrefixEndpointAddressFilterTable::new();
    for i in 0..500 {
        let filter = PrefixEndpointAddressFilter::new(&format!("http://bench/orders/{i}"), false).expect("address");
        prefixes.add(Filter::from(filter), i).expect("add failure");
    }
    let exact = EndpointAddressFilter::new("http://bench/orders/17", false).expect("address");
    let exact = Filter::from(exact);
    c.bench_function("table/prefix_endpoint", |b| {
        b.iter(|| black_box(prefixes.get_matching_value(black_box(&buffer)).expect("match failure")))
    });
    c.bench_function("filter/endpoint", |b| {
        b.iter(|| black_box(exact.matches(black_box(&buffer)).expect("match failure")))
    });
}

fn benchmark_trie(c: &mut Criterion) {
    let mut trie = Trie::new();
    for i in 0..2000 {
        trie.insert(&format!("http://host-{}/service/{i}", i % 16), i);
    }
    c.bench_function("trie/collect_prefixes", |b| {
        b.iter(|| black_box(trie.collect_prefixes(black_box("http://host-7/service/1207/operation")).len()))
    });
    c.bench_function("trie/find", |b| b.iter(|| black_box(trie.find(black_box("http://host-3/service/515")))));
}

criterion_group!(benches, benchmark_compiler, benchmark_tables, benchmark_trie);
criterion_main!(benches);
