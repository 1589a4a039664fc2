use msgfilter::compiler::CompiledXPath;
use msgfilter::compiler::ir::OpcodeArena;
use msgfilter::{XPathMessageContext, compile_xpath};

fn dump_filter(expr: &str) -> String {
    CompiledXPath::filter(expr, &XPathMessageContext::empty()).unwrap().to_string()
}

#[test]
fn path_comparison_dump() {
    assert_eq!(
        dump_filter("/a/b = 'x'"),
        "0000: push.root\n\
         0001: select child::a\n\
         0002:~select child::b\n\
         0003: push.string \"x\"\n\
         0004: compare =\n\
         0005: to-boolean\n"
    );
}

#[test]
fn attribute_and_wildcard_steps() {
    assert_eq!(
        dump_filter("/a/@*"),
        "0000: push.root\n\
         0001: select child::a\n\
         0002: select attribute::*:*\n\
         0003: to-boolean\n"
    );
}

#[test]
fn the_dump_is_stable_across_compilations() {
    let expr = "count(/a/b[@c = 1]) > 2 or starts-with(string(/a), 'x')";
    assert_eq!(dump_filter(expr), dump_filter(expr));
}

#[test]
fn chains_can_share_one_arena() {
    let ctx = XPathMessageContext::empty();
    let mut arena = OpcodeArena::new();
    let first = compile_xpath("1 + 2", &ctx, &mut arena).unwrap();
    let second = compile_xpath("/a", &ctx, &mut arena).unwrap();
    assert_eq!(arena.display(first).to_string(), "0000: push.number 1\n0001: push.number 2\n0002: arith Add\n");
    assert_eq!(arena.display(second).to_string(), "0003: push.root\n0004: select child::a\n");
}
