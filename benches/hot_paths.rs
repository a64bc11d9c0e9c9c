use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flowtag::aggregate::Aggregator;
use flowtag::engine::process_batch;
use flowtag::flow::parse::{parse_fields, RecordParser};
use flowtag::flow::FlowLogSchema;
use flowtag::mapping::{ProtocolTable, TagMapping};

const RECORD: &str = "2 123456789012 eni-0a1b2c3d 10.0.1.201 198.51.100.2 443 49153 6 25 20000 1620140761 1620140821 ACCEPT OK";

fn build_tags() -> TagMapping {
    let mut tags = TagMapping::new();
    for port in 49_000..50_000u16 {
        tags.insert(port, "tcp", if port % 2 == 0 { "sv_P1" } else { "sv_P2" });
    }
    tags
}

fn build_batch(lines: u16) -> Vec<String> {
    (0..lines)
        .map(|i| {
            let protocol = if i % 5 == 0 { 17 } else { 6 };
            format!(
                "2 123456789012 eni-0a1b2c3d 10.0.1.201 198.51.100.2 443 {} {protocol} 25 20000 1620140761 1620140821 ACCEPT OK",
                49_000 + (i % 1_200)
            )
        })
        .collect()
}

fn bench_parse(c: &mut Criterion) {
    let schema = FlowLogSchema::V2;
    let parser = RecordParser::new(schema, ProtocolTable::builtin());

    c.bench_function("parse_fields/v2", |b| {
        b.iter(|| parse_fields(black_box(RECORD), &schema).expect("parse record"))
    });

    c.bench_function("record_parser/v2_builtin_protocols", |b| {
        b.iter(|| parser.parse(black_box(RECORD)).expect("resolve record"))
    });
}

fn bench_process_batch(c: &mut Criterion) {
    let parser = RecordParser::new(FlowLogSchema::V2, ProtocolTable::builtin());
    let tags = build_tags();
    let batch = build_batch(1_000);
    let aggregator = Aggregator::new();

    c.bench_function("engine/process_batch_1000", |b| {
        b.iter(|| process_batch(&parser, &tags, &aggregator, black_box(&batch)))
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_parse(c);
    bench_process_batch(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
