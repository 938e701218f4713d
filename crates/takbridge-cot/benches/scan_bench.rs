use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use takbridge_cot::{decode, find_cot};

const POSITION: &str = r#"<event version="2.0" uid="ANDROID-12345678" type="a-f-G-U-C" time="2024-01-15T10:30:00Z" start="2024-01-15T10:30:00Z" stale="2024-01-15T10:35:00Z" how="m-g"><point lat="37.7749" lon="-122.4194" hae="100.0" ce="10.0" le="5.0"/><detail><contact callsign="Bravo-2" endpoint="*:-1:stcp"/><__group name="Cyan" role="Team Member"/><track speed="0.0" course="180.0"/><remarks>Bench event</remarks></detail></event>"#;

const HANDSHAKE: &str = r#"<event version="2.0" uid="ack" type="t-x-c-t-r"/>"#;

fn stream(events: usize) -> String {
    let mut buffer = String::new();
    for i in 0..events {
        buffer.push_str(if i % 10 == 0 { HANDSHAKE } else { POSITION });
    }
    buffer
}

fn bench_scanning(c: &mut Criterion) {
    let mut group = c.benchmark_group("scanning");

    for events in [1usize, 100, 1000] {
        let buffer = stream(events);
        group.bench_with_input(BenchmarkId::new("drain", events), &buffer, |b, buffer| {
            b.iter(|| {
                let mut rest = buffer.as_str();
                let mut frames = 0;
                while let Some(frame) = find_cot(black_box(rest)) {
                    rest = frame.remainder;
                    frames += 1;
                }
                frames
            })
        });
    }

    let truncated = &POSITION[..POSITION.len() - 3];
    group.bench_function("truncated", |b| b.iter(|| find_cot(black_box(truncated))));

    group.finish();
}

fn bench_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoding");

    group.bench_function("position", |b| b.iter(|| decode(black_box(POSITION))));
    group.bench_function("handshake", |b| b.iter(|| decode(black_box(HANDSHAKE))));

    group.finish();
}

criterion_group!(benches, bench_scanning, bench_decoding);
criterion_main!(benches);
