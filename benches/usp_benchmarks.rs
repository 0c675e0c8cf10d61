//! Performance benchmarks for the USP client
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;
use usp_client::core::usp::messages::{
    UspMessage, decode_audio_message, encode_audio_message, encode_text_message, new_request_id,
    paths,
};
use usp_client::{AuthenticationType, Client, ThreadService, UspConfig};

/// Benchmark binary audio framing at typical chunk sizes
fn bench_audio_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_framing");
    group.measurement_time(Duration::from_secs(5));

    let request_id = new_request_id();
    for size in [320usize, 3200, 8192, 32_000] {
        let payload = vec![0x5au8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &payload, |b, payload| {
            b.iter(|| encode_audio_message(black_box(&request_id), black_box(payload)));
        });

        let frame = encode_audio_message(&request_id, &payload);
        group.bench_with_input(BenchmarkId::new("decode", size), &frame, |b, frame| {
            b.iter(|| decode_audio_message(black_box(frame)));
        });
    }

    group.finish();
}

/// Benchmark parsing of service messages
fn bench_message_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_parsing");
    group.measurement_time(Duration::from_secs(5));

    let turn_start = encode_text_message(paths::TURN_START, "REQ", r#"{"context":{}}"#);
    let hypothesis = encode_text_message(
        paths::SPEECH_HYPOTHESIS,
        "REQ",
        r#"{"Text":"what is the weather","Offset":500000,"Duration":12000000}"#,
    );
    let detailed_phrase = encode_text_message(
        paths::SPEECH_PHRASE,
        "REQ",
        &format!(
            r#"{{"RecognitionStatus":"Success","Offset":0,"Duration":1,"NBest":[{}]}}"#,
            vec![r#"{"Confidence":0.9,"Display":"What is the weather like today?"}"#; 5].join(",")
        ),
    );

    for (name, frame) in [
        ("turn_start", &turn_start),
        ("hypothesis", &hypothesis),
        ("detailed_phrase", &detailed_phrase),
    ] {
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, frame.len()), frame, |b, frame| {
            b.iter(|| UspMessage::parse(black_box(frame)));
        });
    }

    group.finish();
}

/// Benchmark connect/term churn through the session arena
fn bench_session_lifecycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = rt.block_on(async {
        let service = ThreadService::new().unwrap();
        service.init().unwrap();
        service
    });
    // Nothing listens on port 9, so sessions fail fast without network
    let config = UspConfig::builder()
        .authentication(AuthenticationType::SubscriptionKey, "bench")
        .endpoint_url("ws://127.0.0.1:9/")
        .build()
        .unwrap();

    c.bench_function("connect_term", |b| {
        b.to_async(&rt).iter(|| async {
            let mut connection = Client::new(config.clone(), &service).connect().unwrap();
            connection.term().await;
        });
    });

    rt.block_on(service.term());
}

criterion_group!(
    benches,
    bench_audio_framing,
    bench_message_parsing,
    bench_session_lifecycle
);
criterion_main!(benches);
