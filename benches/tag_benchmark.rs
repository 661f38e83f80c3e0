use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use recordvault::{
    CompatibilityEncoder, CompatibilityTagBuilder, CryptoService, CryptoStore,
    InMemorySecureStore, TagCryptoService, Tags,
};

fn tag_crypto() -> TagCryptoService {
    let store = CryptoStore::new("bench", Arc::new(InMemorySecureStore::new()));
    TagCryptoService::new(Arc::new(CryptoService::new()), Arc::new(store), 256)
}

fn benchmark_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("compatibility_encoding");

    let values = [
        ("plain", "appdata"),
        ("punctuated", "My-Tag.v2 *"),
        ("unicode", "Blutdruck ä_ö über 140/90"),
    ];
    for (name, value) in values {
        group.bench_with_input(BenchmarkId::from_parameter(name), value, |b, value| {
            b.iter(|| CompatibilityEncoder::encode(black_box(value)).unwrap());
        });
    }
    group.finish();
}

fn benchmark_tag_encryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_encryption");
    let tag_crypto = tag_crypto();

    let mut tags = Tags::new();
    tags.insert("client".into(), "acme#rust".into());
    tags.insert("partner".into(), "acme".into());
    tags.insert("resourcetype".into(), "observation".into());
    tags.insert("fhirversion".into(), "4.0.1".into());
    let annotations = vec!["blood pressure".to_string(), "morning".to_string()];

    let tokens = tag_crypto
        .encrypt_tags_and_annotations(&tags, &annotations)
        .unwrap();

    group.bench_function("encrypt_4_tags_2_annotations", |b| {
        b.iter(|| {
            tag_crypto
                .encrypt_tags_and_annotations(black_box(&tags), black_box(&annotations))
                .unwrap()
        });
    });
    group.bench_function("decrypt_4_tags_2_annotations", |b| {
        b.iter(|| tag_crypto.decrypt_tags_and_annotations(black_box(&tokens)).unwrap());
    });
    group.finish();
}

fn benchmark_search_expression(c: &mut Criterion) {
    let tag_crypto = tag_crypto();
    tag_crypto.tag_encryption_key().unwrap();

    // Each filter costs four tag encryptions, one per compatibility encoding.
    c.bench_function("search_expression_3_filters", |b| {
        b.iter(|| {
            CompatibilityTagBuilder::new(&tag_crypto)
                .unwrap()
                .add_tag(black_box("resourcetype"), black_box("DocumentReference"))
                .unwrap()
                .add_tag(black_box("fhirversion"), black_box("4.0.1"))
                .unwrap()
                .add_annotation(black_box("Lab-Result_2024"))
                .unwrap()
                .seal()
        });
    });
}

criterion_group!(
    benches,
    benchmark_encoding,
    benchmark_tag_encryption,
    benchmark_search_expression
);
criterion_main!(benches);
