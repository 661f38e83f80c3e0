//! Record round-trip cost, and the price of a common-key cache miss.
//!
//! A cached common key keeps decryption local. A miss costs one call to the
//! key-exchange API plus an RSA-OAEP unwrap. The API round trip is simulated
//! with a sleep so the two paths can be compared.
//!
//! Run with: `cargo bench --bench record_benchmark`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput,
};
use recordvault::{
    CommonKeyApi, CryptoConfig, InMemorySecureStore, JsonResourceParser, RecordEncryptionService,
    Resource, Result, Tags,
};

/// Simulated key-exchange API round trip.
const API_SIMULATED_RTT_MS: u64 = 15;

struct SimulatedApi {
    wrapped: Vec<u8>,
}

impl CommonKeyApi for SimulatedApi {
    fn fetch_common_key(&self, _alias: &str, _user_id: &str, _common_key_id: &str) -> Result<Vec<u8>> {
        thread::sleep(Duration::from_millis(API_SIMULATED_RTT_MS));
        Ok(self.wrapped.clone())
    }
}

/// A service with an app key pair and a current common key, plus the
/// common key wrapped for the API double.
fn setup() -> (RecordEncryptionService, Arc<SimulatedApi>, String) {
    let unused: Arc<dyn CommonKeyApi> = Arc::new(SimulatedApi { wrapped: Vec::new() });
    let service = RecordEncryptionService::new(
        CryptoConfig::default(),
        Arc::new(InMemorySecureStore::new()),
        unused,
        Arc::new(JsonResourceParser),
    );
    service.provision_app_key_pair().unwrap();
    let (id, common_key) = service.rotate_common_key().unwrap();
    let pair = service.crypto_store().fetch_app_key_pair().unwrap();
    let wrapped = service.crypto().wrap_common_key(&pair, &common_key).unwrap();
    (service, Arc::new(SimulatedApi { wrapped }), id)
}

fn benchmark_record_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_roundtrip");
    let (service, _, _) = setup();

    let sizes = [("100B", 100), ("10KB", 10 * 1024), ("1MB", 1024 * 1024)];
    for (name, size) in sizes {
        let record = service
            .new_record(Resource::Data(vec![0u8; size]), Tags::new(), vec!["bench".into()], None)
            .unwrap();
        let encrypted = service.encrypt_record(&record).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encrypt", name), &record, |b, record| {
            b.iter(|| service.encrypt_record(black_box(record)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decrypt", name), &encrypted, |b, encrypted| {
            b.iter(|| service.decrypt_record(black_box(encrypted), "bench-user").unwrap());
        });
    }
    group.finish();
}

fn benchmark_common_key_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("common_key_resolution");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);

    let (service, api, id) = setup();

    group.bench_function("cached", |b| {
        b.iter(|| service.resolve_common_key("bench-user", black_box(&id)).unwrap());
    });

    // A fresh device: every iteration starts from an empty cache.
    let remote = RecordEncryptionService::new(
        CryptoConfig::default(),
        Arc::new(InMemorySecureStore::new()),
        api,
        Arc::new(JsonResourceParser),
    );
    let pair = service.crypto_store().fetch_app_key_pair().unwrap();
    remote.crypto_store().store_app_key_pair(&pair).unwrap();

    group.bench_function("fetched_and_unwrapped", |b| {
        b.iter(|| {
            remote.common_keys().delete_common_key(&id).unwrap();
            remote.resolve_common_key("bench-user", black_box(&id)).unwrap()
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_record_roundtrip, benchmark_common_key_miss);
criterion_main!(benches);
