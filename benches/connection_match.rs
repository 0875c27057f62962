//! Benchmark for connection resolution
//!
//! Descriptor building and dedup lookup run once per reconcile of every
//! cloud-backed NamespaceStore.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use namespace_store_operator::crd::{CredentialRef, S3CompatibleSpec, StoreBackend};
use namespace_store_operator::domain::ports::{
    AccountInfo, ExternalConnectionInfo, ExternalConnections, SystemInfo,
};
use namespace_store_operator::reconciler::connection::{
    build_descriptor, find_matching_connection, normalize_endpoint,
};
use std::collections::BTreeMap;

fn secret() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("AWS_ACCESS_KEY_ID".to_string(), "AKIAEXAMPLE".to_string()),
        ("AWS_SECRET_ACCESS_KEY".to_string(), "wJalrXUtnFEMI".to_string()),
    ])
}

fn backend(endpoint: &str) -> StoreBackend {
    StoreBackend::S3Compatible {
        s3_compatible: S3CompatibleSpec {
            target_bucket: Some("bucket".to_string()),
            secret: Some(CredentialRef {
                name: "creds".to_string(),
                namespace: None,
            }),
            endpoint: Some(endpoint.to_string()),
            signature_version: Some("v4".to_string()),
        },
    }
}

/// System with `count` connections spread over 10 accounts; the match is last
fn system_with_connections(count: usize) -> SystemInfo {
    let accounts = (0..10)
        .map(|a| AccountInfo {
            email: format!("account-{a}@example.com"),
            external_connections: ExternalConnections {
                connections: (0..count / 10)
                    .map(|i| ExternalConnectionInfo {
                        name: format!("conn-{a}-{i}"),
                        endpoint_type: "S3_COMPATIBLE".to_string(),
                        endpoint: format!("https://minio-{a}-{i}:9000"),
                        identity: "AKIAEXAMPLE".to_string(),
                        auth_method: Some("AWS_V4".to_string()),
                    })
                    .collect(),
            },
            ..Default::default()
        })
        .collect();
    SystemInfo {
        accounts,
        ..Default::default()
    }
}

fn bench_build_descriptor(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection");
    group.throughput(Throughput::Elements(1));

    let secret = secret();
    let backend = backend("minio.storage.svc:9000");
    group.bench_function("build_descriptor", |b| {
        b.iter(|| build_descriptor(black_box("ns"), black_box(&backend), "creds", &secret))
    });

    group.bench_function("normalize_endpoint", |b| {
        b.iter(|| normalize_endpoint(black_box(Some("minio.storage.svc:9000"))))
    });

    group.finish();
}

fn bench_find_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection_match");

    for count in [10usize, 100, 1000] {
        let system = system_with_connections(count);
        let last = count / 10 - 1;
        let desired = build_descriptor(
            "ns",
            &backend(&format!("https://minio-9-{last}:9000")),
            "creds",
            &secret(),
        )
        .ok()
        .flatten();
        let Some(desired) = desired else {
            continue;
        };

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &system, |b, system| {
            b.iter(|| {
                let found = find_matching_connection(black_box(system), black_box(&desired));
                black_box(found.map(|c| c.name.len()))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build_descriptor, bench_find_matching);
criterion_main!(benches);
