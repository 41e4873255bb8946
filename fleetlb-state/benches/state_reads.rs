//! Read-path benchmarks for the balancer state
//!
//! Run with: cargo bench --bench state_reads

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fleetlb_core::config::StateConfig;
use fleetlb_core::models::{ClusterProperties, ServiceProperties, UriProperties};
use fleetlb_state::{
    ClientFactory, DegraderStrategyFactory, LoadBalancerState, MemoryStore, NoopClientFactory,
    PropertyStores, RandomStrategyFactory, RequestContext, StrategyFactory,
};
use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;
use url::Url;

fn hosts(count: usize) -> Vec<Url> {
    (0..count)
        .map(|i| Url::parse(&format!("http://host-{i}/")).unwrap())
        .collect()
}

fn populated_state(strategy: &str, host_count: usize) -> LoadBalancerState {
    let clusters = Arc::new(MemoryStore::new());
    let services = Arc::new(MemoryStore::new());
    let uris = Arc::new(MemoryStore::new());

    let mut client_factories: HashMap<String, Arc<dyn ClientFactory>> = HashMap::new();
    client_factories.insert("http".to_string(), Arc::new(NoopClientFactory::new()));
    let mut strategy_factories: HashMap<String, Arc<dyn StrategyFactory>> = HashMap::new();
    strategy_factories.insert("random".to_string(), Arc::new(RandomStrategyFactory));
    strategy_factories.insert("degraderV3".to_string(), Arc::new(DegraderStrategyFactory::default()));

    let state = LoadBalancerState::new(
        &StateConfig::default(),
        PropertyStores {
            clusters: clusters.clone(),
            services: services.clone(),
            uris: uris.clone(),
        },
        client_factories,
        strategy_factories,
    );

    clusters.put("cluster-1", ClusterProperties::new("cluster-1"));
    uris.put(
        "cluster-1",
        UriProperties::with_weights("cluster-1", 0, hosts(host_count).into_iter().map(|u| (u, 1.0))),
    );
    services.put(
        "service-1",
        ServiceProperties::new("service-1", "cluster-1", "/test", strategy).with_schemes(["http"]),
    );
    let _ = state.listen_to_service("service-1").unwrap();
    state
}

fn bench_get_strategy(c: &mut Criterion) {
    let state = populated_state("random", 10);

    c.bench_function("get_strategy", |b| {
        b.iter(|| black_box(state.get_strategy(black_box("service-1"), black_box("http"))));
    });
}

fn bench_get_client_cached(c: &mut Criterion) {
    let state = populated_state("random", 10);
    let uri = Url::parse("http://host-3/").unwrap();
    let _ = state.get_client("service-1", &uri);

    c.bench_function("get_client_cached", |b| {
        b.iter(|| black_box(state.get_client(black_box("service-1"), &uri)));
    });
}

fn bench_select_client(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_client");

    for strategy in ["random", "degraderV3"] {
        for host_count in [10, 100] {
            let state = populated_state(strategy, host_count);
            let clients: Vec<_> = hosts(host_count)
                .iter()
                .filter_map(|uri| state.get_client("service-1", uri))
                .collect();
            let selector = state.get_strategy("service-1", "http").unwrap();
            let ctx = RequestContext::new().with_hash_key("member-1");

            group.bench_with_input(
                BenchmarkId::new(strategy, host_count),
                &clients,
                |b, clients| {
                    b.iter(|| black_box(selector.select_client(&ctx, 0, clients)));
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_get_strategy, bench_get_client_cached, bench_select_client);
criterion_main!(benches);
