//! Remote discovery against mock mirrors.
//!
//! Run with: cargo test -p tvm-toolchain --test remote_fetch

use std::sync::Arc;
use tvm_config::{
    CachedVersions, ConfigStore, MemoryConfigStore, RemoteVersionEntry, Settings, ToolTemplate,
    VersionFetchRule, versions_cache_key,
};
use tvm_toolchain::{HttpClients, MirrorHealth, RateLimiter, RemoteFetcher};

const LISTING: &str = r#"<html><body>
<a href="../">../</a>
<a href="3.10.4/">3.10.4/</a>
<a href="3.11.0/">3.11.0/</a>
<a href="3.10.4/">3.10.4/</a>
</body></html>"#;

fn store(mirrors: Vec<String>) -> Arc<MemoryConfigStore> {
    let settings = Settings {
        request_rate_limit: 1000.0,
        ..Settings::default()
    };
    let store = MemoryConfigStore::new(settings, std::env::temp_dir());
    store.set_template(
        "demo",
        ToolTemplate {
            mirror_list: mirrors,
            version_fetch_config: Some(VersionFetchRule::html(
                r#"href="(\d+\.\d+\.\d+)/""#,
                "{mirror}{version}/demo-{version}.zip",
            )),
            ..ToolTemplate::default()
        },
    );
    Arc::new(store)
}

fn fetcher(store: Arc<MemoryConfigStore>, health: Arc<MirrorHealth>) -> RemoteFetcher {
    RemoteFetcher::new(
        store,
        HttpClients::new().unwrap(),
        Arc::new(RateLimiter::unlimited()),
        health,
    )
}

#[tokio::test]
async fn test_html_listing_is_deduplicated_in_order() {
    let mut server = mockito::Server::new_async().await;
    let listing = server
        .mock("GET", "/demo/")
        .with_status(200)
        .with_body(LISTING)
        .create_async()
        .await;

    let mirror = format!("{}/demo/", server.url());
    let fetcher = fetcher(store(vec![mirror.clone()]), Arc::new(MirrorHealth::new()));

    let versions = fetcher.get_remote_versions("demo", false).await;

    listing.assert_async().await;
    let names: Vec<_> = versions.iter().map(|v| v.version.as_str()).collect();
    assert_eq!(names, vec!["3.10.4", "3.11.0"]);
    assert_eq!(versions[0].download_url, format!("{mirror}3.10.4/demo-3.10.4.zip"));
}

#[tokio::test]
async fn test_failing_mirror_falls_over_and_is_demoted() {
    let mut server = mockito::Server::new_async().await;
    let _broken = server
        .mock("GET", "/broken/")
        .with_status(404)
        .create_async()
        .await;
    let _working = server
        .mock("GET", "/working/")
        .with_status(200)
        .with_body(LISTING)
        .create_async()
        .await;

    let broken = format!("{}/broken/", server.url());
    let working = format!("{}/working/", server.url());
    let health = Arc::new(MirrorHealth::new());
    let fetcher = fetcher(store(vec![broken.clone(), working.clone()]), health.clone());

    let versions = fetcher.get_remote_versions("demo", false).await;

    assert_eq!(versions.len(), 2);
    assert!(versions[0].download_url.starts_with(&working));
    assert_eq!(health.record(&broken).unwrap().consecutive_failures, 1);
    assert_eq!(
        health.sorted(&[broken.clone(), working.clone()]),
        vec![working, broken]
    );
}

#[tokio::test]
async fn test_fresh_cache_skips_network() {
    let mut server = mockito::Server::new_async().await;
    let listing = server
        .mock("GET", "/demo/")
        .with_status(200)
        .with_body(LISTING)
        .expect(0)
        .create_async()
        .await;

    let store = store(vec![format!("{}/demo/", server.url())]);
    let cached = RemoteVersionEntry {
        version: "9.9.9".to_string(),
        download_url: "https://cache.example.com/9.9.9.zip".to_string(),
        release_date: None,
        lts: None,
    };
    store.cache_set(&versions_cache_key("demo"), CachedVersions::now(vec![cached]));
    let fetcher = fetcher(store, Arc::new(MirrorHealth::new()));

    let versions = fetcher.get_remote_versions("demo", true).await;

    listing.assert_async().await;
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, "9.9.9");
}

#[tokio::test]
async fn test_all_mirrors_failing_returns_stale_cache() {
    let mut server = mockito::Server::new_async().await;
    let _down = server
        .mock("GET", "/demo/")
        .with_status(404)
        .create_async()
        .await;

    let store = store(vec![format!("{}/demo/", server.url())]);
    let stale = CachedVersions::at(
        chrono::Utc::now() - chrono::Duration::days(30),
        vec![RemoteVersionEntry {
            version: "1.0.0".to_string(),
            download_url: "https://old.example.com/1.0.0.zip".to_string(),
            release_date: None,
            lts: None,
        }],
    );
    store.cache_set(&versions_cache_key("demo"), stale);
    let fetcher = fetcher(store, Arc::new(MirrorHealth::new()));

    let versions = fetcher.get_remote_versions("demo", true).await;

    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, "1.0.0");
}

#[tokio::test]
async fn test_json_index_with_lts() {
    let mut server = mockito::Server::new_async().await;
    let _index = server
        .mock("GET", "/node/index.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[
                {"version": "v21.6.0", "date": "2024-01-14", "lts": false},
                {"version": "v20.11.0", "date": "2024-01-09", "lts": "Iron"}
            ]"#,
        )
        .create_async()
        .await;

    let mirror = format!("{}/node/", server.url());
    let settings = Settings {
        request_rate_limit: 1000.0,
        ..Settings::default()
    };
    let store = MemoryConfigStore::new(settings, std::env::temp_dir());
    store.set_template(
        "demo-node",
        ToolTemplate {
            mirror_list: vec![mirror.clone()],
            version_fetch_config: Some(
                VersionFetchRule::index("index.json", "{mirror}v{version}/node-v{version}.tar.gz")
                    .with_lts_field("lts"),
            ),
            ..ToolTemplate::default()
        },
    );
    let fetcher = fetcher(Arc::new(store), Arc::new(MirrorHealth::new()));

    let versions = fetcher.get_remote_versions("demo-node", false).await;

    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].version, "21.6.0");
    assert_eq!(versions[0].lts, Some(false));
    assert_eq!(versions[1].lts, Some(true));
    assert_eq!(
        versions[1].download_url,
        format!("{mirror}v20.11.0/node-v20.11.0.tar.gz")
    );
}
