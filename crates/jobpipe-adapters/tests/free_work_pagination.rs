use std::time::Duration;

use jobpipe_adapters::{AdapterContext, AdapterError, FreeWorkAdapter, SourceAdapter, SourceConfig};
use jobpipe_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use mockito::{Matcher, Server};
use uuid::Uuid;

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(5),
        backoff: BackoffPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        },
        ..HttpClientConfig::default()
    })
    .unwrap()
}

fn ctx() -> AdapterContext {
    AdapterContext {
        run_id: Uuid::new_v4(),
        request_delay: Duration::ZERO,
    }
}

fn listing(slugs: &[&str], next: &str) -> String {
    let links: String = slugs
        .iter()
        .map(|s| format!(r#"<a href="/fr/tech-it/job-mission/{s}">{s}</a>"#))
        .collect();
    format!("<html><body><main>{links}</main><nav>{next}</nav></body></html>")
}

#[tokio::test]
async fn walks_pages_until_next_is_disabled() {
    let mut server = Server::new_async().await;
    let page1 = server
        .mock("GET", "/jobs")
        .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
        .with_status(200)
        .with_body(listing(&["dev-rust", "data-engineer"], "<a href=\"?page=2\">Suivant</a>"))
        .expect(1)
        .create_async()
        .await;
    let page2 = server
        .mock("GET", "/jobs")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(200)
        .with_body(listing(
            &["data-engineer", "devops-aws"],
            "<button disabled>Suivant</button>",
        ))
        .expect(1)
        .create_async()
        .await;
    let page3 = server
        .mock("GET", "/jobs")
        .match_query(Matcher::UrlEncoded("page".into(), "3".into()))
        .expect(0)
        .create_async()
        .await;

    let adapter = FreeWorkAdapter::new(SourceConfig::new("fullstack", format!("{}/jobs", server.url()))).unwrap();
    let urls = adapter.get_all_job_urls(&fetcher(), &ctx()).await.unwrap();

    let base = server.url();
    assert_eq!(
        urls,
        vec![
            format!("{base}/fr/tech-it/job-mission/dev-rust"),
            format!("{base}/fr/tech-it/job-mission/data-engineer"),
            format!("{base}/fr/tech-it/job-mission/devops-aws"),
        ]
    );
    page1.assert_async().await;
    page2.assert_async().await;
    page3.assert_async().await;
}

#[tokio::test]
async fn max_pages_bounds_the_walk() {
    let mut server = Server::new_async().await;
    let pages = server
        .mock("GET", "/jobs")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(listing(&["same-offer"], "<a>Suivant</a>"))
        .expect(2)
        .create_async()
        .await;

    let mut config = SourceConfig::new("data", format!("{}/jobs", server.url()));
    config.max_pages = 2;
    let adapter = FreeWorkAdapter::new(config).unwrap();
    let urls = adapter.get_all_job_urls(&fetcher(), &ctx()).await.unwrap();

    assert_eq!(urls.len(), 1);
    pages.assert_async().await;
}

#[tokio::test]
async fn later_page_failure_keeps_collected_urls() {
    let mut server = Server::new_async().await;
    let _page1 = server
        .mock("GET", "/jobs")
        .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
        .with_status(200)
        .with_body(listing(&["dev-rust"], "<a>Suivant</a>"))
        .create_async()
        .await;
    let _page2 = server
        .mock("GET", "/jobs")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(404)
        .create_async()
        .await;

    let adapter = FreeWorkAdapter::new(SourceConfig::new("fullstack", format!("{}/jobs", server.url()))).unwrap();
    let urls = adapter.get_all_job_urls(&fetcher(), &ctx()).await.unwrap();
    assert_eq!(urls, vec![format!("{}/fr/tech-it/job-mission/dev-rust", server.url())]);
}

#[tokio::test]
async fn first_page_failure_is_an_error() {
    let mut server = Server::new_async().await;
    let _page1 = server
        .mock("GET", "/jobs")
        .match_query(Matcher::Any)
        .with_status(403)
        .create_async()
        .await;

    let adapter = FreeWorkAdapter::new(SourceConfig::new("fullstack", format!("{}/jobs", server.url()))).unwrap();
    let err = adapter.get_all_job_urls(&fetcher(), &ctx()).await.unwrap_err();
    assert!(matches!(err, AdapterError::Fetch(_)));
}
