use context_connectors::config::WebsiteSourceConfig;
use context_connectors::models::ChangeDetection;
use context_connectors::sources::website::WebsiteSource;
use context_connectors::sources::Source;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(title: &str, body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            title, body
        ))
}

async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            "Home",
            r#"<p>Welcome</p>
               <a href="/blog/">Blog</a>
               <a href="/private/admin">Admin</a>
               <a href="https://elsewhere.test/page">Offsite</a>"#,
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(html("Blog", r#"<a href="/guide/intro#top">Guide</a>"#))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/guide/intro"))
        .respond_with(html(
            "Intro",
            "<script>var hidden = 1;</script><h1>Getting started</h1><p>Install &amp; run</p>",
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/admin"))
        .respond_with(html("Admin", "secret"))
        .expect(0)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_include_filters_indexing_not_traversal() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let mut config = WebsiteSourceConfig::new(format!("{}/", server.uri()));
    config.include = vec!["/guide/**".to_string()];
    let source = WebsiteSource::new(config).unwrap();

    let pages = source.fetch_all().await.unwrap();
    let paths: Vec<_> = pages.iter().map(|p| p.path.as_str()).collect();
    assert_eq!(paths, vec!["guide/intro"]);

    let intro = &pages[0].contents;
    assert!(intro.starts_with("# Intro\n\n"));
    assert!(intro.contains("Getting started"));
    assert!(intro.contains("Install & run"));
    assert!(!intro.contains("hidden"));
}

#[tokio::test]
async fn test_crawl_is_reused_for_listing_and_reads() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let source = WebsiteSource::new(WebsiteSourceConfig::new(server.uri())).unwrap();
    let listed: Vec<_> = source
        .list_files(None)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.path)
        .collect();
    assert_eq!(listed, vec!["blog/index", "guide/intro", "index"]);

    let home = source.read_file("index").await.unwrap().unwrap();
    assert!(home.contains("Welcome"));
    assert!(source.read_file("../etc/passwd").await.unwrap().is_none());

    let requests = server.received_requests().await.unwrap();
    let homepage_hits = requests.iter().filter(|r| r.url.path() == "/").count();
    assert_eq!(homepage_hits, 1);
}

#[tokio::test]
async fn test_max_depth_limits_crawl() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let mut config = WebsiteSourceConfig::new(server.uri());
    config.max_depth = 1;
    let source = WebsiteSource::new(config).unwrap();

    let paths: Vec<_> = source
        .fetch_all()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.path)
        .collect();
    assert_eq!(paths, vec!["blog/index", "index"]);
}

#[tokio::test]
async fn test_website_changes_are_never_incremental() {
    let server = MockServer::start().await;
    let source = WebsiteSource::new(WebsiteSourceConfig::new(server.uri())).unwrap();
    let previous = source.metadata().await.unwrap();
    assert!(matches!(
        source.fetch_changes(&previous).await.unwrap(),
        ChangeDetection::Unsupported { .. }
    ));
}
