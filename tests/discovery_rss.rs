// tests/discovery_rss.rs
use news_pulse::pipeline::providers::google_news_rss::{parse_feed_links, GoogleNewsRssDiscovery};
use news_pulse::pipeline::{Discovery, Reference};

const FEED_XML: &str = include_str!("fixtures/google_news_rss.xml");

#[test]
fn feed_links_are_extracted_in_order() {
    let links = parse_feed_links(FEED_XML).expect("feed parses");
    assert_eq!(
        links,
        vec![
            Reference::from("https://news.google.com/rss/articles/CBMiA1?oc=5"),
            Reference::from("https://news.google.com/rss/articles/CBMiB2?oc=5"),
        ]
    );
}

#[tokio::test]
async fn fixture_discovery_answers_every_query() {
    let d = GoogleNewsRssDiscovery::from_fixture(FEED_XML);
    assert_eq!(d.name(), "google_news_rss");
    let a = d.search("India News").await.expect("search ok");
    let b = d.search("Mumbai").await.expect("search ok");
    assert_eq!(a.len(), 2);
    assert_eq!(a, b);
}

#[test]
fn garbage_feed_is_an_error() {
    assert!(parse_feed_links("<html><body>captcha</body></html>").is_err());
}
