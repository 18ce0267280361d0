//! Mock backend responses and feed fixtures

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Info hash used by the feed fixtures
pub const CACHED_HASH: &str = "0123456789abcdef0123456789abcdef01234567";

/// Content served for the resolved download
pub const MOVIE_CONTENT: &[u8] = b"pretend this is a movie";

/// RSS feed with a single magnet entry
pub fn rss_with_entries(entries: &[(&str, &str)]) -> String {
    let items: String = entries
        .iter()
        .map(|(guid, link)| {
            format!(
                "<item><title>{guid}</title><guid>{guid}</guid><link>{}</link></item>",
                link.replace('&', "&amp;")
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Test feed</title><link>https://feeds.example</link><description>d</description>{items}</channel></rss>"#
    )
}

/// Magnet link for [`CACHED_HASH`]
pub fn cached_magnet() -> String {
    format!("magnet:?xt=urn:btih:{}&dn=Cached.Release", CACHED_HASH)
}

/// Mount a resolver account holding one finished torrent `id` whose only link
/// resolves to `/files/{filename}` on the same server
pub async fn mount_ready_torrent(server: &MockServer, id: &str, filename: &str) {
    Mock::given(method("GET"))
        .and(path("/torrents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": id,
            "filename": filename,
            "status": "downloaded",
            "bytes": MOVIE_CONTENT.len(),
            "progress": 100,
        }])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/torrents/info/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "links": [format!("https://hoster.example/{id}")],
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/unrestrict/link"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "download": format!("{}/files/{filename}", server.uri()),
            "filename": filename,
            "filesize": MOVIE_CONTENT.len(),
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/files/{filename}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(MOVIE_CONTENT.to_vec()))
        .mount(server)
        .await;
}
