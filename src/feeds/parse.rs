//! RSS / Atom entry extraction.

use chrono::{DateTime, Utc};

use crate::router::is_torrent_link;
use crate::{Error, Result};

/// MIME type announcing a torrent enclosure
pub const TORRENT_MIME: &str = "application/x-bittorrent";

/// A feed entry carrying a torrent-like candidate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedEntry {
    /// md5 of the entry's guid, else its link, else the candidate
    pub entry_id: String,
    /// Entry title ("Unknown" when missing)
    pub title: String,
    /// Magnet or `.torrent` link to hand a backend
    pub candidate: String,
    /// Published (or updated) timestamp
    pub published: Option<DateTime<Utc>>,
}

fn entry_id(guid: Option<&str>, link: Option<&str>, candidate: &str) -> String {
    let key = guid
        .filter(|g| !g.is_empty())
        .or(link.filter(|l| !l.is_empty()))
        .unwrap_or(candidate);
    format!("{:x}", md5::compute(key.as_bytes()))
}

fn title_or_unknown(title: Option<&str>) -> String {
    title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

/// Parse a feed body, trying RSS first and Atom second
///
/// Entries without a torrent-like candidate are dropped.
pub fn parse_feed(content: &str) -> Result<Vec<FeedEntry>> {
    match parse_as_rss(content) {
        Ok(entries) => Ok(entries),
        Err(rss_err) => {
            tracing::debug!(error = %rss_err, "Not an RSS document, trying Atom");
            parse_as_atom(content).map_err(|atom_err| {
                Error::Other(format!(
                    "Failed to parse feed as RSS or Atom. RSS error: {}. Atom error: {}",
                    rss_err, atom_err
                ))
            })
        }
    }
}

fn parse_as_rss(content: &str) -> Result<Vec<FeedEntry>> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| Error::Other(format!("RSS parse error: {}", e)))?;

    let entries = channel
        .items()
        .iter()
        .filter_map(|item| {
            let link = item.link();
            let candidate = link
                .filter(|l| is_torrent_link(l))
                .or_else(|| {
                    item.enclosure()
                        .filter(|enc| enc.mime_type() == TORRENT_MIME)
                        .map(|enc| enc.url())
                })
                .or_else(|| {
                    item.enclosure()
                        .map(|enc| enc.url())
                        .filter(|url| is_torrent_link(url))
                })?
                .to_string();

            let published = item.pub_date().and_then(|date| {
                DateTime::parse_from_rfc2822(date)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            });

            Some(FeedEntry {
                entry_id: entry_id(item.guid().map(|g| g.value()), link, &candidate),
                title: title_or_unknown(item.title()),
                candidate,
                published,
            })
        })
        .collect();

    Ok(entries)
}

fn parse_as_atom(content: &str) -> Result<Vec<FeedEntry>> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes())
        .map_err(|e| Error::Other(format!("Atom parse error: {}", e)))?;

    let entries = feed
        .entries()
        .iter()
        .filter_map(|entry| {
            let links = entry.links();
            let primary = links
                .iter()
                .find(|l| l.rel() == "alternate")
                .or_else(|| links.first())
                .map(|l| l.href());

            let candidate = primary
                .filter(|href| is_torrent_link(href))
                .or_else(|| {
                    links
                        .iter()
                        .find(|l| l.mime_type() == Some(TORRENT_MIME))
                        .map(|l| l.href())
                })
                .or_else(|| {
                    links
                        .iter()
                        .map(|l| l.href())
                        .find(|href| is_torrent_link(href))
                })?
                .to_string();

            let published = entry
                .published()
                .copied()
                .unwrap_or_else(|| *entry.updated())
                .with_timezone(&Utc);

            Some(FeedEntry {
                entry_id: entry_id(Some(entry.id()), primary, &candidate),
                title: title_or_unknown(Some(entry.title().as_str())),
                candidate,
                published: Some(published),
            })
        })
        .collect();

    Ok(entries)
}
