//! Seeds a target list from the links of a web page.
use std::time::Duration;

use itertools::Itertools;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

static LINKED_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https?://([a-z0-9\-.]+)"#).expect("link pattern is valid")
});

/// Fetches `url` and returns the distinct host names it links to, in the
/// order they first appear.
pub async fn crawl(url: &str, timeout: Duration) -> reqwest::Result<Vec<String>> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let body = client.get(url).send().await?.error_for_status()?.text().await?;
    let hosts = linked_hosts(&body);
    info!("Found {} domains on {url}", hosts.len());
    debug!("Crawled domains: {hosts:?}");
    Ok(hosts)
}

/// Host names of every absolute `http(s)://` link in `body`, lowercased and
/// de-duplicated.
pub fn linked_hosts(body: &str) -> Vec<String> {
    LINKED_HOST
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_ascii_lowercase())
        .filter(|host| host.contains('.'))
        .unique()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::linked_hosts;

    #[test]
    fn extracts_distinct_hosts_in_order() {
        let body = r#"
            <a href="https://www.Example.com/path?q=1">one</a>
            <a href='http://cdn.example.net:8080/x.js'>two</a>
            <a href="https://www.example.com/">again</a>
            <a href="/relative/link">relative</a>
            <a href="https://localhost/">no dot</a>
        "#;

        assert_eq!(linked_hosts(body), ["www.example.com", "cdn.example.net"]);
    }

    #[test]
    fn empty_page_has_no_hosts() {
        assert!(linked_hosts("<html></html>").is_empty());
    }
}
