//! Signals parsed out of the fetched page. The page is fetched exactly once
//! per analysis; every signal here works from that shared result, and all of
//! them drop to their schema fallbacks when the fetch failed.

use super::{fallback_for, FetchedPage, SignalId, Ternary};
use crate::url_input::{self, CheckedUrl};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

lazy_static! {
    static ref MAILTO: Regex = Regex::new(r"(?i)mailto:|\bmail\s*\(").unwrap();
    static ref STATUS_BAR: Regex =
        Regex::new(r"(?i)onmouseover\s*=\s*[^>]*window\.status").unwrap();
    static ref RIGHT_CLICK: Regex =
        Regex::new(r"(?i)event\.button\s*={2,3}\s*2|oncontextmenu\s*=").unwrap();
    static ref POPUP: Regex = Regex::new(r"(?i)window\.open\s*\(|\bprompt\s*\(").unwrap();
}

/// Fetch the page once, following redirects. Any failure (timeout, connect
/// error, non-2xx, body read error) yields `None`; the content signals then
/// take their fallbacks uniformly.
pub async fn fetch_page(
    client: &reqwest::Client,
    url: &CheckedUrl,
    lookup_timeout: Duration,
) -> Option<FetchedPage> {
    let request = client.get(url.as_str()).send();
    let response = match timeout(lookup_timeout, request).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            log::debug!("Page fetch failed for {}: {e}", url.as_str());
            return None;
        }
        Err(_) => {
            log::debug!("Page fetch timed out for {}", url.as_str());
            return None;
        }
    };

    if !response.status().is_success() {
        log::debug!(
            "Page fetch for {} returned status {}",
            url.as_str(),
            response.status()
        );
        return None;
    }

    let final_url = response.url().clone();
    match timeout(lookup_timeout, response.text()).await {
        Ok(Ok(body)) => Some(FetchedPage { final_url, body }),
        _ => {
            log::debug!("Reading page body failed for {}", url.as_str());
            None
        }
    }
}

/// Compute the eleven content-group signals from the shared fetch result.
/// Pure parsing; no I/O happens here.
pub fn compute(url: &CheckedUrl, page: Option<&FetchedPage>) -> Vec<(SignalId, Ternary)> {
    const CONTENT_SIGNALS: [SignalId; 11] = [
        SignalId::Favicon,
        SignalId::RequestUrlRatio,
        SignalId::AnchorRatio,
        SignalId::ScriptLinkRatio,
        SignalId::FormHandler,
        SignalId::InfoEmail,
        SignalId::AbnormalUrl,
        SignalId::StatusBarMod,
        SignalId::RightClickBlock,
        SignalId::PopupWindow,
        SignalId::IframeUse,
    ];

    let page = match page {
        Some(p) => p,
        None => {
            return CONTENT_SIGNALS
                .iter()
                .map(|&id| (id, fallback_for(id)))
                .collect()
        }
    };

    let document = Html::parse_document(&page.body);
    let root = url.root_domain();

    vec![
        (SignalId::Favicon, favicon(&document, url, &root)),
        (SignalId::RequestUrlRatio, request_url_ratio(&document, url, &root)),
        (SignalId::AnchorRatio, anchor_ratio(&document, url, &root)),
        (SignalId::ScriptLinkRatio, script_link_ratio(&document, url, &root)),
        (SignalId::FormHandler, form_handler(&document, url, &root)),
        (SignalId::InfoEmail, info_email(&page.body)),
        (SignalId::AbnormalUrl, abnormal_url(url, page)),
        (SignalId::StatusBarMod, pattern_signal(&STATUS_BAR, &page.body)),
        (SignalId::RightClickBlock, pattern_signal(&RIGHT_CLICK, &page.body)),
        (SignalId::PopupWindow, pattern_signal(&POPUP, &page.body)),
        (SignalId::IframeUse, iframe_use(&document)),
    ]
}

/// Does the reference point away from the page's own registrable domain?
/// Relative references and fragment/javascript pseudo-links count as local.
fn is_external(reference: &str, base: &CheckedUrl, root: &str) -> bool {
    let trimmed = reference.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("data:")
    {
        return false;
    }
    match Url::parse(trimmed) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => {
                let host = host.to_lowercase();
                host != base.host() && url_input::root_domain(&host) != root
            }
            None => false,
        },
        // Not an absolute URL: relative to the page, so local.
        Err(_) => false,
    }
}

fn ratio_signal(external: usize, total: usize, low: f64, high: f64) -> Ternary {
    if total == 0 {
        return Ternary::Legit;
    }
    let pct = external as f64 / total as f64 * 100.0;
    if pct < low {
        Ternary::Legit
    } else if pct <= high {
        Ternary::Neutral
    } else {
        Ternary::Phishing
    }
}

fn favicon(document: &Html, url: &CheckedUrl, root: &str) -> Ternary {
    let selector = Selector::parse("link").unwrap();
    for element in document.select(&selector) {
        let rel = element.value().attr("rel").unwrap_or("");
        if !rel.to_lowercase().contains("icon") {
            continue;
        }
        let href = element.value().attr("href").unwrap_or("");
        return if is_external(href, url, root) {
            Ternary::Phishing
        } else {
            Ternary::Legit
        };
    }
    // No favicon declared at all; browsers fall back to the site root.
    Ternary::Legit
}

fn request_url_ratio(document: &Html, url: &CheckedUrl, root: &str) -> Ternary {
    let selector = Selector::parse("img[src], audio[src], embed[src], iframe[src]").unwrap();
    let mut total = 0;
    let mut external = 0;
    for element in document.select(&selector) {
        if let Some(src) = element.value().attr("src") {
            total += 1;
            if is_external(src, url, root) {
                external += 1;
            }
        }
    }
    ratio_signal(external, total, 22.0, 61.0)
}

fn anchor_ratio(document: &Html, url: &CheckedUrl, root: &str) -> Ternary {
    let selector = Selector::parse("a[href]").unwrap();
    let mut total = 0;
    let mut unsafe_count = 0;
    for element in document.select(&selector) {
        let href = element.value().attr("href").unwrap_or("").trim().to_lowercase();
        total += 1;
        if href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || is_external(&href, url, root)
        {
            unsafe_count += 1;
        }
    }
    ratio_signal(unsafe_count, total, 31.0, 67.0)
}

fn script_link_ratio(document: &Html, url: &CheckedUrl, root: &str) -> Ternary {
    let selector = Selector::parse("link[href], script[src]").unwrap();
    let mut total = 0;
    let mut external = 0;
    for element in document.select(&selector) {
        let reference = element
            .value()
            .attr("href")
            .or_else(|| element.value().attr("src"))
            .unwrap_or("");
        total += 1;
        if is_external(reference, url, root) {
            external += 1;
        }
    }
    ratio_signal(external, total, 17.0, 81.0)
}

fn form_handler(document: &Html, url: &CheckedUrl, root: &str) -> Ternary {
    let selector = Selector::parse("form").unwrap();
    let mut worst = Ternary::Legit;
    let mut any = false;
    for element in document.select(&selector) {
        any = true;
        let action = element.value().attr("action").unwrap_or("").trim();
        if action.is_empty() || action == "about:blank" {
            return Ternary::Phishing;
        }
        if is_external(action, url, root) {
            worst = Ternary::Neutral;
        }
    }
    if any {
        worst
    } else {
        Ternary::Legit
    }
}

fn info_email(body: &str) -> Ternary {
    if MAILTO.is_match(body) {
        Ternary::Phishing
    } else {
        Ternary::Legit
    }
}

/// The host we asked for should be the host that answered. Redirects that
/// land on a different registrable domain are suspicious.
fn abnormal_url(url: &CheckedUrl, page: &FetchedPage) -> Ternary {
    match page.final_url.host_str() {
        Some(final_host) => {
            let final_host = final_host.to_lowercase();
            if final_host == url.host() || url_input::root_domain(&final_host) == url.root_domain()
            {
                Ternary::Legit
            } else {
                Ternary::Phishing
            }
        }
        None => Ternary::Phishing,
    }
}

fn pattern_signal(pattern: &Regex, body: &str) -> Ternary {
    if pattern.is_match(body) {
        Ternary::Phishing
    } else {
        Ternary::Legit
    }
}

fn iframe_use(document: &Html) -> Ternary {
    let selector = Selector::parse("iframe, frame").unwrap();
    if document.select(&selector).next().is_some() {
        Ternary::Phishing
    } else {
        Ternary::Legit
    }
}
