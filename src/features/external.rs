//! Third-party reputation signals: redirect-hop probing, traffic and page
//! rank, search-engine index membership, and blacklist matching. Rank data
//! comes from a pluggable provider; the offline provider answers from fixed
//! tables so nothing here needs the network during tests.

use super::{fallback_for, FetchedPage, SignalId, Ternary};
use crate::config::Config;
use crate::features::domain::DnsResolver;
use crate::url_input::CheckedUrl;
use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

const MAX_REDIRECT_PROBES: u8 = 6;
const TRAFFIC_RANK_CUTOFF: u64 = 100_000;
const MIN_PAGE_RANK: u8 = 2;

lazy_static! {
    static ref LINK_TAG: Regex = Regex::new(r"(?i)<a\s[^>]*href").unwrap();
    // Host fragments of services that overwhelmingly host phishing kits.
    static ref REPORTED_HOSTS: Regex = Regex::new(
        r"(?i)at\.ua$|usa\.cc$|pe\.hu$|esy\.es$|hol\.es$|myjino\.ru$|96\.lt$|sweddy\.com$|baltazarpresentes\.com\.br$"
    )
    .unwrap();
}

/// IPs repeatedly reported as phishing-kit hosting.
const REPORTED_IPS: &[&str] = &[
    "146.112.61.108",
    "213.174.157.151",
    "121.50.168.88",
    "192.185.217.116",
    "78.46.211.158",
    "181.174.165.13",
    "46.242.145.103",
    "121.50.168.40",
    "83.125.22.219",
    "107.151.148.44",
    "64.70.19.203",
    "199.184.144.27",
    "119.28.52.61",
    "54.83.43.69",
    "216.58.192.225",
    "23.253.126.58",
    "104.239.157.210",
    "175.126.123.219",
    "141.8.224.221",
    "43.229.108.32",
    "103.232.215.140",
    "69.172.201.153",
    "54.225.104.146",
    "31.170.160.61",
    "208.100.26.234",
    "204.11.56.48",
    "110.34.231.42",
];

/// Traffic/page-rank and index-membership source.
pub enum RankProvider {
    /// Fixed tables, deterministic. Default when no service is configured.
    Offline,
    /// A deployed rank service speaking a small JSON protocol.
    Http { base: String, client: reqwest::Client },
}

impl RankProvider {
    pub fn from_config(config: &Config) -> Result<Self> {
        match (&config.rank_service_url, config.offline_providers) {
            (Some(base), false) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.lookup_timeout_seconds))
                    .user_agent(config.user_agent.clone())
                    .build()?;
                Ok(RankProvider::Http {
                    base: base.trim_end_matches('/').to_string(),
                    client,
                })
            }
            _ => Ok(RankProvider::Offline),
        }
    }

    pub async fn traffic_rank(&self, host: &str) -> Result<u64> {
        match self {
            RankProvider::Offline => match offline_entry(host) {
                Some((rank, _, _)) => Ok(rank),
                None => Err(anyhow!("No traffic rank data for {host}")),
            },
            RankProvider::Http { base, client } => {
                let value: serde_json::Value = client
                    .get(format!("{base}/rank"))
                    .query(&[("host", host)])
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                value["traffic_rank"]
                    .as_u64()
                    .ok_or_else(|| anyhow!("Rank service returned no traffic_rank for {host}"))
            }
        }
    }

    pub async fn page_rank(&self, host: &str) -> Result<u8> {
        match self {
            RankProvider::Offline => match offline_entry(host) {
                Some((_, pr, _)) => Ok(pr),
                None => Err(anyhow!("No page rank data for {host}")),
            },
            RankProvider::Http { base, client } => {
                let value: serde_json::Value = client
                    .get(format!("{base}/rank"))
                    .query(&[("host", host)])
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                value["page_rank"]
                    .as_u64()
                    .map(|v| v.min(10) as u8)
                    .ok_or_else(|| anyhow!("Rank service returned no page_rank for {host}"))
            }
        }
    }

    pub async fn is_indexed(&self, url: &str) -> Result<bool> {
        match self {
            RankProvider::Offline => {
                let host = Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h.to_string()))
                    .ok_or_else(|| anyhow!("Unparseable URL for index check"))?;
                match offline_entry(&host) {
                    Some((_, _, indexed)) => Ok(indexed),
                    None => Err(anyhow!("No index data for {host}")),
                }
            }
            RankProvider::Http { base, client } => {
                let value: serde_json::Value = client
                    .get(format!("{base}/indexed"))
                    .query(&[("url", url)])
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                value["indexed"]
                    .as_bool()
                    .ok_or_else(|| anyhow!("Rank service returned no indexed flag"))
            }
        }
    }
}

/// (traffic rank, page rank 0-10, indexed) for the offline tables.
fn offline_entry(host: &str) -> Option<(u64, u8, bool)> {
    let host = host.strip_prefix("www.").unwrap_or(host);
    match host {
        "google.com" => Some((1, 10, true)),
        "github.com" => Some((60, 9, true)),
        "example.com" => Some((1_500, 7, true)),
        "established.org" => Some((40_000, 5, true)),
        "newdomain.info" => Some((2_500_000, 1, false)),
        _ => None,
    }
}

/// External-service signal computer. Owns a non-redirecting probe client so
/// the redirect walk can count hops itself.
pub struct ExternalServices {
    probe: reqwest::Client,
    rank: RankProvider,
    resolver: DnsResolver,
    offline: bool,
    timeout: Duration,
}

impl ExternalServices {
    pub fn new(config: &Config, resolver: DnsResolver) -> Result<Self> {
        let timeout = Duration::from_secs(config.lookup_timeout_seconds);
        let probe = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(ExternalServices {
            probe,
            rank: RankProvider::from_config(config)?,
            resolver,
            offline: config.offline_providers,
            timeout,
        })
    }

    /// Compute the five lookup-backed external signals concurrently.
    /// (LinksPointing comes from the shared page fetch instead.)
    pub async fn compute(&self, url: &CheckedUrl) -> Vec<(SignalId, Ternary)> {
        let (hops, traffic, page_rank, indexed, stats) = tokio::join!(
            self.forwarding_hops(url),
            timeout(self.timeout, self.rank.traffic_rank(url.host())),
            timeout(self.timeout, self.rank.page_rank(url.host())),
            timeout(self.timeout, self.rank.is_indexed(url.as_str())),
            self.stats_report(url),
        );

        let traffic_signal = match traffic {
            Ok(Ok(rank)) if rank < TRAFFIC_RANK_CUTOFF => Ternary::Legit,
            Ok(Ok(_)) => Ternary::Phishing,
            _ => fallback_for(SignalId::WebTraffic),
        };

        let page_rank_signal = match page_rank {
            Ok(Ok(pr)) if pr >= MIN_PAGE_RANK => Ternary::Legit,
            Ok(Ok(_)) => Ternary::Phishing,
            _ => fallback_for(SignalId::PageRank),
        };

        let index_signal = match indexed {
            Ok(Ok(true)) => Ternary::Legit,
            Ok(Ok(false)) => Ternary::Phishing,
            _ => fallback_for(SignalId::SearchIndex),
        };

        vec![
            (SignalId::ForwardingHops, hops),
            (SignalId::WebTraffic, traffic_signal),
            (SignalId::PageRank, page_rank_signal),
            (SignalId::SearchIndex, index_signal),
            (SignalId::StatsReport, stats),
        ]
    }

    /// Walk redirects by hand with HEAD requests and count the hops.
    async fn forwarding_hops(&self, url: &CheckedUrl) -> Ternary {
        if self.offline {
            // No network in offline mode; hosts the resolver knows are
            // taken as direct, everything else uses the fallback.
            return match self.resolver.resolve(url.host()).await {
                Ok(_) => Ternary::Legit,
                Err(_) => fallback_for(SignalId::ForwardingHops),
            };
        }

        let mut current = url.as_str().to_string();
        let mut hops: u8 = 0;

        while hops < MAX_REDIRECT_PROBES {
            let response = match timeout(self.timeout, self.probe.head(&current).send()).await {
                Ok(Ok(resp)) => resp,
                _ => {
                    log::debug!("Redirect probe failed for {current}");
                    return fallback_for(SignalId::ForwardingHops);
                }
            };

            if !response.status().is_redirection() {
                break;
            }
            let location = match response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
            {
                Some(l) => l.to_string(),
                None => break,
            };

            current = if location.starts_with("http") {
                location
            } else {
                match Url::parse(&current).and_then(|base| base.join(&location)) {
                    Ok(joined) => joined.to_string(),
                    Err(_) => break,
                }
            };
            hops += 1;
        }

        match hops {
            0 | 1 => Ternary::Legit,
            2..=4 => Ternary::Neutral,
            _ => Ternary::Phishing,
        }
    }

    /// Match the host and its resolved address against reported phishing
    /// infrastructure. Inability to resolve proves nothing here; DnsRecord
    /// already covers unresolvable hosts.
    async fn stats_report(&self, url: &CheckedUrl) -> Ternary {
        if REPORTED_HOSTS.is_match(url.host()) {
            return Ternary::Phishing;
        }

        match timeout(self.timeout, self.resolver.resolve(url.host())).await {
            Ok(Ok(addrs)) => {
                for addr in addrs {
                    if REPORTED_IPS.contains(&addr.to_string().as_str()) {
                        return Ternary::Phishing;
                    }
                }
                Ternary::Legit
            }
            _ => fallback_for(SignalId::StatsReport),
        }
    }
}

/// Anchor density of the fetched page, used as an inbound-link estimate.
pub fn links_pointing(page: Option<&FetchedPage>) -> Ternary {
    match page {
        Some(page) => match LINK_TAG.find_iter(&page.body).count() {
            0 => Ternary::Legit,
            1 | 2 => Ternary::Neutral,
            _ => Ternary::Phishing,
        },
        None => fallback_for(SignalId::LinksPointing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_input;
    use std::collections::HashMap;

    fn offline_services() -> ExternalServices {
        let config = Config {
            offline_providers: true,
            ..Config::default()
        };
        let resolver = DnsResolver::new(true).unwrap();
        ExternalServices::new(&config, resolver).unwrap()
    }

    /// Accepts connections and holds them open without ever answering.
    async fn stalled_listener() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let _hold = socket;
                    tokio::time::sleep(Duration::from_secs(60)).await;
                });
            }
        });
        port
    }

    #[test]
    fn test_rank_provider_selection() {
        let offline = RankProvider::from_config(&Config {
            offline_providers: true,
            rank_service_url: Some("http://rank.internal:8080".to_string()),
            ..Config::default()
        })
        .unwrap();
        assert!(matches!(offline, RankProvider::Offline));

        let http = RankProvider::from_config(&Config {
            rank_service_url: Some("http://rank.internal:8080/".to_string()),
            ..Config::default()
        })
        .unwrap();
        match http {
            RankProvider::Http { base, .. } => assert_eq!(base, "http://rank.internal:8080"),
            RankProvider::Offline => panic!("expected http provider"),
        }
    }

    #[tokio::test]
    async fn test_unresponsive_services_fall_back_within_one_timeout() {
        let port = stalled_listener().await;
        let config = Config {
            offline_providers: false,
            lookup_timeout_seconds: 1,
            rank_service_url: Some(format!("http://127.0.0.1:{port}")),
            ..Config::default()
        };
        // DNS stays offline so only the HTTP paths stall.
        let services = ExternalServices::new(&config, DnsResolver::new(true).unwrap()).unwrap();
        let url = url_input::check(&format!("http://127.0.0.1:{port}/login")).unwrap();

        let started = std::time::Instant::now();
        let signals: HashMap<_, _> = services.compute(&url).await.into_iter().collect();

        // The lookups run concurrently, each under its own timeout, so the
        // whole group finishes in about one timeout rather than their sum.
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(signals.len(), 5);
        assert_eq!(signals[&SignalId::WebTraffic], fallback_for(SignalId::WebTraffic));
        assert_eq!(signals[&SignalId::PageRank], fallback_for(SignalId::PageRank));
        assert_eq!(signals[&SignalId::SearchIndex], fallback_for(SignalId::SearchIndex));
        assert_eq!(
            signals[&SignalId::ForwardingHops],
            fallback_for(SignalId::ForwardingHops)
        );
    }

    #[tokio::test]
    async fn test_offline_popular_host_signals() {
        let services = offline_services();
        let url = url_input::check("https://www.google.com").unwrap();
        let signals: HashMap<_, _> = services.compute(&url).await.into_iter().collect();

        assert_eq!(signals[&SignalId::WebTraffic], Ternary::Legit);
        assert_eq!(signals[&SignalId::PageRank], Ternary::Legit);
        assert_eq!(signals[&SignalId::SearchIndex], Ternary::Legit);
        assert_eq!(signals[&SignalId::StatsReport], Ternary::Legit);
    }

    #[tokio::test]
    async fn test_offline_unknown_host_rank_is_neutral() {
        let services = offline_services();
        let url = url_input::check("http://unheard-of.example.zz").unwrap();
        let signals: HashMap<_, _> = services.compute(&url).await.into_iter().collect();

        // An unanswered rank lookup is indeterminate, not incriminating.
        assert_eq!(signals[&SignalId::WebTraffic], Ternary::Neutral);
        assert_eq!(signals[&SignalId::PageRank], Ternary::Neutral);
        assert_eq!(signals[&SignalId::SearchIndex], Ternary::Neutral);
    }

    #[tokio::test]
    async fn test_offline_unpopular_host_flags() {
        let services = offline_services();
        let url = url_input::check("http://newdomain.info").unwrap();
        let signals: HashMap<_, _> = services.compute(&url).await.into_iter().collect();

        assert_eq!(signals[&SignalId::WebTraffic], Ternary::Phishing);
        assert_eq!(signals[&SignalId::PageRank], Ternary::Phishing);
        assert_eq!(signals[&SignalId::SearchIndex], Ternary::Phishing);
    }

    #[tokio::test]
    async fn test_reported_host_pattern() {
        let services = offline_services();
        let url = url_input::check("http://login.esy.es").unwrap();
        let signals: HashMap<_, _> = services.compute(&url).await.into_iter().collect();
        assert_eq!(signals[&SignalId::StatsReport], Ternary::Phishing);
    }

    #[test]
    fn test_links_pointing_buckets() {
        let url = url_input::check("http://example.com").unwrap();
        let page = |body: &str| FetchedPage {
            final_url: Url::parse(url.as_str()).unwrap(),
            body: body.to_string(),
        };

        assert_eq!(links_pointing(Some(&page("<p>none</p>"))), Ternary::Legit);
        assert_eq!(
            links_pointing(Some(&page(r#"<a href="/a">a</a>"#))),
            Ternary::Neutral
        );
        assert_eq!(
            links_pointing(Some(&page(
                r#"<a href="/a">a</a><a href="/b">b</a><a href="/c">c</a>"#
            ))),
            Ternary::Phishing
        );
        assert_eq!(
            links_pointing(None),
            fallback_for(SignalId::LinksPointing)
        );
    }
}
