pub mod address_bar;
pub mod content;
pub mod domain;
pub mod external;

use crate::config::Config;
use crate::errors::AnalysisError;
use crate::url_input::CheckedUrl;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// One heuristic measurement: 1 leans legitimate, -1 leans phishing,
/// 0 is indeterminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ternary {
    Phishing,
    Neutral,
    Legit,
}

impl Ternary {
    pub fn as_i8(self) -> i8 {
        match self {
            Ternary::Phishing => -1,
            Ternary::Neutral => 0,
            Ternary::Legit => 1,
        }
    }

    pub fn from_i8(v: i8) -> Option<Self> {
        match v {
            -1 => Some(Ternary::Phishing),
            0 => Some(Ternary::Neutral),
            1 => Some(Ternary::Legit),
            _ => None,
        }
    }
}

impl Serialize for Ternary {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

impl<'de> Deserialize<'de> for Ternary {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = i8::deserialize(deserializer)?;
        Ternary::from_i8(v)
            .ok_or_else(|| serde::de::Error::custom(format!("signal value out of range: {v}")))
    }
}

/// The 30 named signals, in classifier schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalId {
    UsingIp,
    LongUrl,
    ShortUrl,
    AtSymbol,
    DoubleSlashRedirect,
    PrefixSuffix,
    SubDomains,
    HttpsScheme,
    DomainRegLength,
    Favicon,
    NonStdPort,
    HttpsInHost,
    RequestUrlRatio,
    AnchorRatio,
    ScriptLinkRatio,
    FormHandler,
    InfoEmail,
    AbnormalUrl,
    ForwardingHops,
    StatusBarMod,
    RightClickBlock,
    PopupWindow,
    IframeUse,
    DomainAge,
    DnsRecord,
    WebTraffic,
    PageRank,
    SearchIndex,
    LinksPointing,
    StatsReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalGroup {
    AddressBar,
    Domain,
    Content,
    ExternalService,
}

/// Schema entry: the signal's wire name, its group, and the value it takes
/// when its underlying lookup fails or times out. Keeping the fallbacks here
/// as data means no per-call-site error branching anywhere in the engine.
pub struct SignalSpec {
    pub id: SignalId,
    pub name: &'static str,
    pub group: SignalGroup,
    pub fallback: Ternary,
}

/// Positional schema consumed by the classifier. Position i of every
/// feature vector is SCHEMA[i].id, across all invocations.
pub const SCHEMA: [SignalSpec; 30] = [
    SignalSpec { id: SignalId::UsingIp, name: "using_ip", group: SignalGroup::AddressBar, fallback: Ternary::Legit },
    SignalSpec { id: SignalId::LongUrl, name: "long_url", group: SignalGroup::AddressBar, fallback: Ternary::Legit },
    SignalSpec { id: SignalId::ShortUrl, name: "short_url", group: SignalGroup::AddressBar, fallback: Ternary::Legit },
    SignalSpec { id: SignalId::AtSymbol, name: "at_symbol", group: SignalGroup::AddressBar, fallback: Ternary::Legit },
    SignalSpec { id: SignalId::DoubleSlashRedirect, name: "double_slash_redirect", group: SignalGroup::AddressBar, fallback: Ternary::Legit },
    SignalSpec { id: SignalId::PrefixSuffix, name: "prefix_suffix", group: SignalGroup::AddressBar, fallback: Ternary::Legit },
    SignalSpec { id: SignalId::SubDomains, name: "sub_domains", group: SignalGroup::AddressBar, fallback: Ternary::Legit },
    SignalSpec { id: SignalId::HttpsScheme, name: "https_scheme", group: SignalGroup::AddressBar, fallback: Ternary::Legit },
    SignalSpec { id: SignalId::DomainRegLength, name: "domain_reg_length", group: SignalGroup::Domain, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::Favicon, name: "favicon", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::NonStdPort, name: "non_std_port", group: SignalGroup::AddressBar, fallback: Ternary::Legit },
    SignalSpec { id: SignalId::HttpsInHost, name: "https_in_host", group: SignalGroup::AddressBar, fallback: Ternary::Legit },
    SignalSpec { id: SignalId::RequestUrlRatio, name: "request_url_ratio", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::AnchorRatio, name: "anchor_ratio", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::ScriptLinkRatio, name: "script_link_ratio", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::FormHandler, name: "form_handler", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::InfoEmail, name: "info_email", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::AbnormalUrl, name: "abnormal_url", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::ForwardingHops, name: "forwarding_hops", group: SignalGroup::ExternalService, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::StatusBarMod, name: "status_bar_mod", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::RightClickBlock, name: "right_click_block", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::PopupWindow, name: "popup_window", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::IframeUse, name: "iframe_use", group: SignalGroup::Content, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::DomainAge, name: "domain_age", group: SignalGroup::Domain, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::DnsRecord, name: "dns_record", group: SignalGroup::Domain, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::WebTraffic, name: "web_traffic", group: SignalGroup::ExternalService, fallback: Ternary::Neutral },
    SignalSpec { id: SignalId::PageRank, name: "page_rank", group: SignalGroup::ExternalService, fallback: Ternary::Neutral },
    SignalSpec { id: SignalId::SearchIndex, name: "search_index", group: SignalGroup::ExternalService, fallback: Ternary::Neutral },
    SignalSpec { id: SignalId::LinksPointing, name: "links_pointing", group: SignalGroup::ExternalService, fallback: Ternary::Phishing },
    SignalSpec { id: SignalId::StatsReport, name: "stats_report", group: SignalGroup::ExternalService, fallback: Ternary::Legit },
];

pub fn fallback_for(id: SignalId) -> Ternary {
    SCHEMA
        .iter()
        .find(|spec| spec.id == id)
        .map(|spec| spec.fallback)
        .unwrap_or(Ternary::Neutral)
}

/// Exactly 30 ternary values in schema order. Only the assembler builds
/// these; a missing slot aborts extraction instead of truncating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<Ternary>);

impl<'de> Deserialize<'de> for FeatureVector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<Ternary>::deserialize(deserializer)?;
        if values.len() != Self::LEN {
            return Err(serde::de::Error::custom(format!(
                "feature vector must have {} elements, got {}",
                Self::LEN,
                values.len()
            )));
        }
        Ok(FeatureVector(values))
    }
}

impl FeatureVector {
    pub const LEN: usize = 30;

    /// Assemble from per-signal outcomes. Every schema slot must be present.
    pub fn assemble(outcomes: &HashMap<SignalId, Ternary>) -> Result<Self, AnalysisError> {
        let mut values = Vec::with_capacity(Self::LEN);
        for spec in SCHEMA.iter() {
            match outcomes.get(&spec.id) {
                Some(v) => values.push(*v),
                None => {
                    return Err(AnalysisError::ExtractionFailed {
                        got: outcomes.len(),
                    })
                }
            }
        }
        Ok(FeatureVector(values))
    }

    pub fn from_values(values: Vec<Ternary>) -> Result<Self, AnalysisError> {
        if values.len() != Self::LEN {
            return Err(AnalysisError::ExtractionFailed { got: values.len() });
        }
        Ok(FeatureVector(values))
    }

    pub fn values(&self) -> &[Ternary] {
        &self.0
    }

    pub fn as_i8(&self) -> Vec<i8> {
        self.0.iter().map(|t| t.as_i8()).collect()
    }

    pub fn get(&self, id: SignalId) -> Ternary {
        let idx = SCHEMA.iter().position(|spec| spec.id == id).unwrap();
        self.0[idx]
    }
}

/// A completed page fetch shared by every content-group signal of one
/// request. Fetched at most once per analysis.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: url::Url,
    pub body: String,
}

/// Computes all 30 signals for a validated URL. Network-dependent groups
/// run concurrently; each lookup carries its own timeout and resolves to
/// its schema fallback on failure.
pub struct ExtractionEngine {
    client: reqwest::Client,
    whois: domain::WhoisClient,
    resolver: domain::DnsResolver,
    external: external::ExternalServices,
    timeout: Duration,
    offline: bool,
}

impl ExtractionEngine {
    pub fn new(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.lookup_timeout_seconds);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        let resolver = domain::DnsResolver::new(config.offline_providers)?;

        Ok(ExtractionEngine {
            client,
            whois: domain::WhoisClient::new(timeout, config.offline_providers),
            external: external::ExternalServices::new(config, resolver.clone())?,
            resolver,
            timeout,
            offline: config.offline_providers,
        })
    }

    pub async fn extract(&self, url: &CheckedUrl) -> Result<FeatureVector, AnalysisError> {
        let mut outcomes: HashMap<SignalId, Ternary> = HashMap::new();

        // Syntactic signals are pure string work, computed inline.
        address_bar::compute(url, &mut outcomes);

        // One shared page fetch, one WHOIS/DNS pass, and the external
        // lookups all run concurrently. Total latency is bounded by the
        // slowest single lookup, not their sum.
        let page_fetch = async {
            if self.offline {
                // Offline mode never touches the network; content signals
                // resolve through the fallback table.
                None
            } else {
                content::fetch_page(&self.client, url, self.timeout).await
            }
        };
        let (page, domain_signals, external_signals) = tokio::join!(
            page_fetch,
            domain::compute(&self.whois, &self.resolver, url, self.timeout),
            self.external.compute(url),
        );

        for (id, value) in domain_signals {
            outcomes.insert(id, value);
        }
        for (id, value) in external_signals {
            outcomes.insert(id, value);
        }

        // Content signals reuse the single fetch result; when the fetch
        // failed each one takes its schema fallback.
        for (id, value) in content::compute(url, page.as_ref()) {
            outcomes.insert(id, value);
        }
        outcomes.insert(
            SignalId::LinksPointing,
            external::links_pointing(page.as_ref()),
        );

        FeatureVector::assemble(&outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_has_thirty_unique_signals() {
        let mut seen = std::collections::HashSet::new();
        for spec in SCHEMA.iter() {
            assert!(seen.insert(spec.id), "duplicate signal {:?}", spec.id);
        }
        assert_eq!(seen.len(), 30);
    }

    #[test]
    fn test_rank_signals_fall_back_neutral() {
        // An unanswered rank service proves nothing either way.
        assert_eq!(fallback_for(SignalId::WebTraffic), Ternary::Neutral);
        assert_eq!(fallback_for(SignalId::PageRank), Ternary::Neutral);
        assert_eq!(fallback_for(SignalId::SearchIndex), Ternary::Neutral);
        // An unreachable host is suspicious.
        assert_eq!(fallback_for(SignalId::DnsRecord), Ternary::Phishing);
        assert_eq!(fallback_for(SignalId::AbnormalUrl), Ternary::Phishing);
    }

    #[test]
    fn test_assemble_requires_every_slot() {
        let mut outcomes = HashMap::new();
        for spec in SCHEMA.iter().take(29) {
            outcomes.insert(spec.id, Ternary::Legit);
        }
        match FeatureVector::assemble(&outcomes) {
            Err(AnalysisError::ExtractionFailed { got }) => assert_eq!(got, 29),
            other => panic!("expected extraction failure, got {other:?}"),
        }

        outcomes.insert(SignalId::StatsReport, Ternary::Neutral);
        let vector = FeatureVector::assemble(&outcomes).unwrap();
        assert_eq!(vector.values().len(), FeatureVector::LEN);
    }

    #[test]
    fn test_vector_positions_follow_schema() {
        let mut outcomes = HashMap::new();
        for spec in SCHEMA.iter() {
            outcomes.insert(spec.id, spec.fallback);
        }
        let vector = FeatureVector::assemble(&outcomes).unwrap();
        assert_eq!(vector.get(SignalId::UsingIp), Ternary::Legit);
        assert_eq!(vector.get(SignalId::WebTraffic), Ternary::Neutral);
        // DomainRegLength sits at index 8 in the classifier schema.
        assert_eq!(vector.values()[8], Ternary::Phishing);
    }

    #[tokio::test]
    async fn test_offline_extraction_always_yields_thirty() {
        let config = Config {
            offline_providers: true,
            ..Config::default()
        };
        let engine = ExtractionEngine::new(&config).unwrap();

        for raw in ["http://example.com", "http://unknown-host.example.zz"] {
            let url = crate::url_input::check(raw).unwrap();
            let vector = engine.extract(&url).await.unwrap();
            assert_eq!(vector.values().len(), FeatureVector::LEN);
            for value in vector.values() {
                assert!(matches!(value.as_i8(), -1 | 0 | 1));
            }
        }
    }

    #[tokio::test]
    async fn test_stalled_network_still_yields_thirty_within_one_timeout() {
        // Every endpoint the engine can reach here accepts connections but
        // never answers: the page fetch, the redirect probe, and the rank
        // service all point at this listener.
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

        let config = Config {
            offline_providers: false,
            lookup_timeout_seconds: 1,
            rank_service_url: Some(format!("http://127.0.0.1:{port}")),
            ..Config::default()
        };
        let engine = ExtractionEngine::new(&config).unwrap();
        let url = crate::url_input::check(&format!("http://127.0.0.1:{port}/login")).unwrap();

        let started = std::time::Instant::now();
        let vector = engine.extract(&url).await.unwrap();

        // Dead lookups degrade to fallbacks, never shorten the vector, and
        // since the groups run concurrently under per-lookup timeouts the
        // response is bounded by one timeout, not the sum of them.
        assert_eq!(vector.values().len(), FeatureVector::LEN);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(vector.get(SignalId::WebTraffic), fallback_for(SignalId::WebTraffic));
        assert_eq!(
            vector.get(SignalId::AnchorRatio),
            fallback_for(SignalId::AnchorRatio)
        );
    }

    #[test]
    fn test_ternary_serde_round_trip() {
        let json = serde_json::to_string(&Ternary::Phishing).unwrap();
        assert_eq!(json, "-1");
        let back: Ternary = serde_json::from_str("-1").unwrap();
        assert_eq!(back, Ternary::Phishing);
        assert!(serde_json::from_str::<Ternary>("2").is_err());
    }
}
