//! WHOIS and DNS backed signals: registration length, domain age, and DNS
//! record existence. WHOIS queries go straight to the registry over TCP
//! port 43; responses are cached for a day.

use super::{fallback_for, SignalId, Ternary};
use crate::url_input::CheckedUrl;
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use hickory_resolver::TokioAsyncResolver;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::timeout;

const MIN_AGE_DAYS: i64 = 180;
const MIN_REGISTRATION_DAYS: i64 = 365;
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

lazy_static! {
    static ref CREATED_PATTERNS: Vec<Regex> = [
        r"(?i)creation\s*date[:\s]+([^\r\n]+)",
        r"(?i)created\s*on[:\s]+([^\r\n]+)",
        r"(?i)registered\s*on[:\s]+([^\r\n]+)",
        r"(?i)domain\s*created[:\s]+([^\r\n]+)",
        r"(?i)registration\s*date[:\s]+([^\r\n]+)",
        r"(?i)created[:\s]+([^\r\n]+)",
        r"(?i)registered[:\s]+([^\r\n]+)",
        r"(?i)create_date[:\s]+([^\r\n]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
    static ref EXPIRES_PATTERNS: Vec<Regex> = [
        r"(?i)registry\s*expiry\s*date[:\s]+([^\r\n]+)",
        r"(?i)expiration\s*date[:\s]+([^\r\n]+)",
        r"(?i)expires\s*on[:\s]+([^\r\n]+)",
        r"(?i)expiry\s*date[:\s]+([^\r\n]+)",
        r"(?i)expires[:\s]+([^\r\n]+)",
        r"(?i)paid-till[:\s]+([^\r\n]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
    static ref ISO_DATE: Regex = Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap();
}

#[derive(Debug, Clone)]
pub struct WhoisRecord {
    pub domain: String,
    pub created: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    cached_at: DateTime<Utc>,
}

impl WhoisRecord {
    pub fn age_days(&self) -> Option<i64> {
        self.created.map(|c| (Utc::now() - c).num_days())
    }

    pub fn registration_days(&self) -> Option<i64> {
        match (self.created, self.expires) {
            (Some(c), Some(e)) => Some((e - c).num_days()),
            _ => None,
        }
    }
}

/// Registry WHOIS client with an in-process cache. The offline mode answers
/// from a fixed table so tests and demos never touch the network.
#[derive(Clone)]
pub struct WhoisClient {
    cache: Arc<RwLock<HashMap<String, WhoisRecord>>>,
    timeout: Duration,
    offline: bool,
}

impl WhoisClient {
    pub fn new(timeout: Duration, offline: bool) -> Self {
        WhoisClient {
            cache: Arc::new(RwLock::new(HashMap::new())),
            timeout,
            offline,
        }
    }

    pub async fn lookup(&self, domain: &str) -> Result<WhoisRecord> {
        let domain = domain.to_lowercase();

        {
            let cache = self.cache.read().await;
            if let Some(record) = cache.get(&domain) {
                let age = (Utc::now() - record.cached_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if age < CACHE_TTL {
                    log::debug!("Using cached WHOIS record for {domain}");
                    return Ok(record.clone());
                }
            }
        }

        let record = if self.offline {
            self.offline_record(&domain)?
        } else {
            self.fetch_record(&domain).await?
        };

        let mut cache = self.cache.write().await;
        cache.insert(domain, record.clone());
        Ok(record)
    }

    async fn fetch_record(&self, domain: &str) -> Result<WhoisRecord> {
        let server = whois_server_for(domain);
        log::debug!("Querying WHOIS server {server} for {domain}");

        match self.query_server(server, domain).await {
            Ok(text) => parse_whois(&text, domain),
            Err(e) => {
                log::debug!("WHOIS query against {server} failed: {e}");
                for fallback in ["whois.iana.org", "whois.internic.net"] {
                    if fallback == server {
                        continue;
                    }
                    if let Ok(text) = self.query_server(fallback, domain).await {
                        if let Ok(record) = parse_whois(&text, domain) {
                            return Ok(record);
                        }
                    }
                }
                Err(anyhow!("All WHOIS servers failed for {domain}"))
            }
        }
    }

    async fn query_server(&self, server: &str, domain: &str) -> Result<String> {
        let mut stream = timeout(self.timeout, TcpStream::connect(format!("{server}:43"))).await??;
        stream.write_all(format!("{domain}\r\n").as_bytes()).await?;

        let mut response = String::new();
        timeout(self.timeout, stream.read_to_string(&mut response)).await??;

        if response.is_empty() {
            return Err(anyhow!("Empty WHOIS response from {server}"));
        }
        Ok(response)
    }

    /// Fixed records for offline mode, keyed by registrable domain.
    /// Ages are relative to now so threshold tests stay stable.
    fn offline_record(&self, domain: &str) -> Result<WhoisRecord> {
        let table: HashMap<&str, (i64, i64)> = HashMap::from([
            // (age in days, registration length in days)
            ("example.com", (9000, 3650)),
            ("google.com", (9000, 3650)),
            ("github.com", (6000, 3650)),
            ("established.org", (3650, 1825)),
            ("newdomain.info", (45, 365)),
            ("suspicious.tk", (30, 180)),
        ]);

        let (age_days, reg_days) = table
            .get(domain)
            .copied()
            .ok_or_else(|| anyhow!("No offline WHOIS data for {domain}"))?;

        let created = Utc::now() - chrono::Duration::days(age_days);
        Ok(WhoisRecord {
            domain: domain.to_string(),
            created: Some(created),
            expires: Some(created + chrono::Duration::days(reg_days)),
            cached_at: Utc::now(),
        })
    }
}

fn whois_server_for(domain: &str) -> &'static str {
    let tld = domain.rsplit('.').next().unwrap_or(domain);
    match tld {
        "com" | "net" => "whois.verisign-grs.com",
        "org" => "whois.pir.org",
        "info" => "whois.afilias.net",
        "biz" => "whois.neulevel.biz",
        "us" => "whois.nic.us",
        "uk" => "whois.nic.uk",
        "de" => "whois.denic.de",
        "fr" => "whois.afnic.fr",
        "it" => "whois.nic.it",
        "nl" => "whois.domain-registry.nl",
        "au" => "whois.auda.org.au",
        "ca" => "whois.cira.ca",
        "jp" => "whois.jprs.jp",
        "cn" => "whois.cnnic.cn",
        "ru" => "whois.tcinet.ru",
        "br" => "whois.registro.br",
        "tk" => "whois.dot.tk",
        "ml" => "whois.dot.ml",
        "ga" => "whois.dot.ga",
        "cf" => "whois.dot.cf",
        _ => "whois.iana.org",
    }
}

fn parse_whois(text: &str, domain: &str) -> Result<WhoisRecord> {
    let created = find_date(text, &CREATED_PATTERNS);
    let expires = find_date(text, &EXPIRES_PATTERNS);

    if created.is_none() && expires.is_none() {
        return Err(anyhow!("No dates found in WHOIS response for {domain}"));
    }

    Ok(WhoisRecord {
        domain: domain.to_string(),
        created,
        expires,
        cached_at: Utc::now(),
    })
}

fn find_date(text: &str, patterns: &[Regex]) -> Option<DateTime<Utc>> {
    for pattern in patterns {
        if let Some(captures) = pattern.captures(text) {
            if let Some(value) = captures.get(1) {
                if let Some(date) = parse_date(value.as_str().trim()) {
                    return Some(date);
                }
            }
        }
    }
    None
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    // RFC3339 timestamps first ("2003-08-18T04:00:00Z"), then a bare
    // YYYY-MM-DD anywhere in the field.
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let captures = ISO_DATE.captures(value)?;
    let date = NaiveDate::from_ymd_opt(
        captures[1].parse().ok()?,
        captures[2].parse().ok()?,
        captures[3].parse().ok()?,
    )?;
    Utc.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
}

/// DNS front end shared by the domain and external-service groups.
#[derive(Clone)]
pub enum DnsResolver {
    System(Arc<TokioAsyncResolver>),
    /// Answers from a fixed host table; unknown hosts do not resolve.
    Offline,
}

impl DnsResolver {
    pub fn new(offline: bool) -> Result<Self> {
        if offline {
            Ok(DnsResolver::Offline)
        } else {
            let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
            Ok(DnsResolver::System(Arc::new(resolver)))
        }
    }

    pub async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        match self {
            DnsResolver::System(resolver) => {
                let lookup = resolver.lookup_ip(host).await?;
                Ok(lookup.iter().collect())
            }
            DnsResolver::Offline => {
                let known = [
                    "example.com",
                    "www.example.com",
                    "google.com",
                    "www.google.com",
                    "github.com",
                    "established.org",
                    "newdomain.info",
                ];
                if known.contains(&host) {
                    Ok(vec![IpAddr::from([93, 184, 216, 34])])
                } else {
                    Err(anyhow!("Host does not resolve: {host}"))
                }
            }
        }
    }
}

/// Compute the three domain-group signals. WHOIS and DNS run concurrently;
/// each failure resolves to the signal's schema fallback.
pub async fn compute(
    whois: &WhoisClient,
    resolver: &DnsResolver,
    url: &CheckedUrl,
    lookup_timeout: Duration,
) -> Vec<(SignalId, Ternary)> {
    let root = url.root_domain();

    let (whois_result, dns_result) = tokio::join!(
        timeout(lookup_timeout, whois.lookup(&root)),
        timeout(lookup_timeout, resolver.resolve(url.host())),
    );

    let mut signals = Vec::with_capacity(3);

    match whois_result {
        Ok(Ok(record)) => {
            signals.push((SignalId::DomainAge, age_signal(&record)));
            signals.push((SignalId::DomainRegLength, registration_signal(&record)));
        }
        _ => {
            log::debug!("WHOIS lookup failed for {root}, using fallbacks");
            signals.push((SignalId::DomainAge, fallback_for(SignalId::DomainAge)));
            signals.push((
                SignalId::DomainRegLength,
                fallback_for(SignalId::DomainRegLength),
            ));
        }
    }

    let dns_signal = match dns_result {
        Ok(Ok(addrs)) if !addrs.is_empty() => Ternary::Legit,
        _ => fallback_for(SignalId::DnsRecord),
    };
    signals.push((SignalId::DnsRecord, dns_signal));

    signals
}

fn age_signal(record: &WhoisRecord) -> Ternary {
    match record.age_days() {
        Some(days) if days >= MIN_AGE_DAYS => Ternary::Legit,
        Some(_) => Ternary::Phishing,
        None => fallback_for(SignalId::DomainAge),
    }
}

fn registration_signal(record: &WhoisRecord) -> Ternary {
    match record.registration_days() {
        Some(days) if days >= MIN_REGISTRATION_DAYS => Ternary::Legit,
        Some(_) => Ternary::Phishing,
        None => fallback_for(SignalId::DomainRegLength),
    }
}
