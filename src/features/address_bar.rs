//! Syntactic signals computed from the URL string alone. No network, no
//! failure modes; every one of these always yields a value.

use super::{SignalId, Ternary};
use crate::url_input::CheckedUrl;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;

lazy_static! {
    // Dotted-hex IP literals ("0x58.0xCC.0xCA.0x62") that IpAddr::parse
    // does not cover.
    static ref HEX_IP: Regex = Regex::new(r"^(0x[0-9a-fA-F]{1,2}\.){3}0x[0-9a-fA-F]{1,2}$").unwrap();
}

/// Hosts of widely used link-shortening services.
const SHORTENER_HOSTS: &[&str] = &[
    "bit.ly",
    "tinyurl.com",
    "t.co",
    "goo.gl",
    "ow.ly",
    "short.link",
    "is.gd",
    "v.gd",
    "tiny.cc",
    "rb.gy",
    "cutt.ly",
    "shorturl.at",
    "tr.im",
    "cli.gs",
    "u.to",
    "x.co",
    "qr.net",
    "adf.ly",
    "bitly.com",
];

pub fn compute(url: &CheckedUrl, outcomes: &mut HashMap<SignalId, Ternary>) {
    outcomes.insert(SignalId::UsingIp, using_ip(url.host()));
    outcomes.insert(SignalId::LongUrl, long_url(url.as_str()));
    outcomes.insert(SignalId::ShortUrl, short_url(url.host()));
    outcomes.insert(SignalId::AtSymbol, at_symbol(url.as_str()));
    outcomes.insert(
        SignalId::DoubleSlashRedirect,
        double_slash_redirect(url.as_str()),
    );
    outcomes.insert(SignalId::PrefixSuffix, prefix_suffix(url.host()));
    outcomes.insert(SignalId::SubDomains, sub_domains(url.host()));
    outcomes.insert(SignalId::HttpsScheme, https_scheme(url.scheme()));
    outcomes.insert(SignalId::NonStdPort, non_std_port(url.port()));
    outcomes.insert(SignalId::HttpsInHost, https_in_host(url.host()));
}

fn using_ip(host: &str) -> Ternary {
    if host.parse::<IpAddr>().is_ok() || HEX_IP.is_match(host) {
        Ternary::Phishing
    } else {
        Ternary::Legit
    }
}

fn long_url(url: &str) -> Ternary {
    match url.len() {
        0..=53 => Ternary::Legit,
        54..=75 => Ternary::Neutral,
        _ => Ternary::Phishing,
    }
}

fn short_url(host: &str) -> Ternary {
    let host = host.strip_prefix("www.").unwrap_or(host);
    if SHORTENER_HOSTS.contains(&host) {
        Ternary::Phishing
    } else {
        Ternary::Legit
    }
}

fn at_symbol(url: &str) -> Ternary {
    if url.contains('@') {
        Ternary::Phishing
    } else {
        Ternary::Legit
    }
}

/// A "//" after the scheme separator suggests an embedded redirect target.
fn double_slash_redirect(url: &str) -> Ternary {
    let after_scheme = match url.find("://") {
        Some(pos) => pos + 3,
        None => 0,
    };
    match url[after_scheme..].find("//") {
        Some(_) => Ternary::Phishing,
        None => Ternary::Legit,
    }
}

fn prefix_suffix(host: &str) -> Ternary {
    if host.contains('-') {
        Ternary::Phishing
    } else {
        Ternary::Legit
    }
}

fn sub_domains(host: &str) -> Ternary {
    let host = host.strip_prefix("www.").unwrap_or(host);
    match host.matches('.').count() {
        0 | 1 => Ternary::Legit,
        2 => Ternary::Neutral,
        _ => Ternary::Phishing,
    }
}

fn https_scheme(scheme: &str) -> Ternary {
    if scheme == "https" {
        Ternary::Legit
    } else {
        Ternary::Phishing
    }
}

fn non_std_port(port: Option<u16>) -> Ternary {
    match port {
        Some(80) | Some(443) | None => Ternary::Legit,
        Some(_) => Ternary::Phishing,
    }
}

/// Phishing pages like to bake "https" into the host itself
/// ("https-login.example.xyz") to fake a secure padlock.
fn https_in_host(host: &str) -> Ternary {
    if host.contains("https") {
        Ternary::Phishing
    } else {
        Ternary::Legit
    }
}
