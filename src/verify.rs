//! Post deploy checks against a live site.

use std::io::Read;
use std::time::Duration;

use crate::error::{Error, Result};

pub const TRACING_TARGET_VERIFY: &str = "sitestack::verify";

/// a path no deployed site should contain, so the distribution has to
/// answer it with its error response.
pub const UNMAPPED_PATH: &str = "/sitestack-verify/route-that-does-not-exist";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

/// issues a single GET without following redirects.
pub trait SiteProbe {
    fn get(&self, url: &str) -> Result<ProbeResponse>;
}

pub struct HttpProbe {
    agent: ureq::Agent,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .redirects(0)
            .timeout(timeout)
            .build();
        Self { agent }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

fn into_probe_response(resp: ureq::Response, url: &str) -> Result<ProbeResponse> {
    let status = resp.status();
    let location = resp.header("location").map(|s| s.to_string());
    let mut body = vec![];
    resp.into_reader()
        .read_to_end(&mut body)
        .map_err(|e| Error::Http { url: url.to_string(), reason: e.to_string() })?;
    Ok(ProbeResponse { status, location, body })
}

impl SiteProbe for HttpProbe {
    fn get(&self, url: &str) -> Result<ProbeResponse> {
        match self.agent.get(url).call() {
            Ok(resp) => into_probe_response(resp, url),
            // error statuses are still answers worth checking
            Err(ureq::Error::Status(_, resp)) => into_probe_response(resp, url),
            Err(e) => Err(Error::Http { url: url.to_string(), reason: e.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub url: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub checks: Vec<CheckResult>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|c| c.passed)
    }
}

fn site_origin(url: &str) -> Result<String> {
    let url = url.trim().trim_end_matches('/');
    let host = url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    if host.is_empty() || host.contains('/') {
        return Err(Error::config("url", format!("'{url}' is not a site url, expected eg: https://d1234.cloudfront.net")));
    }
    Ok(host.to_string())
}

fn check_page(name: &'static str, probe: &dyn SiteProbe, url: String, index: Option<&[u8]>) -> Result<CheckResult> {
    let resp = probe.get(&url)?;
    let (passed, detail) = if resp.status != 200 {
        (false, format!("expected status 200, got {}", resp.status))
    } else {
        match index {
            Some(expected) if resp.body != expected => {
                (false, "status 200, but the body is not the local index page".to_string())
            }
            _ => (true, "status 200".to_string()),
        }
    };
    Ok(CheckResult { name, url, passed, detail })
}

/// checks that plain http is redirected to https, that the root serves the
/// app, and that an unknown route falls back to the app. If `index` is
/// given, pages served with 200 must match it byte for byte.
pub fn verify_site(probe: &dyn SiteProbe, url: &str, index: Option<&[u8]>) -> Result<VerifyReport> {
    let host = site_origin(url)?;
    let mut report = VerifyReport::default();

    let http_url = format!("http://{host}/");
    let resp = probe.get(&http_url)?;
    let redirected = matches!(resp.status, 301 | 302 | 307 | 308);
    let (passed, detail) = match (&resp.location, redirected) {
        (Some(location), true) if location.starts_with("https://") => {
            (true, format!("{} redirect to {location}", resp.status))
        }
        (location, _) => (false, format!("expected a redirect to https, got {} (location: {:?})", resp.status, location)),
    };
    report.checks.push(CheckResult { name: "https-redirect", url: http_url, passed, detail });

    report.checks.push(check_page("root", probe, format!("https://{host}/"), index)?);
    report.checks.push(check_page("spa-fallback", probe, format!("https://{host}{UNMAPPED_PATH}"), index)?);

    for check in report.checks.iter() {
        if check.passed {
            tracing::info!(target: TRACING_TARGET_VERIFY, check = check.name, url = %check.url, "{}", check.detail);
        } else {
            tracing::warn!(target: TRACING_TARGET_VERIFY, check = check.name, url = %check.url, "{}", check.detail);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    const INDEX: &[u8] = b"<html>app</html>";

    /// answers like a distribution with the default config.
    struct FakeDistribution {
        pages: HashMap<String, Vec<u8>>,
        spa_fallback: bool,
        redirect_http: bool,
    }

    impl FakeDistribution {
        fn healthy() -> Self {
            let mut pages = HashMap::new();
            pages.insert("/".to_string(), INDEX.to_vec());
            pages.insert("/index.html".to_string(), INDEX.to_vec());
            Self { pages, spa_fallback: true, redirect_http: true }
        }
    }

    impl SiteProbe for FakeDistribution {
        fn get(&self, url: &str) -> Result<ProbeResponse> {
            if let Some(rest) = url.strip_prefix("http://") {
                if self.redirect_http {
                    return Ok(ProbeResponse { status: 301, location: Some(format!("https://{rest}")), body: vec![] });
                }
                return Ok(ProbeResponse { status: 200, location: None, body: INDEX.to_vec() });
            }
            let path = url.trim_start_matches("https://d111.cloudfront.net");
            match self.pages.get(path) {
                Some(body) => Ok(ProbeResponse { status: 200, location: None, body: body.clone() }),
                None if self.spa_fallback => Ok(ProbeResponse { status: 200, location: None, body: INDEX.to_vec() }),
                None => Ok(ProbeResponse { status: 403, location: None, body: b"AccessDenied".to_vec() }),
            }
        }
    }

    #[test]
    fn healthy_site_passes() {
        let report = verify_site(&FakeDistribution::healthy(), "https://d111.cloudfront.net/", Some(INDEX)).unwrap();
        assert_eq!(report.checks.len(), 3);
        assert!(report.passed(), "{:#?}", report.checks);
        assert_eq!(report.checks[0].url, "http://d111.cloudfront.net/");
        assert_eq!(report.checks[2].url, format!("https://d111.cloudfront.net{UNMAPPED_PATH}"));
    }

    #[test]
    fn missing_fallback_fails() {
        let mut site = FakeDistribution::healthy();
        site.spa_fallback = false;
        let report = verify_site(&site, "d111.cloudfront.net", None).unwrap();
        assert!(!report.passed());
        let fallback = report.checks.iter().find(|c| c.name == "spa-fallback").unwrap();
        assert!(!fallback.passed);
        assert!(fallback.detail.contains("403"));
    }

    #[test]
    fn plain_http_fails() {
        let mut site = FakeDistribution::healthy();
        site.redirect_http = false;
        let report = verify_site(&site, "https://d111.cloudfront.net", None).unwrap();
        assert!(!report.checks[0].passed);
        assert!(report.checks[1].passed);
    }

    #[test]
    fn stale_content_fails() {
        let report = verify_site(&FakeDistribution::healthy(), "https://d111.cloudfront.net", Some(b"<html>new</html>")).unwrap();
        assert!(!report.checks[1].passed);
        assert!(!report.passed());
    }

    #[test]
    fn rejects_urls_with_paths() {
        let err = verify_site(&FakeDistribution::healthy(), "https://d111.cloudfront.net/app", None).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
