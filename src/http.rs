//! HTTP session layer shared by vendor adapters and the PDF downloader.
//!
//! Retry policy: 3 attempts with exponential backoff (1s, 2s, 4s) on 5xx
//! and transport errors only. 429 is never retried - the conductor's rate
//! limiter should have prevented it, so a 429 is a tuning bug to record and
//! move past, not a condition to wait out.
//!
//! TLS verification is disabled for Granicus hosts only: their attachment
//! redirects land on an S3 bucket whose certificate doesn't match. The
//! exception does not extend to any other vendor.

use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

use crate::error::HttpError;

/// Browser-identifying UA for vendor traffic. Municipal sites frequently
/// block obvious bots.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// Distinct identity for the PDF download path.
const PDF_USER_AGENT: &str = "Munisync-PDF-Validator/1.0";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_RETRIES: u32 = 3;

/// Hard cap for PDFs submitted to the text-extraction path.
pub const MAX_PDF_BYTES: usize = 32 * 1024 * 1024;

/// Maximum accepted URL length for arbitrary-URL downloads.
const MAX_URL_LENGTH: usize = 2000;

fn is_granicus_host(url: &str) -> bool {
    url.contains("granicus.com") || url.contains("granicus_production_attachments.s3.amazonaws.com")
}

/// HTTP session owned by one adapter (or the processor's download path).
/// Construction implies open; dropping the value closes the pool.
pub struct HttpSession {
    client: reqwest::Client,
    /// Separate client with certificate verification disabled, used only for
    /// Granicus hosts.
    granicus_client: reqwest::Client,
    pdf_client: reqwest::Client,
}

impl HttpSession {
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| HttpError::Request {
                url: String::new(),
                source: e,
            })?;

        let granicus_client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| HttpError::Request {
                url: String::new(),
                source: e,
            })?;

        let pdf_client = reqwest::Client::builder()
            .user_agent(PDF_USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| HttpError::Request {
                url: String::new(),
                source: e,
            })?;

        Ok(HttpSession {
            client,
            granicus_client,
            pdf_client,
        })
    }

    fn client_for(&self, url: &str) -> &reqwest::Client {
        if is_granicus_host(url) {
            &self.granicus_client
        } else {
            &self.client
        }
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, HttpError> {
        let mut last_err = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1));
                log::debug!("retrying {} in {:?} (attempt {})", url, backoff, attempt + 1);
                tokio::time::sleep(backoff).await;
            }

            let result = build().send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.as_u16() == 429 {
                        log::error!("rate limited by {} - check rate limiter delays", url);
                        return Err(HttpError::RateLimited {
                            url: url.to_string(),
                        });
                    }
                    if status.is_server_error() {
                        log::warn!("HTTP {} from {}, will retry", status.as_u16(), url);
                        last_err = Some(HttpError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                        continue;
                    }
                    // 4xx: not retryable
                    return Err(HttpError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(e) if e.is_timeout() => {
                    log::warn!("timeout fetching {}, will retry", url);
                    last_err = Some(HttpError::Timeout {
                        url: url.to_string(),
                    });
                }
                Err(e) => {
                    log::warn!("transport error fetching {}: {}", url, e);
                    last_err = Some(HttpError::Request {
                        url: url.to_string(),
                        source: e,
                    });
                }
            }
        }

        Err(last_err.unwrap_or(HttpError::Timeout {
            url: url.to_string(),
        }))
    }

    /// GET returning the raw response.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, HttpError> {
        let client = self.client_for(url);
        self.send_with_retry(|| client.get(url), url).await
    }

    /// GET with query parameters.
    pub async fn get_with_query(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, HttpError> {
        let client = self.client_for(url);
        self.send_with_retry(|| client.get(url).query(query), url)
            .await
    }

    /// GET with an explicit Accept header (Legistar prefers JSON only when
    /// asked; its default content negotiation hands back XML).
    pub async fn get_accept(
        &self,
        url: &str,
        query: &[(&str, &str)],
        accept: &str,
    ) -> Result<reqwest::Response, HttpError> {
        let client = self.client_for(url);
        self.send_with_retry(
            || client.get(url).query(query).header("Accept", accept),
            url,
        )
        .await
    }

    /// GET returning the body text.
    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let response = self.get(url).await?;
        response.text().await.map_err(|e| HttpError::Request {
            url: url.to_string(),
            source: e,
        })
    }

    /// HEAD with the shorter timeout, following redirects.
    pub async fn head(&self, url: &str) -> Result<reqwest::Response, HttpError> {
        let client = self.client_for(url);
        self.send_with_retry(|| client.head(url).timeout(HEAD_TIMEOUT), url)
            .await
    }

    /// Download a PDF with the validator identity, enforcing the SSRF guard
    /// and the size cap.
    pub async fn download_pdf(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        validate_download_url(url)?;

        let client = if is_granicus_host(url) {
            &self.granicus_client
        } else {
            &self.pdf_client
        };
        let response = self.send_with_retry(|| client.get(url), url).await?;

        if let Some(length) = response.content_length() {
            if length as usize > MAX_PDF_BYTES {
                return Err(HttpError::TooLarge {
                    url: url.to_string(),
                    limit: MAX_PDF_BYTES,
                });
            }
        }

        let bytes = response.bytes().await.map_err(|e| HttpError::Request {
            url: url.to_string(),
            source: e,
        })?;

        if bytes.len() > MAX_PDF_BYTES {
            return Err(HttpError::TooLarge {
                url: url.to_string(),
                limit: MAX_PDF_BYTES,
            });
        }

        Ok(bytes.to_vec())
    }
}

/// Validate a URL before downloading arbitrary remote content.
///
/// Scheme must be http/https, the hostname must resolve, and the resolved
/// address must not fall in loopback, private, or link-local space (v4 or
/// v6). DNS is resolved here rather than at connect time to reject rebinding
/// tricks up front.
pub fn validate_download_url(url: &str) -> Result<(), HttpError> {
    if url.len() > MAX_URL_LENGTH {
        return Err(HttpError::UnsafeUrl(format!(
            "URL exceeds maximum length of {} characters",
            MAX_URL_LENGTH
        )));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| HttpError::UnsafeUrl(format!("invalid URL format: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(HttpError::UnsafeUrl(format!(
                "URL scheme must be http or https, got {}",
                other
            )))
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| HttpError::UnsafeUrl("URL must include a hostname".to_string()))?;

    let addrs = (host, parsed.port_or_known_default().unwrap_or(443))
        .to_socket_addrs()
        .map_err(|_| HttpError::UnsafeUrl(format!("unable to resolve hostname: {}", host)))?;

    for addr in addrs {
        if is_blocked_ip(&addr.ip()) {
            return Err(HttpError::UnsafeUrl(format!(
                "URL resolves to a blocked network: {}",
                addr.ip()
            )));
        }
    }

    Ok(())
}

fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                return true;
            }
            let segments = v6.segments();
            // fc00::/7 unique-local, fe80::/10 link-local
            (segments[0] & 0xfe00) == 0xfc00 || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_blocked_ip_ranges() {
        assert!(is_blocked_ip(&IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(is_blocked_ip(&IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        assert!(is_blocked_ip(&IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
        assert!(is_blocked_ip(&IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1))));
        assert!(is_blocked_ip(&IpAddr::V4(Ipv4Addr::new(169, 254, 0, 1))));
        assert!(!is_blocked_ip(&IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))));

        assert!(is_blocked_ip(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_blocked_ip(&IpAddr::V6(
            "fe80::1".parse::<Ipv6Addr>().unwrap()
        )));
        assert!(is_blocked_ip(&IpAddr::V6(
            "fd00::1".parse::<Ipv6Addr>().unwrap()
        )));
        assert!(!is_blocked_ip(&IpAddr::V6(
            "2606:2800:220:1::1".parse::<Ipv6Addr>().unwrap()
        )));
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let err = validate_download_url("file:///etc/passwd").unwrap_err();
        assert!(matches!(err, HttpError::UnsafeUrl(_)));

        let err = validate_download_url("ftp://example.com/file.pdf").unwrap_err();
        assert!(matches!(err, HttpError::UnsafeUrl(_)));
    }

    #[test]
    fn test_validate_rejects_overlong_url() {
        let url = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        let err = validate_download_url(&url).unwrap_err();
        assert!(matches!(err, HttpError::UnsafeUrl(_)));
    }

    #[test]
    fn test_validate_rejects_loopback_literal() {
        let err = validate_download_url("http://127.0.0.1/secret.pdf").unwrap_err();
        assert!(matches!(err, HttpError::UnsafeUrl(_)));
    }

    #[test]
    fn test_granicus_host_detection() {
        assert!(is_granicus_host(
            "https://cambridge.granicus.com/ViewPublisher.php?view_id=4"
        ));
        assert!(is_granicus_host(
            "https://granicus_production_attachments.s3.amazonaws.com/doc.pdf"
        ));
        assert!(!is_granicus_host("https://seattle.legistar.com/Calendar.aspx"));
    }
}
