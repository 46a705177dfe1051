/*!
*   webvh DID syntax and web location derivation
*
*   `did:webvh:<scid>:<domain>[:<path-segment>…]` maps onto
*   `https://<domain>[:port]/[<path>/]` — the log lives at `did.jsonl` under
*   that base, witness proofs at `did-witness.json`, the whois presentation
*   at `whois.vp`. A port is carried percent-encoded (`%3A`).
*/

use crate::WebVhError;
use chrono::{DateTime, FixedOffset};
use std::fmt::{Display, Formatter};
use url::Url;

/// Breakdown of a webvh DID into its components.
#[derive(Clone, Debug)]
pub struct DidUrl {
    /// Self Certifying IDentifier (SCID)
    pub scid: String,

    /// Host for this DID
    pub domain: String,

    /// Custom port if specified
    pub port: Option<u16>,

    /// Additional path segments below the web root
    pub path_segments: Vec<String>,

    /// URL fragment
    pub fragment: Option<String>,

    /// Raw query string
    pub query: Option<String>,

    /// `?versionId=` query helper
    pub query_version_id: Option<String>,

    /// `?versionTime=` query helper
    pub query_version_time: Option<DateTime<FixedOffset>>,
}

impl DidUrl {
    /// Parse a webvh DID (or DID URL) string.
    pub fn parse(did: &str) -> Result<DidUrl, WebVhError> {
        let rest = if let Some(rest) = did.strip_prefix("did:webvh:") {
            rest
        } else if did.starts_with("did:") {
            return Err(WebVhError::UnsupportedMethod);
        } else {
            return Err(WebVhError::InputShape(format!(
                "Malformed DID string ({did})"
            )));
        };

        let (rest, fragment) = match rest.split_once('#') {
            Some((prefix, fragment)) => (prefix, Some(fragment.to_string())),
            None => (rest, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((prefix, query)) => (prefix, Some(query.to_string())),
            None => (rest, None),
        };
        let (query_version_id, query_version_time) = parse_query(query.as_deref())?;

        let mut parts = rest.split(':');
        let Some(scid) = parts.next().filter(|s| !s.is_empty()) else {
            return Err(WebVhError::InputShape(format!(
                "DID ({did}) is missing its SCID segment"
            )));
        };
        let Some(host) = parts.next().filter(|s| !s.is_empty()) else {
            return Err(WebVhError::InputShape(format!(
                "DID ({did}) is missing its domain segment"
            )));
        };

        let (domain, port) = match host.split_once("%3A") {
            Some((domain, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    WebVhError::InputShape(format!(
                        "DID ({did}) port ({port}) must be a number: {e}"
                    ))
                })?;
                (domain.to_string(), Some(port))
            }
            None => (host.to_string(), None),
        };

        Ok(DidUrl {
            scid: scid.to_string(),
            domain,
            port,
            path_segments: parts.map(str::to_string).collect(),
            fragment,
            query,
            query_version_id,
            query_version_time,
        })
    }

    /// Base web location for this DID: `https://<domain>[:port]/[<path>/]`.
    /// Plain http is used for localhost.
    pub fn base_url(&self) -> Result<Url, WebVhError> {
        let mut url_string = String::new();
        if self.domain == "localhost" {
            url_string.push_str("http://");
        } else {
            url_string.push_str("https://");
        }
        url_string.push_str(&self.domain);
        if let Some(port) = self.port {
            url_string.push_str(&format!(":{port}"));
        }
        url_string.push('/');
        for segment in &self.path_segments {
            url_string.push_str(segment);
            url_string.push('/');
        }

        Url::parse(&url_string).map_err(|e| {
            WebVhError::InputShape(format!("Couldn't derive a URL from the DID: {e}"))
        })
    }

    /// Location of the DID log file (`did.jsonl`).
    pub fn log_url(&self) -> Result<Url, WebVhError> {
        self.join("did.jsonl")
    }

    /// Location of the witness proof file (`did-witness.json`).
    pub fn witness_url(&self) -> Result<Url, WebVhError> {
        self.join("did-witness.json")
    }

    /// Location of the linked verifiable presentation (`whois.vp`).
    pub fn whois_url(&self) -> Result<Url, WebVhError> {
        self.join("whois.vp")
    }

    fn join(&self, file_name: &str) -> Result<Url, WebVhError> {
        self.base_url()?.join(file_name).map_err(|e| {
            WebVhError::InputShape(format!("Couldn't derive a URL from the DID: {e}"))
        })
    }
}

fn parse_query(
    query: Option<&str>,
) -> Result<(Option<String>, Option<DateTime<FixedOffset>>), WebVhError> {
    let Some(query) = query else {
        return Ok((None, None));
    };

    let mut version_id = None;
    let mut version_time = None;
    for parameter in query.split('&') {
        let Some((key, value)) = parameter.split_once('=') else {
            return Err(WebVhError::InputShape(format!(
                "DID query parameter ({parameter}) must be in key=value form"
            )));
        };
        if key == "versionId" {
            version_id = Some(value.to_string());
        } else if key == "versionTime" {
            version_time = Some(DateTime::parse_from_rfc3339(value).map_err(|e| {
                WebVhError::InputShape(format!(
                    "DID query parameter (versionTime) must be RFC 3339 compliant: {e}"
                ))
            })?);
        }
    }
    Ok((version_id, version_time))
}

impl Display for DidUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "did:webvh:{}:{}", self.scid, self.domain)?;
        if let Some(port) = self.port {
            write!(f, "%3A{port}")?;
        }
        for segment in &self.path_segments {
            write!(f, ":{segment}")?;
        }
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{fragment}")?;
        }
        Ok(())
    }
}
