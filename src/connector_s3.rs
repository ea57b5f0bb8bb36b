//! Amazon S3 document source.
//!
//! Lists and downloads objects under a bucket prefix using the S3 REST API
//! with AWS Signature V4 authentication, then extracts text from each
//! object by extension. Supports pagination, glob filtering on keys
//! relative to the prefix, and custom endpoints for S3-compatible services
//! (MinIO, LocalStack).
//!
//! # Configuration
//!
//! ```toml
//! [s3]
//! bucket = "research-papers"
//! prefix = "papers/"
//! region = "us-east-1"
//! include_globs = ["**/*.pdf", "**/*.md"]
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials / IAM roles)

use async_trait::async_trait;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::S3Config;
use crate::error::{with_deadline, RagError, Result, DEP_S3};
use crate::extract::{content_type_for, extract_text};
use crate::models::Document;
use crate::sources::DocumentSource;

type HmacSha256 = Hmac<Sha256>;

/// The persistent corpus, mirrored from an S3 bucket prefix.
pub struct S3Source {
    config: S3Config,
    client: reqwest::Client,
}

impl S3Source {
    pub fn new(config: S3Config) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(RagError::internal(
                "s3.bucket is not configured (set [s3].bucket or S3_BUCKET_NAME)",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::internal(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl DocumentSource for S3Source {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.config.bucket, self.config.prefix)
    }

    async fn load(&self) -> Result<Vec<Document>> {
        let creds = AwsCredentials::from_env()?;
        self.load_with(&creds).await
    }
}

impl S3Source {
    async fn load_with(&self, creds: &AwsCredentials) -> Result<Vec<Document>> {
        let objects = self.list_objects(creds).await?;
        let selected = select_keys(&self.config, objects)?;

        tracing::info!(
            bucket = %self.config.bucket,
            prefix = %self.config.prefix,
            objects = selected.len(),
            "downloading persistent corpus"
        );

        let mut documents = Vec::with_capacity(selected.len());
        for (key, content_type) in selected {
            let bytes = with_deadline(
                DEP_S3,
                self.config.timeout_secs,
                self.download_object(creds, &key),
            )
            .await?;

            let text = match tokio::task::spawn_blocking(move || {
                extract_text(&bytes, content_type)
            })
            .await
            {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    tracing::warn!(key = %key, error = %e, "skipping object");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "extractor crashed, skipping object");
                    continue;
                }
            };

            documents.push(Document {
                name: key,
                source: format!("s3:{}", self.config.bucket),
                content_type: content_type.to_string(),
                text,
            });
        }

        Ok(documents)
    }

    /// List all object keys under the prefix, following continuation tokens.
    async fn list_objects(&self, creds: &AwsCredentials) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !self.config.prefix.is_empty() {
                query.push(("prefix".to_string(), self.config.prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            // Each page gets its own deadline; a large bucket may take many.
            let xml = with_deadline(DEP_S3, self.config.timeout_secs, async move {
                self.signed_get(creds, "/", query)
                    .await?
                    .text()
                    .await
                    .map_err(|e| RagError::from_transport(DEP_S3, e))
            })
            .await?;
            let page = parse_list_objects_response(&xml);
            keys.extend(page.keys);

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn download_object(&self, creds: &AwsCredentials, key: &str) -> Result<Vec<u8>> {
        let path = format!(
            "/{}",
            key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
        );
        let resp = self.signed_get(creds, &path, Vec::new()).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RagError::from_transport(DEP_S3, e))?;
        Ok(bytes.to_vec())
    }

    /// Issue a SigV4-signed GET for `object_path` with the given query.
    async fn signed_get(
        &self,
        creds: &AwsCredentials,
        object_path: &str,
        mut query: Vec<(String, String)>,
    ) -> Result<reqwest::Response> {
        let (scheme, host, path_prefix) = s3_endpoint(&self.config);
        let canonical_uri = format!("{}{}", path_prefix, object_path);
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        query.sort();
        let canonical_query: String = query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(b"");
        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort();

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "GET\n{}\n{}\n{}\n{}\n{}",
            canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
        );
        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&creds.secret_access_key, &date_stamp, &self.config.region);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", scheme, host, canonical_uri);
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }

        let mut req = self
            .client
            .get(&url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(ref token) = creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RagError::from_transport(DEP_S3, e))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(match status {
                // Auth and missing-bucket errors mean the source is unusable.
                400..=499 => RagError::unavailable(
                    DEP_S3,
                    format!("GET {} failed (HTTP {}): {}", canonical_uri, status, body),
                ),
                _ => RagError::from_status(DEP_S3, status, &body),
            });
        }
        Ok(resp)
    }
}

// ============ Credentials ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| RagError::unavailable(DEP_S3, format!("{} not set", name)))
        };
        Ok(Self {
            access_key_id: var("AWS_ACCESS_KEY_ID")?,
            secret_access_key: var("AWS_SECRET_ACCESS_KEY")?,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

// ============ Listing ============

struct ListPage {
    keys: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

/// Keep keys that pass the glob filters and have an extractable type.
fn select_keys(config: &S3Config, keys: Vec<String>) -> Result<Vec<(String, &'static str)>> {
    let include = build_globset(&config.include_globs)?;
    let exclude = build_globset(&config.exclude_globs)?;
    let prefix = config.prefix.trim_end_matches('/');

    let mut selected: Vec<(String, &'static str)> = keys
        .into_iter()
        .filter(|key| {
            let rel = if prefix.is_empty() {
                key.as_str()
            } else {
                key.strip_prefix(prefix)
                    .map(|s| s.trim_start_matches('/'))
                    .unwrap_or(key.as_str())
            };
            include.is_match(rel) && !exclude.is_match(rel)
        })
        .filter_map(|key| {
            let ct = content_type_for(&key);
            if ct.is_none() {
                tracing::debug!(key = %key, "no extractor for object, skipping");
            }
            ct.map(|ct| (key, ct))
        })
        .collect();
    selected.sort();
    Ok(selected)
}

fn parse_list_objects_response(xml: &str) -> ListPage {
    let is_truncated = extract_xml_value(xml, "IsTruncated").as_deref() == Some("true");
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut keys = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(key) = extract_xml_value(block, "Key") {
            // Folder placeholder objects carry no content.
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(unescape_xml(&key));
            }
        }
        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    ListPage {
        keys,
        is_truncated,
        next_token,
    }
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ============ SigV4 helpers ============

/// Scheme, host and path prefix for the bucket: virtual-hosted AWS style,
/// or path-style against the configured custom endpoint.
fn s3_endpoint(config: &S3Config) -> (&'static str, String, String) {
    match config.endpoint_url {
        Some(ref endpoint) => {
            let scheme = if endpoint.starts_with("http://") {
                "http"
            } else {
                "https"
            };
            let host = endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string();
            (scheme, host, format!("/{}", uri_encode(&config.bucket)))
        }
        None => (
            "https",
            format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
            String::new(),
        ),
    }
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, "s3")
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything but `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| RagError::internal(format!("invalid s3 glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing_page() {
        let xml = r#"<ListBucketResult>
<IsTruncated>true</IsTruncated>
<NextContinuationToken>tok-2</NextContinuationToken>
<Contents><Key>papers/</Key><Size>0</Size></Contents>
<Contents><Key>papers/rag.pdf</Key><Size>10</Size></Contents>
<Contents><Key>papers/a&amp;b.md</Key><Size>3</Size></Contents>
</ListBucketResult>"#;
        let page = parse_list_objects_response(xml);
        assert_eq!(page.keys, vec!["papers/rag.pdf", "papers/a&b.md"]);
        assert!(page.is_truncated);
        assert_eq!(page.next_token.as_deref(), Some("tok-2"));
    }

    #[test]
    fn selects_by_glob_and_extension() {
        let config = S3Config {
            bucket: "b".to_string(),
            prefix: "papers/".to_string(),
            include_globs: vec!["**/*.pdf".to_string(), "**/*.md".to_string()],
            exclude_globs: vec!["drafts/**".to_string()],
            ..S3Config::default()
        };
        let keys = vec![
            "papers/z.pdf".to_string(),
            "papers/drafts/wip.pdf".to_string(),
            "papers/a.md".to_string(),
            "papers/photo.png".to_string(),
        ];
        let selected = select_keys(&config, keys).unwrap();
        assert_eq!(
            selected,
            vec![
                ("papers/a.md".to_string(), "text/markdown"),
                ("papers/z.pdf".to_string(), crate::extract::MIME_PDF),
            ]
        );
    }

    #[test]
    fn custom_endpoint_keeps_scheme() {
        let config = S3Config {
            bucket: "b".to_string(),
            endpoint_url: Some("http://localhost:9000/".to_string()),
            ..S3Config::default()
        };
        assert_eq!(
            s3_endpoint(&config),
            ("http", "localhost:9000".to_string(), "/b".to_string())
        );

        let aws = S3Config {
            bucket: "b".to_string(),
            region: "eu-west-1".to_string(),
            ..S3Config::default()
        };
        let (_, host, path_prefix) = s3_endpoint(&aws);
        assert_eq!(host, "b.s3.eu-west-1.amazonaws.com");
        assert!(path_prefix.is_empty());
    }

    #[test]
    fn uri_encoding() {
        assert_eq!(uri_encode("a b/c~d"), "a%20b%2Fc~d");
    }

    #[test]
    fn signing_key_depends_on_date_and_region() {
        let secret = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";
        let a = derive_signing_key(secret, "20120215", "us-east-1");
        assert_eq!(a.len(), 32);
        assert_eq!(a, derive_signing_key(secret, "20120215", "us-east-1"));
        assert_ne!(a, derive_signing_key(secret, "20120216", "us-east-1"));
        assert_ne!(a, derive_signing_key(secret, "20120215", "eu-west-1"));
    }

    #[test]
    fn missing_bucket_is_rejected() {
        assert!(S3Source::new(S3Config::default()).is_err());
    }

    /// A local S3 stand-in that serves three listing pages, each slower
    /// than a third of the deadline, and one small text object.
    async fn paged_bucket() -> String {
        use axum::extract::Query;
        use axum::routing::get;
        use std::collections::HashMap;

        async fn list(Query(params): Query<HashMap<String, String>>) -> String {
            tokio::time::sleep(Duration::from_millis(450)).await;
            let (key, next) = match params.get("continuation-token").map(String::as_str) {
                None => ("a.bin", Some("page-2")),
                Some("page-2") => ("b.bin", Some("page-3")),
                _ => ("notes.txt", None),
            };
            let tail = match next {
                Some(token) => format!(
                    "<IsTruncated>true</IsTruncated><NextContinuationToken>{}</NextContinuationToken>",
                    token
                ),
                None => "<IsTruncated>false</IsTruncated>".to_string(),
            };
            format!(
                "<ListBucketResult>{}<Contents><Key>{}</Key></Contents></ListBucketResult>",
                tail, key
            )
        }

        let app = axum::Router::new()
            .route("/test-bucket/", get(list))
            .route("/test-bucket/notes.txt", get(|| async { "paged listing works" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn deadline_applies_per_listing_page() {
        let source = S3Source::new(S3Config {
            bucket: "test-bucket".to_string(),
            endpoint_url: Some(paged_bucket().await),
            timeout_secs: 1,
            ..S3Config::default()
        })
        .unwrap();
        let creds = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        };

        // Three pages take longer than one deadline in total.
        let docs = source.load_with(&creds).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "notes.txt");
        assert_eq!(docs[0].text.trim(), "paged listing works");
    }
}
