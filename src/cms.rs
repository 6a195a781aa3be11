//! Remote document store.
//!
//! [`DocumentStore`] is the capability set the sync engine and the
//! reconciliation tool need from the CMS. [`WordPressClient`] implements it
//! against the WordPress REST API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | lookup by slug | `GET /wp-json/wp/v2/<type>?slug=<slug>` |
//! | lookup by ID | `GET /wp-json/wp/v2/<type>/<id>` |
//! | create | `POST /wp-json/wp/v2/<type>` |
//! | update | `PUT /wp-json/wp/v2/<type>/<id>` |
//! | delete | `DELETE /wp-json/wp/v2/<type>/<id>?force=true` |
//! | list | `GET /wp-json/wp/v2/<type>?per_page=100&page=<n>` |
//! | tag | `GET`/`POST /wp-json/wp/v2/<tag taxonomy>` |
//! | SEO | `POST /wp-json/rankmath/v1/updateMeta` |
//! | topics | `GET /wp-json/sie/v1/topics` |
//!
//! Authentication is HTTP Basic with an application password read from
//! `WP_APP_PASSWORD`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{credential, CmsConfig};
use crate::models::{RecordPayload, RemoteRecord};
use crate::taxonomy::mapping_from_json;

const PAGE_SIZE: usize = 100;
const ERROR_BODY_LIMIT: usize = 500;

static TAG_SLUG_INVALID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]").unwrap());

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<RemoteRecord>>;

    async fn get(&self, id: u64) -> Result<Option<RemoteRecord>>;

    async fn create(&self, payload: &RecordPayload) -> Result<RemoteRecord>;

    async fn update(&self, id: u64, payload: &RecordPayload) -> Result<RemoteRecord>;

    /// Tag ID for `name`, creating the term if needed. `Ok(None)` means the
    /// store refused to create it and the tag should be left off.
    async fn resolve_tag(&self, name: &str) -> Result<Option<u64>>;

    /// Set SEO keyword/description. Returns whether the store accepted it.
    async fn update_seo(
        &self,
        id: u64,
        keyword: Option<&str>,
        description: Option<&str>,
    ) -> Result<bool>;

    /// Every record of the content type.
    async fn list_all(&self) -> Result<Vec<RemoteRecord>>;

    async fn delete(&self, id: u64) -> Result<()>;

    /// Path pattern → topic ID table published by the store, if any.
    async fn topic_mapping(&self) -> Result<BTreeMap<String, u64>> {
        Ok(BTreeMap::new())
    }

    /// Public URL for a slug when the store does not report one.
    fn fallback_url(&self, slug: &str) -> String;
}

/// Slug used for a tag term: lowercase, anything outside `[a-z0-9-]` → `-`.
pub fn tag_slug(name: &str) -> String {
    TAG_SLUG_INVALID
        .replace_all(&name.to_lowercase(), "-")
        .into_owned()
}

/// Decode the HTML entities WordPress emits in rendered titles.
pub fn decode_entities(text: &str) -> String {
    static ENTITY: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());
    ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or(name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{a0}'),
                    "ndash" => Some('\u{2013}'),
                    "mdash" => Some('\u{2014}'),
                    "hellip" => Some('\u{2026}'),
                    "lsquo" => Some('\u{2018}'),
                    "rsquo" => Some('\u{2019}'),
                    "ldquo" => Some('\u{201c}'),
                    "rdquo" => Some('\u{201d}'),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Parse a REST record. Titles may be plain strings or `{rendered}` objects.
pub fn record_from_json(value: &Value) -> Result<RemoteRecord> {
    let id = value
        .get("id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| anyhow::anyhow!("Invalid record: missing id"))?;
    let slug = value
        .get("slug")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let title = match value.get("title") {
        Some(Value::String(s)) => s.clone(),
        Some(obj) => obj
            .get("rendered")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string(),
        None => String::new(),
    };
    let str_field = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    Ok(RemoteRecord {
        id,
        slug,
        title: decode_entities(&title),
        link: str_field("link"),
        status: str_field("status"),
        date: str_field("date"),
        modified: str_field("modified"),
    })
}

// ============ WordPress ============

pub struct WordPressClient {
    client: reqwest::Client,
    site_url: String,
    auth_header: String,
    config: CmsConfig,
    link_prefix: String,
}

impl WordPressClient {
    /// Build a client, reading the application password from the environment.
    pub fn new(config: &CmsConfig, link_prefix: &str) -> Result<Self> {
        let password = credential("WP_APP_PASSWORD")?;
        Self::with_password(config, link_prefix, &password)
    }

    pub fn with_password(config: &CmsConfig, link_prefix: &str, password: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let token = STANDARD.encode(format!("{}:{}", config.username, password));

        Ok(Self {
            client,
            site_url: config.site_url.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {}", token),
            config: config.clone(),
            link_prefix: link_prefix.to_string(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/wp-json/wp/v2/{}", self.site_url, self.config.post_type)
    }

    fn record_url(&self, id: u64) -> String {
        format!("{}/{}", self.collection_url(), id)
    }

    fn tag_url(&self) -> String {
        format!("{}/wp-json/wp/v2/{}", self.site_url, self.config.tag_taxonomy)
    }

    fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.config.lookup_timeout_secs)
    }

    fn payload_json(&self, payload: &RecordPayload) -> Value {
        payload.to_json(&self.config.topic_taxonomy, &self.config.tag_taxonomy)
    }

    async fn error_for(&self, action: &str, response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > ERROR_BODY_LIMIT {
            let mut cut = ERROR_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        anyhow::anyhow!("{} failed: {} {}", action, status, body)
    }
}

#[async_trait]
impl DocumentStore for WordPressClient {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<RemoteRecord>> {
        tracing::debug!(slug, "looking up record by slug");
        let response = self
            .client
            .get(self.collection_url())
            .header("Authorization", &self.auth_header)
            .query(&[("slug", slug)])
            .timeout(self.lookup_timeout())
            .send()
            .await
            .with_context(|| format!("Slug lookup for '{}'", slug))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.error_for("Slug lookup", response).await);
        }
        let json: Value = response.json().await?;
        match json.as_array().and_then(|a| a.first()) {
            Some(first) => Ok(Some(record_from_json(first)?)),
            None => Ok(None),
        }
    }

    async fn get(&self, id: u64) -> Result<Option<RemoteRecord>> {
        let response = self
            .client
            .get(self.record_url(id))
            .header("Authorization", &self.auth_header)
            .timeout(self.lookup_timeout())
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.error_for("Record lookup", response).await);
        }
        let json: Value = response.json().await?;
        Ok(Some(record_from_json(&json)?))
    }

    async fn create(&self, payload: &RecordPayload) -> Result<RemoteRecord> {
        tracing::debug!(title = %payload.title, "creating record");
        let response = self
            .client
            .post(self.collection_url())
            .header("Authorization", &self.auth_header)
            .json(&self.payload_json(payload))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.error_for("Create", response).await);
        }
        let json: Value = response.json().await?;
        record_from_json(&json)
    }

    async fn update(&self, id: u64, payload: &RecordPayload) -> Result<RemoteRecord> {
        tracing::debug!(id, title = %payload.title, "updating record");
        let response = self
            .client
            .put(self.record_url(id))
            .header("Authorization", &self.auth_header)
            .json(&self.payload_json(payload))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.error_for("Update", response).await);
        }
        let json: Value = response.json().await?;
        record_from_json(&json)
    }

    async fn resolve_tag(&self, name: &str) -> Result<Option<u64>> {
        let slug = tag_slug(name);

        let response = self
            .client
            .get(self.tag_url())
            .header("Authorization", &self.auth_header)
            .query(&[("slug", slug.as_str())])
            .send()
            .await?;
        if response.status().is_success() {
            let json: Value = response.json().await?;
            if let Some(id) = json
                .as_array()
                .and_then(|a| a.first())
                .and_then(|t| t.get("id"))
                .and_then(|v| v.as_u64())
            {
                return Ok(Some(id));
            }
        }

        let response = self
            .client
            .post(self.tag_url())
            .header("Authorization", &self.auth_header)
            .json(&json!({ "name": name, "slug": slug }))
            .send()
            .await?;
        if !response.status().is_success() {
            tracing::warn!(tag = name, status = %response.status(), "tag creation refused");
            return Ok(None);
        }
        let json: Value = response.json().await?;
        Ok(json.get("id").and_then(|v| v.as_u64()))
    }

    async fn update_seo(
        &self,
        id: u64,
        keyword: Option<&str>,
        description: Option<&str>,
    ) -> Result<bool> {
        let mut meta = serde_json::Map::new();
        if let Some(k) = keyword {
            meta.insert("rank_math_focus_keyword".into(), json!(k));
        }
        if let Some(d) = description {
            meta.insert("rank_math_description".into(), json!(d));
        }
        if meta.is_empty() {
            return Ok(true);
        }

        let body = json!({
            "objectType": "post",
            "objectID": id,
            "meta": meta,
        });
        let response = self
            .client
            .post(format!("{}/wp-json/rankmath/v1/updateMeta", self.site_url))
            .header("Authorization", &self.auth_header)
            .json(&body)
            .send()
            .await?;
        Ok(response.status().as_u16() == 200)
    }

    async fn list_all(&self) -> Result<Vec<RemoteRecord>> {
        let mut records = Vec::new();
        let mut page = 1usize;

        loop {
            let response = self
                .client
                .get(self.collection_url())
                .header("Authorization", &self.auth_header)
                .query(&[
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await?;

            // WordPress answers 400 for a page past the end.
            if response.status().as_u16() == 400 {
                break;
            }
            if !response.status().is_success() {
                return Err(self.error_for(&format!("Listing page {}", page), response).await);
            }

            let json: Value = response.json().await?;
            let items = json
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("Invalid listing: expected an array"))?;
            if items.is_empty() {
                break;
            }
            for item in items {
                records.push(record_from_json(item)?);
            }
            tracing::debug!(page, count = items.len(), "fetched listing page");

            if items.len() < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(records)
    }

    async fn delete(&self, id: u64) -> Result<()> {
        let response = self
            .client
            .delete(self.record_url(id))
            .header("Authorization", &self.auth_header)
            .query(&[("force", "true")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.error_for(&format!("Delete {}", id), response).await);
        }
        Ok(())
    }

    async fn topic_mapping(&self) -> Result<BTreeMap<String, u64>> {
        let response = self
            .client
            .get(format!("{}/wp-json/sie/v1/topics", self.site_url))
            .header("Authorization", &self.auth_header)
            .timeout(self.lookup_timeout())
            .send()
            .await?;
        if response.status().as_u16() != 200 {
            bail!("Topic endpoint returned {}", response.status());
        }
        let json: Value = response.json().await?;
        Ok(mapping_from_json(&json))
    }

    fn fallback_url(&self, slug: &str) -> String {
        format!("{}/{}/{}/", self.site_url, self.link_prefix, slug)
    }
}
