use crate::cache::{fingerprint, FifoCache};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

/// At most this many rewrites are offered per cycle, plus the original.
pub const MAX_REWRITES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantSource {
    Original,
    Rewrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub source: VariantSource,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Variant {
    pub fn original(text: &str) -> Self {
        Variant {
            source: VariantSource::Original,
            text: text.to_string(),
            score: None,
        }
    }

    pub fn is_rewrite(&self) -> bool {
        self.source == VariantSource::Rewrite
    }
}

#[derive(Deserialize)]
struct RewriteResponse {
    variants: Vec<RewriteCandidate>,
}

#[derive(Deserialize)]
struct RewriteCandidate {
    text: String,
    #[serde(default)]
    score: Option<f32>,
}

/// Client for the external rewrite service. Checks the variant cache
/// first and never surfaces a failure: any service problem degrades to
/// an original-only result the caller can always use.
pub struct RewriteClient {
    http: reqwest::Client,
    service_url: String,
    api_key: String,
    cache: Mutex<FifoCache<Vec<Variant>>>,
}

impl RewriteClient {
    pub fn new(
        service_url: &str,
        api_key: &str,
        request_timeout: Duration,
        cache_ttl: Duration,
        cache_capacity: usize,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build rewrite HTTP client")?;
        Ok(RewriteClient {
            http,
            service_url: service_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            cache: Mutex::new(FifoCache::new(cache_ttl, cache_capacity)),
        })
    }

    /// Fetch rewrite candidates for a draft. The original is always the
    /// first element of the returned list. At most one outbound request
    /// is issued per distinct fingerprint per TTL window; failures are
    /// logged and collapse to the original alone.
    pub async fn variants(&self, text: &str) -> Vec<Variant> {
        let key = fingerprint(text);

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(mut hit) = cache.get(&key) {
                log::debug!("rewrite cache hit for fingerprint {}", &key[..12]);
                // Slot 0 holds whatever spelling the service was first
                // asked about; a decision for it must commit the text
                // the user actually typed this time.
                if !hit.is_empty() {
                    hit[0] = Variant::original(text);
                }
                return hit;
            }
        }

        match self.request_rewrites(text).await {
            Ok(rewrites) => {
                let mut variants = vec![Variant::original(text)];
                variants.extend(rewrites.into_iter().take(MAX_REWRITES));
                log::debug!(
                    "rewrite service returned {} candidate(s)",
                    variants.len() - 1
                );
                if let Ok(mut cache) = self.cache.lock() {
                    cache.put(key, variants.clone());
                }
                variants
            }
            Err(e) => {
                log::warn!("rewrite service unavailable, keeping original: {e}");
                vec![Variant::original(text)]
            }
        }
    }

    async fn request_rewrites(&self, text: &str) -> anyhow::Result<Vec<Variant>> {
        let url = format!("{}/rewrite", self.service_url);
        let response = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .context("rewrite request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("rewrite service returned {}", response.status());
        }

        let body: RewriteResponse = response
            .json()
            .await
            .context("malformed rewrite response")?;

        Ok(body
            .variants
            .into_iter()
            .map(|c| Variant {
                source: VariantSource::Rewrite,
                text: c.text,
                score: c.score,
            })
            .collect())
    }
}
