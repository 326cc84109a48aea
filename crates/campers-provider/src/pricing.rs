//! On-demand cost estimates from the provider's price catalog.
//!
//! The catalog endpoint lives in us-east-1 regardless of where resources
//! run. Rates are cached in memory for 24 hours; environments without
//! catalog access (restricted IAM, local stacks) degrade to "Pricing
//! unavailable" rather than failing the command.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use campers_domain::InstanceState;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::constants::{region_location, BILLING_HOURS_PER_MONTH, EBS_GB_MONTH_USD};
use crate::ec2::{sigv4_headers, url_host, ChainCredentialsProvider, CredentialsProvider};
use crate::error::ProviderError;

const PRICING_REGION: &str = "us-east-1";
const PRICING_ENDPOINT: &str = "https://api.pricing.us-east-1.amazonaws.com";
const CACHE_TTL_HOURS: i64 = 24;

// ── Cache ─────────────────────────────────────────────────────────────────────

/// Key → (rate, insertion time) with a 24h TTL. Reads of expired entries
/// purge them and report a miss.
pub struct PricingCache {
    entries: Mutex<HashMap<String, (f64, DateTime<Utc>)>>,
    ttl: ChronoDuration,
}

impl Default for PricingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: ChronoDuration::hours(CACHE_TTL_HOURS),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        let mut entries = self.entries.lock().expect("pricing cache lock");
        match entries.get(key) {
            Some((value, inserted)) if Utc::now() - *inserted < self.ttl => Some(*value),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: f64) {
        self.set_at(key, value, Utc::now());
    }

    fn set_at(&self, key: &str, value: f64, inserted: DateTime<Utc>) {
        self.entries
            .lock()
            .expect("pricing cache lock")
            .insert(key.to_string(), (value, inserted));
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct PricingService {
    client: reqwest::Client,
    creds: Box<dyn CredentialsProvider>,
    cache: PricingCache,
    endpoint: String,
    /// Set on the first failed catalog call; later lookups short-circuit.
    unavailable: AtomicBool,
}

impl Default for PricingService {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingService {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            creds: Box::new(ChainCredentialsProvider),
            cache: PricingCache::new(),
            endpoint: PRICING_ENDPOINT.to_string(),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn available(&self) -> bool {
        !self.unavailable.load(Ordering::Relaxed)
    }

    /// On-demand Linux hourly rate, or `None` when the catalog is
    /// unreachable or has no entry for this type/region pair.
    pub async fn hourly_rate(&self, instance_type: &str, region: &str) -> Option<f64> {
        if self.unavailable.load(Ordering::Relaxed) {
            return None;
        }

        let key = format!("ec2:{}:{}", instance_type, region);
        if let Some(rate) = self.cache.get(&key) {
            return Some(rate);
        }

        match self.fetch_rate(instance_type, region).await {
            Ok(Some(rate)) => {
                self.cache.set(&key, rate);
                Some(rate)
            }
            Ok(None) => {
                debug!(instance_type, region, "no catalog entry for instance type");
                None
            }
            Err(e) => {
                debug!(error = %e, "pricing catalog unavailable");
                self.unavailable.store(true, Ordering::Relaxed);
                None
            }
        }
    }

    /// Estimated monthly cost for one instance: `hourly × 24 × 30` while
    /// running; stopped instances are charged EBS storage only.
    pub async fn monthly_cost(
        &self,
        instance_type: &str,
        region: &str,
        state: InstanceState,
        volume_size_gb: u32,
    ) -> Option<f64> {
        match state {
            InstanceState::Running | InstanceState::Pending => {
                let hourly = self.hourly_rate(instance_type, region).await?;
                Some(hourly * BILLING_HOURS_PER_MONTH)
            }
            _ => Some(f64::from(volume_size_gb) * EBS_GB_MONTH_USD),
        }
    }

    async fn fetch_rate(
        &self,
        instance_type: &str,
        region: &str,
    ) -> Result<Option<f64>, ProviderError> {
        let Some(location) = region_location(region) else {
            debug!(region, "no location mapping for region");
            return Ok(None);
        };

        let creds = self.creds.credentials()?;
        let body = json!({
            "ServiceCode": "AmazonEC2",
            "Filters": [
                { "Type": "TERM_MATCH", "Field": "instanceType", "Value": instance_type },
                { "Type": "TERM_MATCH", "Field": "location", "Value": location },
                { "Type": "TERM_MATCH", "Field": "operatingSystem", "Value": "Linux" },
                { "Type": "TERM_MATCH", "Field": "preInstalledSw", "Value": "NA" },
                { "Type": "TERM_MATCH", "Field": "tenancy", "Value": "Shared" },
                { "Type": "TERM_MATCH", "Field": "capacitystatus", "Value": "Used" },
            ],
            "MaxResults": 1,
        });
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        let host = url_host(&self.endpoint).to_string();
        let url = format!("{}/", self.endpoint.trim_end_matches('/'));
        let ct = "application/x-amz-json-1.1";
        let target = "AWSPriceListService.GetProducts";

        let sig = sigv4_headers(
            "POST", "/", ct, &body_bytes, &creds, PRICING_REGION, "pricing", &host,
        );
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", ct)
            .header("X-Amz-Target", target)
            .body(body_bytes);
        for (k, v) in &sig {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("pricing request: {}", e)))?;
        let status = resp.status().as_u16();
        let value: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Connection(format!("pricing decode: {}", e)))?;

        if status >= 400 {
            let code = value["__type"].as_str().unwrap_or("Unknown").to_string();
            let message = value["message"]
                .as_str()
                .or_else(|| value["Message"].as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(ProviderError::Api { code, message });
        }

        let Some(listing) = value["PriceList"].get(0).and_then(Value::as_str) else {
            return Ok(None);
        };
        let product: Value = serde_json::from_str(listing)
            .map_err(|e| ProviderError::Connection(format!("price list decode: {}", e)))?;
        Ok(extract_on_demand_rate(&product))
    }

    /// Test hook: point the service at a fixed endpoint with fake creds.
    #[doc(hidden)]
    pub fn with_test_endpoint(endpoint: &str) -> Self {
        struct TestCreds;
        impl CredentialsProvider for TestCreds {
            fn credentials(&self) -> Result<crate::ec2::AwsCredentials, ProviderError> {
                Ok(crate::ec2::AwsCredentials {
                    access_key_id: "AKID".into(),
                    secret_access_key: "SECRET".into(),
                    session_token: None,
                })
            }
        }
        Self {
            client: reqwest::Client::new(),
            creds: Box::new(TestCreds),
            cache: PricingCache::new(),
            endpoint: endpoint.to_string(),
            unavailable: AtomicBool::new(false),
        }
    }
}

/// Walk `terms.OnDemand.*.priceDimensions.*.pricePerUnit.USD` of one price
/// list entry. Zero-priced dimensions (free tier markers) are skipped.
fn extract_on_demand_rate(product: &Value) -> Option<f64> {
    let on_demand = product["terms"]["OnDemand"].as_object()?;
    for term in on_demand.values() {
        let Some(dimensions) = term["priceDimensions"].as_object() else {
            continue;
        };
        for dim in dimensions.values() {
            if let Some(usd) = dim["pricePerUnit"]["USD"].as_str() {
                if let Ok(rate) = usd.parse::<f64>() {
                    if rate > 0.0 {
                        return Some(rate);
                    }
                }
            }
        }
    }
    None
}

/// `$X.XX/month`, or the placeholder when no rate could be computed.
pub fn format_cost(cost: Option<f64>) -> String {
    match cost {
        Some(c) => format!("${:.2}/month", c),
        None => "Pricing unavailable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn cache_round_trips_within_ttl() {
        let cache = PricingCache::new();
        cache.set("ec2:t3.medium:us-east-1", 0.0416);
        assert_eq!(cache.get("ec2:t3.medium:us-east-1"), Some(0.0416));
        assert_eq!(cache.get("ec2:absent:us-east-1"), None);
    }

    #[test]
    fn cache_purges_expired_entries_on_read() {
        let cache = PricingCache::new();
        let stale = Utc::now() - ChronoDuration::hours(25);
        cache.set_at("old", 1.0, stale);
        assert_eq!(cache.get("old"), None);
        // The expired entry is gone, not just hidden.
        assert!(cache.entries.lock().unwrap().is_empty());
    }

    #[test]
    fn on_demand_rate_extraction() {
        let product = serde_json::json!({
            "terms": { "OnDemand": { "ABC.JRTCKXETXF": {
                "priceDimensions": {
                    "ABC.JRTCKXETXF.6YS6EN2CT7": {
                        "pricePerUnit": { "USD": "0.0416000000" }
                    }
                }
            }}}
        });
        assert_eq!(extract_on_demand_rate(&product), Some(0.0416));
        assert_eq!(extract_on_demand_rate(&serde_json::json!({})), None);
    }

    #[test]
    fn cost_formatting() {
        assert_eq!(format_cost(Some(33.552)), "$33.55/month");
        assert_eq!(format_cost(None), "Pricing unavailable");
    }

    #[tokio::test]
    async fn monthly_cost_is_hourly_times_720_running_storage_only_stopped() {
        let server = MockServer::start().await;
        let listing = serde_json::json!({
            "terms": { "OnDemand": { "X": { "priceDimensions": { "Y": {
                "pricePerUnit": { "USD": "0.10" }
            }}}}}
        })
        .to_string();
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AWSPriceListService.GetProducts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "PriceList": [listing]
            })))
            .mount(&server)
            .await;

        let svc = PricingService::with_test_endpoint(&server.uri());
        let running = svc
            .monthly_cost("t3.medium", "us-east-1", InstanceState::Running, 50)
            .await
            .unwrap();
        // 0.10 × 24 × 30; the volume does not enter the running estimate.
        assert!((running - 72.0).abs() < 1e-9);

        let stopped = svc
            .monthly_cost("t3.medium", "us-east-1", InstanceState::Stopped, 50)
            .await
            .unwrap();
        // 50GB × $0.08/GB-month
        assert!((stopped - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn catalog_failure_flips_to_unavailable_without_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "__type": "AccessDeniedException",
                "message": "no pricing:GetProducts"
            })))
            .mount(&server)
            .await;

        let svc = PricingService::with_test_endpoint(&server.uri());
        assert!(svc.available());
        assert_eq!(svc.hourly_rate("t3.medium", "us-east-1").await, None);
        assert!(!svc.available());
        // Short-circuits now; no second request is made.
        assert_eq!(svc.hourly_rate("t3.large", "us-east-1").await, None);
    }
}
