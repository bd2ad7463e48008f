// geo.rs
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::Location;

pub const DEFAULT_ENDPOINTS: [&str; 3] = [
    "https://ipapi.co/{ip}/json/",
    "https://ip.city/{ip}/json/",
    "https://ipwho.is/{ip}",
];

/// Representative coordinates used when no lookup service gives a usable answer.
pub const FALLBACK_LOCATIONS: [(&str, f64, f64); 5] = [
    ("New York", 40.7128, -74.0060),
    ("California", 36.7783, -119.4179),
    ("Texas", 31.9686, -99.9018),
    ("Florida", 27.6648, -81.5158),
    ("Illinois", 40.6331, -89.3985),
];

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("response has no usable location")]
    Unusable,
}

/// A single IP geolocation service.
#[async_trait]
pub trait GeoSource: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup(&self, client_ip: Option<IpAddr>) -> Result<Location, LookupError>;
}

pub struct HttpGeoSource {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpGeoSource {
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }

    /// Substitutes the client ip, or drops the placeholder so the service geolocates the caller.
    pub fn url_for(&self, client_ip: Option<IpAddr>) -> String {
        match client_ip {
            Some(ip) => self.endpoint.replace("{ip}", &ip.to_string()),
            None => self
                .endpoint
                .replace("{ip}/", "")
                .replace("{ip}", ""),
        }
    }
}

#[async_trait]
impl GeoSource for HttpGeoSource {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn lookup(&self, client_ip: Option<IpAddr>) -> Result<Location, LookupError> {
        let response = self.http.get(self.url_for(client_ip)).send().await?;
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }

        let body = response.json::<Value>().await?;
        parse_lookup(&body).ok_or(LookupError::Unusable)
    }
}

/// Extracts a location from the JSON shapes returned by the common lookup services.
pub fn parse_lookup(body: &Value) -> Option<Location> {
    let state = ["region", "region_name", "state"]
        .iter()
        .filter_map(|key| body.get(*key)?.as_str())
        .find(|value| !value.trim().is_empty())?;

    let location = Location {
        state: state.to_string(),
        latitude: coordinate(body.get("latitude")?)?,
        longitude: coordinate(body.get("longitude")?)?,
    };

    location.is_usable().then_some(location)
}

fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Waterfall over the configured sources, ending in a random fallback. Never fails.
#[derive(Clone)]
pub struct GeoResolver {
    sources: Arc<Vec<Box<dyn GeoSource>>>,
}

impl GeoResolver {
    pub fn new(sources: Vec<Box<dyn GeoSource>>) -> Self {
        Self {
            sources: Arc::new(sources),
        }
    }

    pub fn from_endpoints(endpoints: &[String], http: reqwest::Client) -> Self {
        Self::new(
            endpoints
                .iter()
                .map(|endpoint| {
                    Box::new(HttpGeoSource::new(endpoint.clone(), http.clone())) as Box<dyn GeoSource>
                })
                .collect(),
        )
    }

    pub async fn resolve(&self, client_ip: Option<IpAddr>) -> Location {
        for source in self.sources.iter() {
            match source.lookup(client_ip).await {
                Ok(location) if location.is_usable() => {
                    debug!("Resolved {} via {}", location.state, source.name());
                    return location;
                }
                Ok(location) => {
                    warn!("Rejected location from {}: {:?}", source.name(), location);
                }
                Err(e) => {
                    warn!("Failed to fetch location from {}: {e}", source.name());
                }
            }
        }

        let location = fallback_location();
        warn!("Using fallback location: {}", location.state);
        location
    }
}

pub fn fallback_location() -> Location {
    let (state, latitude, longitude) = FALLBACK_LOCATIONS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(FALLBACK_LOCATIONS[0]);

    Location::new(state, latitude, longitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(Result<Location, ()>, Arc<AtomicUsize>);

    #[async_trait]
    impl GeoSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn lookup(&self, _client_ip: Option<IpAddr>) -> Result<Location, LookupError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0.clone().map_err(|_| LookupError::Unusable)
        }
    }

    fn is_fallback(location: &Location) -> bool {
        FALLBACK_LOCATIONS
            .iter()
            .any(|(state, lat, lon)| location == &Location::new(state, *lat, *lon))
    }

    #[tokio::test]
    async fn all_sources_failing_yields_a_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = GeoResolver::new(vec![
            Box::new(Fixed(Err(()), calls.clone())),
            Box::new(Fixed(Err(()), calls.clone())),
        ]);

        for _ in 0..20 {
            assert!(is_fallback(&resolver.resolve(None).await));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 40);
    }

    #[tokio::test]
    async fn out_of_bounds_response_moves_to_next_source() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = GeoResolver::new(vec![
            Box::new(Fixed(Ok(Location::new("Nowhere", 95.0, 10.0)), calls.clone())),
            Box::new(Fixed(Ok(Location::new("Nowhere", 10.0, -200.0)), calls.clone())),
            Box::new(Fixed(Ok(Location::new("Oregon", 44.0, -120.5)), calls.clone())),
        ]);

        assert_eq!(resolver.resolve(None).await, Location::new("Oregon", 44.0, -120.5));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_sources_still_resolves() {
        assert!(is_fallback(&GeoResolver::new(Vec::new()).resolve(None).await));
    }

    #[test]
    fn parses_known_response_shapes() {
        let ipapi = json!({ "region": "Ohio", "latitude": 40.1, "longitude": -82.9 });
        assert_eq!(parse_lookup(&ipapi), Some(Location::new("Ohio", 40.1, -82.9)));

        let stringly = json!({ "region_name": "Bavaria", "latitude": "48.1", "longitude": "11.5" });
        assert_eq!(parse_lookup(&stringly), Some(Location::new("Bavaria", 48.1, 11.5)));

        let fallback_key = json!({ "region": "", "state": "Texas", "latitude": 31.0, "longitude": -99.0 });
        assert_eq!(parse_lookup(&fallback_key).unwrap().state, "Texas");
    }

    #[test]
    fn rejects_unusable_responses() {
        assert_eq!(parse_lookup(&json!({ "latitude": 1.0, "longitude": 1.0 })), None);
        assert_eq!(
            parse_lookup(&json!({ "region": "X", "latitude": 95, "longitude": 0 })),
            None
        );
        assert_eq!(
            parse_lookup(&json!({ "region": "X", "latitude": 0, "longitude": -200 })),
            None
        );
        assert_eq!(
            parse_lookup(&json!({ "region": "X", "latitude": "abc", "longitude": 0 })),
            None
        );
    }

    #[test]
    fn placeholder_is_substituted_or_dropped() {
        let source = HttpGeoSource::new("https://ipapi.co/{ip}/json/", reqwest::Client::new());
        assert_eq!(source.url_for(None), "https://ipapi.co/json/");
        assert_eq!(
            source.url_for(Some("1.2.3.4".parse().unwrap())),
            "https://ipapi.co/1.2.3.4/json/"
        );

        let trailing = HttpGeoSource::new("https://ipwho.is/{ip}", reqwest::Client::new());
        assert_eq!(trailing.url_for(None), "https://ipwho.is/");
    }
}
