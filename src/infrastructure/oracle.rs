use crate::domain::errors::OracleError;
use crate::domain::ports::{ScoreAdjustment, ScoreContext, ScoreOracle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Serialize)]
struct ScoreRequest<'a> {
    pair: &'a str,
    regime: String,
    deviation: f64,
    data_quality: f64,
}

#[derive(Deserialize)]
struct ScoreResponse {
    factor: f64,
    #[serde(default)]
    features: HashMap<String, f64>,
    #[serde(default)]
    confidence: f64,
}

/// HTTP score oracle client. Rate limiting lives in the signal processor's
/// gate; this client only performs the call and validates the response.
pub struct HttpScoreOracle {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpScoreOracle {
    pub fn new(endpoint: Url, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl ScoreOracle for HttpScoreOracle {
    async fn score(&self, context: ScoreContext) -> Result<ScoreAdjustment, OracleError> {
        let request = ScoreRequest {
            pair: &context.pair,
            regime: context.regime.to_string(),
            deviation: context.deviation,
            data_quality: context.data_quality,
        };

        let mut builder = self.client.post(self.endpoint.as_str()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        if response.status().as_u16() == 429 {
            return Err(OracleError::RateLimited { limit: 0 });
        }
        if !response.status().is_success() {
            return Err(OracleError::Unavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let body: ScoreResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        if !body.factor.is_finite() {
            return Err(OracleError::OutOfRangeFactor(body.factor));
        }

        debug!(
            "HttpScoreOracle: {} factor {:.3} ({} features)",
            context.pair,
            body.factor,
            body.features.len()
        );
        Ok(ScoreAdjustment {
            factor: body.factor,
            features: body.features,
            confidence: body.confidence,
        })
    }
}
