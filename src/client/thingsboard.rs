//! ThingsBoard: the telemetry platform.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::{
    model::{Asset, Series, TimeWindow},
    recommend::CompostStatus,
};

use super::{ClientError, TelemetrySource, http_client};

const SERVICE: &str = "ThingsBoard";
const SAMPLE_LIMIT: u32 = 10_000;

/// ThingsBoard REST client.
pub struct ThingsBoard {
    base_url: String,
    username: String,
    password: String,
    http: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

#[derive(Deserialize)]
struct Relation {
    from: Asset,
}

impl ThingsBoard {
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            http: http_client(timeout)?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn auth_header(token: &str) -> String {
    format!("Bearer {token}")
}

impl TelemetrySource for ThingsBoard {
    fn authenticate(&self) -> Result<String, ClientError> {
        let response: LoginResponse = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()?
            .error_for_status()?
            .json()?;
        let token = response
            .token
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingToken(SERVICE))?;
        tracing::info!("authenticated to {SERVICE}");
        Ok(token)
    }

    fn fetch_series(
        &self,
        token: &str,
        device_id: &str,
        keys: &[String],
        window: TimeWindow,
    ) -> Result<Series, ClientError> {
        let series = self
            .http
            .get(self.url(&format!(
                "/api/plugins/telemetry/DEVICE/{device_id}/values/timeseries"
            )))
            .header("X-Authorization", auth_header(token))
            .query(&[
                ("keys", keys.join(",")),
                ("startTs", window.start_ms.to_string()),
                ("endTs", window.end_ms.to_string()),
                ("limit", SAMPLE_LIMIT.to_string()),
                ("orderBy", "ASC".to_string()),
            ])
            .send()?
            .error_for_status()?
            .json()?;
        Ok(series)
    }

    fn resolve_asset(&self, token: &str, device_id: &str) -> Result<Option<Asset>, ClientError> {
        let relations: Vec<Relation> = self
            .http
            .get(self.url("/api/relations"))
            .header("X-Authorization", auth_header(token))
            .query(&[("toId", device_id), ("toType", "DEVICE")])
            .send()?
            .error_for_status()?
            .json()?;

        let asset = relations
            .into_iter()
            .map(|r| r.from)
            .find(|from| from.entity_type == "ASSET");
        if let Some(asset) = &asset {
            tracing::debug!(device = device_id, asset = %asset.id, "device linked to asset");
        }
        Ok(asset)
    }

    fn invalidate_session(&self, token: &str) {
        let result = self
            .http
            .post(self.url("/api/auth/logout"))
            .header("X-Authorization", auth_header(token))
            .send()
            .and_then(reqwest::blocking::Response::error_for_status);
        if let Err(e) = result {
            tracing::warn!(error = %e, "{SERVICE} logout failed");
        }
    }

    fn publish_recommendation(
        &self,
        token: &str,
        asset_id: &str,
        status: &CompostStatus,
    ) -> Result<(), ClientError> {
        self.http
            .post(self.url(&format!(
                "/api/plugins/telemetry/ASSET/{asset_id}/timeseries/ANY"
            )))
            .header("X-Authorization", auth_header(token))
            .json(status)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}
