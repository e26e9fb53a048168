//! Farm Calendar: the activity log observations are delivered to.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::model::{ObservationPayload, OperationWindow};

use super::{ActivityLog, ClientError, http_client};

const SERVICE: &str = "Farm Calendar";
const PILE_URN: &str = "urn:farmcalendar:CompostPile:";

/// Farm Calendar REST client.
pub struct FarmCalendar {
    base_url: String,
    login_url: String,
    username: String,
    password: String,
    http: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct LoginResponse {
    access: Option<String>,
}

#[derive(Deserialize)]
struct OperationList {
    #[serde(rename = "@graph", default)]
    graph: Vec<CompostOperation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompostOperation {
    #[serde(rename = "@id")]
    id: String,
    is_operated_on: Option<Reference>,
    has_start_datetime: Option<String>,
    has_end_datetime: Option<String>,
}

#[derive(Deserialize)]
struct Reference {
    #[serde(rename = "@id")]
    id: String,
}

impl FarmCalendar {
    pub fn new(
        base_url: &str,
        login_url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            login_url: login_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            http: http_client(timeout)?,
        })
    }
}

impl ActivityLog for FarmCalendar {
    fn authenticate(&self) -> Result<String, ClientError> {
        let response: LoginResponse = self
            .http
            .post(&self.login_url)
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()?
            .error_for_status()?
            .json()?;
        let token = response
            .access
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingToken(SERVICE))?;
        tracing::info!("authenticated to {SERVICE}");
        Ok(token)
    }

    fn resolve_operation(
        &self,
        token: &str,
        pile_name: &str,
    ) -> Result<Option<OperationWindow>, ClientError> {
        let list: OperationList = self
            .http
            .get(format!("{}/CompostOperations/", self.base_url))
            .bearer_auth(token)
            .send()?
            .error_for_status()?
            .json()?;

        let pile = format!("{PILE_URN}{pile_name}");
        let operation = list
            .graph
            .into_iter()
            .find(|op| op.is_operated_on.as_ref().is_some_and(|r| r.id == pile));

        let Some(operation) = operation else {
            tracing::warn!(pile = pile_name, "no compost operation found");
            return Ok(None);
        };

        // Operation URNs end in the bare identifier.
        let operation_id = operation
            .id
            .rsplit(':')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ClientError::Unexpected(format!("operation id {:?}", operation.id)))?
            .to_string();
        tracing::info!(pile = pile_name, operation_id = %operation_id, "found compost operation");

        Ok(Some(OperationWindow {
            operation_id,
            pile_name: pile_name.to_string(),
            start: operation.has_start_datetime,
            end: operation.has_end_datetime,
        }))
    }

    fn post_observation(
        &self,
        token: &str,
        operation_id: &str,
        payload: &ObservationPayload,
    ) -> Result<(), ClientError> {
        if operation_id.is_empty() {
            return Err(ClientError::Unexpected("no operation id to post to".into()));
        }
        self.http
            .post(format!(
                "{}/CompostOperations/{operation_id}/Observations/",
                self.base_url
            ))
            .bearer_auth(token)
            .json(payload)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}
