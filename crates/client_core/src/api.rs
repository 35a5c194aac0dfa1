use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{
    header::{HeaderValue, AUTHORIZATION},
    Client, RequestBuilder, Response,
};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{BoundingBox, ConfigKey, JobId, LatLng, Timestamp},
    error::{ApiErrorBody, ApiException},
    protocol::{
        ApiStatusResponse, ConfigurationResponse, CreateJobResponse, JobStatusResponse, Place,
        PlaceSearchResponse, PointSeries, PrognosisResponse,
    },
};
use tracing::debug;
use url::Url;

use crate::{error::ApiCallError, settings::Settings};

/// Parameters of one model run, sent as a form (job creation) or as a query
/// string (prognosis).
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub model_name: String,
    pub parameters: Vec<(String, String)>,
    pub bbox: BoundingBox,
}

impl JobRequest {
    pub fn form_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.parameters.len() + 2);
        pairs.push(("model_name".to_string(), self.model_name.clone()));
        pairs.extend(
            self.parameters
                .iter()
                .filter(|(name, _)| name != "model_name" && name != "bbox")
                .cloned(),
        );
        pairs.push(("bbox".to_string(), self.bbox.to_bbox_string()));
        pairs
    }
}

/// Outcome of a prognosis call. A refusal from the server is an answer, not
/// an error.
#[derive(Debug, Clone)]
pub struct PrognosisAnswer {
    pub permitted: bool,
    pub response: PrognosisResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointQuery {
    pub location: LatLng,
    pub attribute: String,
    pub timestamp: Timestamp,
    pub config_key: ConfigKey,
}

impl PointQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("lat", self.location.lat.to_string()),
            ("lng", self.location.lng.to_string()),
            ("layers", self.attribute.clone()),
            ("time", self.timestamp.to_string()),
            ("configkey", self.config_key.to_string()),
        ]
    }
}

#[async_trait]
pub trait ModelApi: Send + Sync {
    async fn api_status(&self) -> Result<ApiStatusResponse, ApiCallError>;
    async fn configuration(&self, key: &ConfigKey) -> Result<ConfigurationResponse, ApiCallError>;
    async fn create_job(&self, request: &JobRequest) -> Result<CreateJobResponse, ApiCallError>;
    async fn job_status(&self, job: &JobId) -> Result<JobStatusResponse, ApiCallError>;
    async fn prognosis(&self, request: &JobRequest) -> Result<PrognosisAnswer, ApiCallError>;
    async fn job_log(&self, job: &JobId) -> Result<String, ApiCallError>;
    async fn search_places(&self, query: &str) -> Result<Vec<Place>, ApiCallError>;
    async fn point_series(&self, query: &PointQuery) -> Result<PointSeries, ApiCallError>;
}

pub struct HttpModelApi {
    http: Client,
    base: Url,
    auth: Option<HeaderValue>,
    geocoder: Option<Url>,
    point_data: Url,
}

impl HttpModelApi {
    pub fn new(settings: &Settings) -> Result<Self, ApiCallError> {
        let mut builder = Client::builder();
        if let Some(secs) = settings.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let mut api_url = settings.api_url.trim().to_string();
        if !api_url.ends_with('/') {
            api_url.push('/');
        }

        let base = Url::parse(&api_url)?;
        // Point data is served by the web application, next to the API.
        let point_data = match settings.point_data_url.as_deref() {
            Some(raw) => Url::parse(raw)?,
            None => base.join("/data/point")?,
        };

        Ok(Self {
            http: builder.build()?,
            base,
            point_data,
            auth: basic_auth(
                settings.api_username.as_deref(),
                settings.api_token.as_deref(),
            ),
            geocoder: settings
                .geocoder_url
                .as_deref()
                .map(Url::parse)
                .transpose()?,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiCallError> {
        Ok(self.base.join(path)?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(value) => request.header(AUTHORIZATION, value.clone()),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiCallError> {
        let url = self.endpoint(path)?;
        let response = self.authorized(self.http.get(url)).send().await?;
        decode_json(response).await
    }
}

fn basic_auth(username: Option<&str>, token: Option<&str>) -> Option<HeaderValue> {
    if username.is_none() && token.is_none() {
        return None;
    }
    let credentials = format!("{}:{}", username.unwrap_or_default(), token.unwrap_or_default());
    let mut value = HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(credentials))).ok()?;
    value.set_sensitive(true);
    Some(value)
}

async fn error_from(response: Response) -> ApiCallError {
    let status = response.status().as_u16();
    match response.json::<ApiErrorBody>().await {
        Ok(body) => ApiException::new(status, body.message).into(),
        Err(_) => ApiCallError::Status { status },
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiCallError> {
    if !response.status().is_success() {
        return Err(error_from(response).await);
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|err| ApiCallError::Decode(err.to_string()))
}

#[async_trait]
impl ModelApi for HttpModelApi {
    async fn api_status(&self) -> Result<ApiStatusResponse, ApiCallError> {
        self.get_json("").await
    }

    async fn configuration(&self, key: &ConfigKey) -> Result<ConfigurationResponse, ApiCallError> {
        self.get_json(&format!("config/{key}")).await
    }

    async fn create_job(&self, request: &JobRequest) -> Result<CreateJobResponse, ApiCallError> {
        let url = self.endpoint("job")?;
        let response = self
            .authorized(self.http.post(url))
            .form(&request.form_pairs())
            .send()
            .await?;
        decode_json(response).await
    }

    async fn job_status(&self, job: &JobId) -> Result<JobStatusResponse, ApiCallError> {
        self.get_json(&format!("job/{job}")).await
    }

    async fn prognosis(&self, request: &JobRequest) -> Result<PrognosisAnswer, ApiCallError> {
        let url = self.endpoint("job")?;
        let response = self
            .authorized(self.http.get(url))
            .query(&request.form_pairs())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(PrognosisAnswer {
                permitted: true,
                response: decode_json(response).await?,
            });
        }

        let body = response.bytes().await?;
        match serde_json::from_slice::<PrognosisResponse>(&body) {
            Ok(refusal) if refusal.is_answer() => {
                debug!(status = status.as_u16(), message = %refusal.message, "prognosis refused");
                Ok(PrognosisAnswer {
                    permitted: false,
                    response: refusal,
                })
            }
            _ => Err(ApiCallError::Status {
                status: status.as_u16(),
            }),
        }
    }

    async fn job_log(&self, job: &JobId) -> Result<String, ApiCallError> {
        let url = self.endpoint(&format!("job/{job}/log"))?;
        let response = self.authorized(self.http.get(url)).send().await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        Ok(response.text().await?)
    }

    async fn search_places(&self, query: &str) -> Result<Vec<Place>, ApiCallError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self
            .geocoder
            .clone()
            .ok_or(ApiCallError::NotConfigured("geocoder_url"))?;
        url.query_pairs_mut().append_pair("q", query);

        let response = self.http.get(url).send().await?;
        let found: PlaceSearchResponse = decode_json(response).await?;
        Ok(found.geonames)
    }

    async fn point_series(&self, query: &PointQuery) -> Result<PointSeries, ApiCallError> {
        let response = self
            .authorized(self.http.get(self.point_data.clone()))
            .query(&query.query_pairs())
            .send()
            .await?;
        decode_json(response).await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
