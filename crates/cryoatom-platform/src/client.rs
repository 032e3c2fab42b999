//! CryoSPARC command-server client.
//!
//! The command server speaks JSON-RPC 2.0 at `http://<host>:<base_port + 2>/api`.
//! Every request carries the instance `License-ID`; once logged in, requests
//! also carry the `User-ID` returned by `get_id_by_email_password`.

use async_trait::async_trait;
use cryoatom_common::{CryoAtomError, JobOutputs, OutputRow, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::session::PlatformSession;

/// Offset of the command server from the instance base port.
const COMMAND_PORT_OFFSET: u16 = 2;

/// Everything needed to open a session.
#[derive(Debug)]
pub struct ConnectionSettings {
    pub host: String,
    pub base_port: u16,
    pub email: String,
    pub password: SecretString,
    pub license_id: String,
    pub timeout_secs: u64,
}

impl ConnectionSettings {
    pub fn api_url(&self) -> String {
        format!(
            "http://{}:{}/api",
            self.host,
            self.base_port.saturating_add(COMMAND_PORT_OFFSET)
        )
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: Option<i64>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JobDocument {
    #[serde(default)]
    output_results: Vec<OutputResult>,
}

#[derive(Debug, Deserialize)]
struct OutputResult {
    group_name: String,
    name: String,
    #[serde(default)]
    metafiles: Vec<String>,
}

/// Authenticated session against one CryoSPARC instance.
#[derive(Debug)]
pub struct CryoSparcClient {
    client: Client,
    api_url: String,
    user_id: String,
    next_id: AtomicU64,
}

impl CryoSparcClient {
    /// Connect and log in.
    #[instrument(skip(settings), fields(host = %settings.host, port = settings.base_port))]
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let license = HeaderValue::from_str(&settings.license_id)
            .map_err(|e| CryoAtomError::Config(format!("invalid license id: {}", e)))?;
        headers.insert("License-ID", license);

        // The command server sits on the instance's own network.
        let client = ClientBuilder::new()
            .no_proxy()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        let mut session = Self {
            client,
            api_url: settings.api_url(),
            user_id: String::new(),
            next_id: AtomicU64::new(1),
        };

        info!("Connecting to CryoSPARC at {}", session.api_url);
        let user_id: String = session
            .call(
                "get_id_by_email_password",
                json!([settings.email, password_digest(&settings.password)]),
            )
            .await?;
        debug!("Logged in as user {}", user_id);
        session.user_id = user_id;

        Ok(session)
    }

    /// Issue one JSON-RPC call and decode its result.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let mut builder = self.client.post(&self.api_url).json(&request);
        if !self.user_id.is_empty() {
            builder = builder.header("User-ID", &self.user_id);
        }

        let response: RpcResponse = builder.send().await?.error_for_status()?.json().await?;
        decode_response(method, response)
    }
}

/// The command server compares against the hex sha256 of the password.
fn password_digest(password: &SecretString) -> String {
    hex::encode(Sha256::digest(password.expose_secret().as_bytes()))
}

fn decode_response<T: DeserializeOwned>(method: &str, response: RpcResponse) -> Result<T> {
    if let Some(err) = response.error {
        return Err(CryoAtomError::Platform(format!(
            "{} failed (code {}): {}",
            method,
            err.code.map_or_else(|| "?".to_string(), |c| c.to_string()),
            err.message
        )));
    }
    let result = response.result.unwrap_or(Value::Null);
    Ok(serde_json::from_value(result)?)
}

/// Convert a job document's `output_results` into per-field rows for one
/// output group. Each result `<name>` becomes the field `<name>/path`, with one
/// row per `.mrc` metafile.
fn outputs_from_job_document(doc: JobDocument, project: &str, job: &str, output: &str) -> Result<JobOutputs> {
    let mut groups: Vec<String> = Vec::new();
    let mut outputs = JobOutputs::new();

    for result in doc.output_results {
        if result.group_name != output {
            if !groups.contains(&result.group_name) {
                groups.push(result.group_name);
            }
            continue;
        }
        let rows = result
            .metafiles
            .into_iter()
            .filter(|f| f.to_lowercase().ends_with(".mrc"))
            .map(OutputRow::with_path)
            .collect();
        outputs.insert(format!("{}/path", result.name), rows);
    }

    if outputs.is_empty() {
        return Err(CryoAtomError::Platform(format!(
            "job {}/{} has no output '{}' (available: {:?})",
            project, job, output, groups
        )));
    }
    Ok(outputs)
}

#[async_trait]
impl PlatformSession for CryoSparcClient {
    async fn project_dir(&self, project: &str) -> Result<PathBuf> {
        let dir: String = self.call("get_project_dir_abs", json!([project])).await?;
        Ok(PathBuf::from(dir))
    }

    async fn job_dir(&self, project: &str, job: &str) -> Result<PathBuf> {
        let dir: String = self.call("get_job_dir_abs", json!([project, job])).await?;
        Ok(PathBuf::from(dir))
    }

    #[instrument(skip(self))]
    async fn fetch_job_outputs(&self, project: &str, job: &str, output: &str) -> Result<JobOutputs> {
        let doc: JobDocument = self
            .call("get_job", json!([project, job, "output_results"]))
            .await?;
        outputs_from_job_document(doc, project, job, output)
    }

    async fn append_log(&self, project: &str, job: &str, message: &str) -> Result<()> {
        let _: Value = self
            .call("job_send_streamlog", json!([project, job, message, false]))
            .await?;
        Ok(())
    }
}
