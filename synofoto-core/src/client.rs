use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::header::{ACCEPT, COOKIE};
use reqwest::{Client, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::auth::Credentials;

pub(crate) const API_INFO: &str = "SYNO.API.Info";
pub(crate) const AUTH_API: &str = "SYNO.API.Auth";
pub(crate) const USER_INFO_API: &str = "SYNO.Foto.UserInfo";
const ALBUM_API: &str = "SYNO.Foto.Browse.Album";
const ITEM_API: &str = "SYNO.Foto.Browse.Item";
const FOLDER_API: &str = "SYNO.Foto.Browse.Folder";
const TEAM_FOLDER_API: &str = "SYNO.FotoTeam.Browse.Folder";

const ENTRY_PATH: &str = "entry.cgi";
const DEFAULT_PAGE_SIZE: u32 = 1000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const ITEM_ADDITIONAL: &str = r#"["orientation","address","exif","gps"]"#;
const UNKNOWN_ERROR_CODE: i64 = 100;
const SESSION_ERROR_CODES: [i64; 4] = [105, 106, 107, 119];

#[derive(Debug, Error)]
pub enum SynoError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("{api} reported failure (code {code})")]
    Protocol { api: String, code: i64 },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("api {0} is not offered by the server")]
    MissingApi(String),
    #[error("{0} response is missing its data payload")]
    MissingData(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    Transient,
    Permanent,
}

impl SynoError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            SynoError::Auth(_) => ApiErrorClass::Auth,
            SynoError::Api { status, .. } => classify_api_status(*status),
            SynoError::Protocol { code, .. } if SESSION_ERROR_CODES.contains(code) => {
                ApiErrorClass::Auth
            }
            SynoError::Request(err) if err.is_timeout() || err.is_connect() => {
                ApiErrorClass::Transient
            }
            _ => ApiErrorClass::Permanent,
        }
    }

    pub fn is_auth(&self) -> bool {
        self.classification() == ApiErrorClass::Auth
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

/// Library partition a folder or album lives in. Folder ids are only unique
/// within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Personal,
    Shared,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Personal, Scope::Shared];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Personal => "personal",
            Scope::Shared => "shared",
        }
    }

    /// First segment of every display path built for this scope.
    pub fn path_prefix(&self) -> &'static str {
        match self {
            Scope::Personal => "mine",
            Scope::Shared => "shared",
        }
    }

    fn folder_api(&self) -> &'static str {
        match self {
            Scope::Personal => FOLDER_API,
            Scope::Shared => TEAM_FOLDER_API,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
    pub page_size: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            accept_invalid_certs: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) sid: Option<String>,
    pub(crate) own_user_id: Option<i64>,
    pub(crate) apis: Option<Arc<HashMap<String, ApiInfo>>>,
}

pub struct SynoClient {
    http: Client,
    base_url: Url,
    page_size: u32,
    pub(crate) credentials: Credentials,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) login_gate: tokio::sync::Mutex<()>,
}

impl SynoClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, SynoError> {
        Self::with_options(base_url, credentials, ClientOptions::default())
    }

    pub fn with_options(
        base_url: &str,
        credentials: Credentials,
        options: ClientOptions,
    ) -> Result<Self, SynoError> {
        let http = Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            page_size: options.page_size.max(1),
            credentials,
            state: Mutex::new(SessionState::default()),
            login_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Root folder of `scope`, or `None` when the server reports an empty one.
    pub async fn root_folder(&self, scope: Scope) -> Result<Option<Folder>, SynoError> {
        let request = ApiRequest::new(scope.folder_api(), 2, "get")
            .param("offset", "0")
            .param("limit", self.page_size.to_string());
        let data: RootFolderData = self.call(&request).await?;
        Ok(serde_json::from_value::<Folder>(data.folder).ok())
    }

    /// Immediate children of `parent`, or of the scope root when `parent` is `None`.
    pub async fn list_folders(
        &self,
        parent: Option<i64>,
        scope: Scope,
    ) -> Result<Vec<Folder>, SynoError> {
        let mut request = ApiRequest::new(scope.folder_api(), 2, "list");
        if let Some(parent) = parent {
            request = request.param("id", parent.to_string());
        }
        self.call_all(request).await
    }

    /// Every album visible to the account, own albums and shared-with-me alike.
    pub async fn list_albums(&self) -> Result<Vec<Album>, SynoError> {
        let request =
            ApiRequest::new(ALBUM_API, 4, "list").param("category", "normal_share_with_me");
        self.call_all(request).await
    }

    pub async fn list_albums_in(&self, scope: Scope) -> Result<Vec<Album>, SynoError> {
        let own = self.own_user_id();
        let albums = self.list_albums().await?;
        Ok(albums
            .into_iter()
            .filter(|album| album.scope_for(own) == scope)
            .collect())
    }

    pub async fn list_album_items(
        &self,
        album_id: i64,
        passphrase: &str,
    ) -> Result<Vec<AlbumItem>, SynoError> {
        let mut request =
            ApiRequest::new(ITEM_API, 4, "list").param("additional", ITEM_ADDITIONAL);
        request = if passphrase.is_empty() {
            request.param("album_id", album_id.to_string())
        } else {
            request.param("passphrase", passphrase)
        };
        self.call_all(request).await
    }

    async fn call_all<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<Vec<T>, SynoError> {
        let mut offset = 0u32;
        let mut items = Vec::new();
        loop {
            let page_request = request
                .clone()
                .param("offset", offset.to_string())
                .param("limit", self.page_size.to_string());
            let page: ListData<T> = self.call(&page_request).await?;
            let count = page.list.len() as u32;
            items.extend(page.list);
            if count < self.page_size {
                break;
            }
            offset = offset.saturating_add(count);
        }
        Ok(items)
    }

    /// Issues `request` under the live session. A rejected session is
    /// replaced by exactly one fresh login before the call is repeated.
    async fn call<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, SynoError> {
        let sid = self.ensure_session().await?;
        match self.send(request, Some(&sid)).await {
            Err(err) if err.is_auth() => {
                warn!(api = request.api, "session rejected, logging in again: {err}");
                self.invalidate_session(&sid);
                let sid = self.ensure_session().await?;
                self.send(request, Some(&sid)).await.map_err(|err| {
                    if err.is_auth() {
                        SynoError::Auth(err.to_string())
                    } else {
                        err
                    }
                })
            }
            other => other,
        }
    }

    pub(crate) async fn send<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        sid: Option<&str>,
    ) -> Result<T, SynoError> {
        self.execute::<T>(request, sid)
            .await?
            .into_data(request.api)
    }

    pub(crate) async fn execute<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        sid: Option<&str>,
    ) -> Result<Envelope<T>, SynoError> {
        let path = self.api_path(request.api).await?;
        let mut url = self.endpoint(&path)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("api", request.api)
                .append_pair("version", &request.version.to_string())
                .append_pair("method", request.method);
            for (key, value) in &request.params {
                query.append_pair(key, value);
            }
        }
        debug!(api = request.api, method = request.method, "remote call");
        let mut builder = self.http.get(url).header(ACCEPT, "application/json");
        if let Some(sid) = sid {
            builder = builder.header(COOKIE, format!("id={sid}"));
        }
        let response = builder.send().await?;
        Self::handle_response(response).await
    }

    /// Queries the server's API table and caches it for later calls.
    pub(crate) async fn fetch_api_info(
        &self,
    ) -> Result<Arc<HashMap<String, ApiInfo>>, SynoError> {
        let mut url = self.endpoint(ENTRY_PATH)?;
        url.query_pairs_mut()
            .append_pair("api", API_INFO)
            .append_pair("version", "1")
            .append_pair("method", "query")
            .append_pair("query", "all");
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let envelope: Envelope<HashMap<String, ApiInfo>> =
            Self::handle_response(response).await?;
        let apis = Arc::new(envelope.into_data(API_INFO)?);
        self.lock_state().apis = Some(Arc::clone(&apis));
        Ok(apis)
    }

    async fn api_path(&self, api: &str) -> Result<String, SynoError> {
        if api == API_INFO {
            return Ok(ENTRY_PATH.to_string());
        }
        let cached = self.lock_state().apis.clone();
        let apis = match cached {
            Some(apis) => apis,
            None => self.fetch_api_info().await?,
        };
        apis.get(api)
            .map(|info| info.path.clone())
            .ok_or_else(|| SynoError::MissingApi(api.to_string()))
    }

    fn endpoint(&self, path: &str) -> Result<Url, SynoError> {
        Ok(self.base_url.join(&format!("/webapi/{path}"))?)
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SynoError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SynoError::Api { status, body })
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ApiRequest {
    pub(crate) api: &'static str,
    version: u32,
    method: &'static str,
    params: Vec<(&'static str, String)>,
}

impl ApiRequest {
    pub(crate) fn new(api: &'static str, version: u32, method: &'static str) -> Self {
        Self {
            api,
            version,
            method,
            params: Vec::new(),
        }
    }

    pub(crate) fn param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
}

impl<T> Envelope<T> {
    pub(crate) fn into_data(self, api: &str) -> Result<T, SynoError> {
        self.check(api)?;
        self.data
            .ok_or_else(|| SynoError::MissingData(api.to_string()))
    }

    fn check(&self, api: &str) -> Result<(), SynoError> {
        if self.success {
            return Ok(());
        }
        Err(SynoError::Protocol {
            api: api.to_string(),
            code: self
                .error
                .as_ref()
                .map(|err| err.code)
                .unwrap_or(UNKNOWN_ERROR_CODE),
        })
    }
}

impl Envelope<IgnoredAny> {
    pub(crate) fn into_unit(self, api: &str) -> Result<(), SynoError> {
        self.check(api)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiInfo {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ListData<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RootFolderData {
    #[serde(default)]
    folder: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub passphrase: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Album {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default)]
    pub owner_user_id: i64,
    #[serde(default)]
    pub version: i64,
}

impl Album {
    /// Albums owned by `own_user_id` are personal, everything else is shared.
    /// An unknown own id classifies every album as shared.
    pub fn scope_for(&self, own_user_id: Option<i64>) -> Scope {
        if own_user_id == Some(self.owner_user_id) {
            Scope::Personal
        } else {
            Scope::Shared
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AlbumItem {
    pub id: i64,
    pub filename: String,
    pub folder_id: i64,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub owner_user_id: Option<i64>,
    #[serde(default)]
    pub additional: ItemAdditional,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ItemAdditional {
    #[serde(default)]
    pub orientation: Option<i64>,
    #[serde(default)]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Address {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub town: Option<String>,
    #[serde(default)]
    pub village: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginData {
    pub(crate) sid: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserInfo {
    #[serde(default)]
    pub(crate) id: Option<i64>,
}
