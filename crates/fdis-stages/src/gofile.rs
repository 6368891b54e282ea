//! Upload sink for the gofile.io file host.
//!
//! The first request picks an upload server, preferring the `eu` zone. When no
//! `FolderId` is configured, a small placeholder upload creates a guest folder
//! and token that every later upload reuses. Subfolders mirror each item's
//! `relative_folder` and are created once per path.
//!
//! Every API request waits on a [`RateLimiter`].

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use fdis_pipeline::{
    ComponentOptions, ContentDescriptor, ContentReceiver, Outcome, OutcomeKind, PipelineContext,
    PipelineError, RateLimiter, Received, Sink,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::StageError;

const DEFAULT_API_URL: &str = "https://api.gofile.io";
const DEFAULT_UPLOAD_URL: &str = "https://{server}.gofile.io/contents/uploadfile";
const SERVER_PLACEHOLDER: &str = "{server}";
const FALLBACK_SERVER: &str = "store1";
const PREFERRED_ZONE: &str = "eu";
const DEFAULT_INTERVAL_MS: u64 = 1000;
const PLACEHOLDER_NAME: &str = "fdis.txt";
const PLACEHOLDER_CONTENT: &str = "Uploaded by fdis";

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Envelope shared by every API answer.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
struct Server {
    name: String,
    #[serde(default)]
    zone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    download_page: Option<String>,
    parent_folder: Option<String>,
    guest_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFolder<'a> {
    parent_folder_id: &'a str,
    folder_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedFolder {
    #[serde(alias = "id")]
    folder_id: String,
}

/// Uploads every item to gofile.io.
///
/// Options:
/// - `FolderId`: remote root folder. Without it a guest folder is created.
/// - `AccountId`: API token sent as a bearer token. Without it the guest
///   token handed out by the first upload is used.
/// - `IntervalMs` (default 1000): minimum spacing between API requests.
/// - `ApiUrl`, `UploadUrl`: endpoint overrides. `{server}` in `UploadUrl` is
///   replaced by the selected upload server.
pub struct GofileUploader {
    client: Client,
    limiter: RateLimiter,
    api_url: String,
    upload_url: String,
    folder_id: Option<String>,
    account_id: Option<String>,
    folders: HashMap<String, String>,
    download_page: Option<String>,
}

impl GofileUploader {
    pub const NAME: &'static str = "GofileUploader";

    pub fn new(client: Client) -> Self {
        Self {
            client,
            limiter: RateLimiter::new(Duration::from_millis(DEFAULT_INTERVAL_MS)),
            api_url: DEFAULT_API_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            folder_id: None,
            account_id: None,
            folders: HashMap::new(),
            download_page: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.limiter = RateLimiter::new(interval);
        self
    }

    pub fn with_folder_id(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_upload_url(mut self, upload_url: impl Into<String>) -> Self {
        self.upload_url = upload_url.into();
        self
    }

    pub fn from_options(options: &ComponentOptions) -> Result<Self, PipelineError> {
        install_rustls_provider();
        let client = Client::builder()
            .build()
            .map_err(|e| PipelineError::component(Self::NAME, e))?;
        let interval_ms = options.parse_or(Self::NAME, "IntervalMs", DEFAULT_INTERVAL_MS)?;

        let mut uploader = Self::new(client).with_interval(Duration::from_millis(interval_ms));
        let set = |key: &str| options.get(key).filter(|v| !v.trim().is_empty());
        if let Some(folder_id) = set("FolderId") {
            uploader = uploader.with_folder_id(folder_id);
        }
        if let Some(account_id) = set("AccountId") {
            uploader = uploader.with_account_id(account_id);
        }
        if let Some(api_url) = set("ApiUrl") {
            uploader = uploader.with_api_url(api_url);
        }
        if let Some(upload_url) = set("UploadUrl") {
            uploader = uploader.with_upload_url(upload_url);
        }
        Ok(uploader)
    }

    /// Send `request` once the limiter allows it and unwrap the API envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, StageError> {
        self.limiter.wait_acquire().await;
        let request = match &self.account_id {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response: ApiResponse = request.send().await?.error_for_status()?.json().await?;
        debug!(endpoint, status = %response.status, "API response");
        if response.status != "ok" {
            return Err(StageError::Api {
                endpoint: endpoint.to_string(),
                status: response.status,
            });
        }
        Ok(serde_json::from_value(response.data)?)
    }

    async fn select_server(&mut self) -> Result<(), StageError> {
        if !self.upload_url.contains(SERVER_PLACEHOLDER) {
            return Ok(());
        }
        let url = format!("{}/servers", self.api_url);
        let list: ServerList = self.call("servers", self.client.get(&url)).await?;
        let server = list
            .servers
            .iter()
            .find(|s| s.zone == PREFERRED_ZONE)
            .or(list.servers.first())
            .map_or(FALLBACK_SERVER, |s| s.name.as_str());

        self.upload_url = self.upload_url.replace(SERVER_PLACEHOLDER, server);
        info!(server, url = %self.upload_url, "Selected upload server");
        Ok(())
    }

    /// Obtain a guest folder (and token, if none is configured).
    async fn create_root(&mut self) -> Result<(), StageError> {
        let form = Form::new().part(
            "file",
            Part::text(PLACEHOLDER_CONTENT).file_name(PLACEHOLDER_NAME),
        );
        let request = self.client.post(&self.upload_url).multipart(form);
        let uploaded: UploadedFile = self.call("uploadfile", request).await?;

        if self.account_id.is_none() {
            self.account_id = uploaded.guest_token;
        }
        self.folder_id = uploaded.parent_folder;
        self.download_page = uploaded.download_page;
        info!(
            folder = ?self.folder_id,
            page = ?self.download_page,
            "Created upload folder"
        );
        Ok(())
    }

    async fn prepare(&mut self) -> Result<(), StageError> {
        self.select_server().await?;
        if self.folder_id.is_none() {
            self.create_root().await?;
        }
        Ok(())
    }

    /// Remote folder for `relative_folder`, creating missing levels.
    async fn folder_for(&mut self, relative_folder: &str) -> Result<Option<String>, StageError> {
        let Some(mut parent) = self.folder_id.clone() else {
            return Ok(None);
        };

        let mut path = String::new();
        for name in relative_folder
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
        {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(name);
            if let Some(id) = self.folders.get(&path) {
                parent = id.clone();
                continue;
            }

            let url = format!("{}/contents/createFolder", self.api_url);
            let body = CreateFolder {
                parent_folder_id: &parent,
                folder_name: name,
            };
            let created: CreatedFolder = self
                .call("createFolder", self.client.post(&url).json(&body))
                .await?;
            debug!(folder = %path, id = %created.folder_id, "Created remote folder");
            self.folders.insert(path.clone(), created.folder_id.clone());
            parent = created.folder_id;
        }
        Ok(Some(parent))
    }

    /// Upload one item; returns the download page the host reported.
    async fn upload(&mut self, item: &ContentDescriptor) -> Result<Option<String>, StageError> {
        let folder = self.folder_for(item.relative_folder()).await?;

        let file = tokio::fs::File::open(item.locator()).await?;
        let size = file.metadata().await?.len();
        let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), size)
            .file_name(item.file_name().to_string());
        let mut form = Form::new();
        if let Some(folder) = folder {
            form = form.text("folderId", folder);
        }
        let form = form.part("file", part);

        let request = self.client.post(&self.upload_url).multipart(form);
        let uploaded: UploadedFile = self.call("uploadfile", request).await?;
        if self.download_page.is_none() {
            self.download_page = uploaded.download_page.clone();
        }
        Ok(uploaded.download_page)
    }
}

#[async_trait]
impl Sink for GofileUploader {
    fn name(&self) -> String {
        Self::NAME.to_string()
    }

    async fn consume(
        &mut self,
        mut input: ContentReceiver,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError> {
        let name = self.name();
        let mut outcomes = Vec::new();

        let prepared = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => None,
            result = self.prepare() => Some(result),
        };
        let ready = match prepared {
            None => {
                outcomes.push(Outcome::cancelled(format!("{name} cancelled")));
                return Ok(outcomes);
            }
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!(api = %self.api_url, error = %e, "Could not prepare upload");
                outcomes.push(Outcome::error(
                    format!("Could not reach {}", self.api_url),
                    e,
                ));
                false
            }
        };

        loop {
            let item = match input.recv_cancellable(&ctx.token).await {
                Received::Item(item) => item,
                Received::Ended => break,
                Received::Cancelled => {
                    outcomes.push(Outcome::cancelled(format!("{name} cancelled")));
                    break;
                }
            };
            if !ready {
                outcomes.push(Outcome::failure(format!(
                    "{} not uploaded",
                    item.relative_path().display()
                )));
                continue;
            }

            let _permit = match ctx.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    outcomes.push(Outcome::cancelled(format!("{name} cancelled")));
                    break;
                }
            };

            debug!("Uploading {item}");
            let result = tokio::select! {
                biased;
                _ = ctx.token.cancelled() => None,
                result = self.upload(&item) => Some(result),
            };
            match result {
                Some(Ok(Some(page))) => outcomes.push(Outcome::success(format!(
                    "Uploaded {} to {page}",
                    item.relative_path().display()
                ))),
                Some(Ok(None)) => outcomes.push(Outcome::success(format!(
                    "Uploaded {}",
                    item.relative_path().display()
                ))),
                Some(Err(e)) => {
                    warn!(file = %item.locator().display(), error = %e, "Upload failed");
                    outcomes.push(Outcome::error(
                        format!("Couldn't upload {}", item.relative_path().display()),
                        e,
                    ));
                }
                None => {
                    outcomes.push(Outcome::cancelled(format!(
                        "Uploading {} cancelled",
                        item.file_name()
                    )));
                    break;
                }
            }
        }

        info!(
            "Uploaded {} files",
            outcomes
                .iter()
                .filter(|o| o.kind() == OutcomeKind::Success)
                .count()
        );
        if let Some(page) = &self.download_page {
            outcomes.push(Outcome::success(format!("Access downloads from {page}")));
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{context, feed, init_tracing, write_file};
    use axum::extract::{Multipart, Path, State};
    use axum::http::{HeaderMap, header};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    struct Upload {
        server: String,
        folder: Option<String>,
        file_name: String,
        content: Vec<u8>,
        auth: Option<String>,
    }

    /// In-process stand-in for the file host.
    #[derive(Default)]
    struct MockHost {
        uploads: Mutex<Vec<Upload>>,
        folders: Mutex<Vec<(String, String)>>,
    }

    async fn servers() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "data": { "servers": [
                { "name": "store-na", "zone": "na" },
                { "name": "store-eu", "zone": "eu" }
            ]}
        }))
    }

    async fn create_folder(
        State(host): State<Arc<MockHost>>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let parent = body["parentFolderId"].as_str().unwrap_or_default().to_string();
        let name = body["folderName"].as_str().unwrap_or_default().to_string();
        host.folders
            .lock()
            .unwrap()
            .push((parent.clone(), name.clone()));
        Json(json!({ "status": "ok", "data": { "id": format!("{parent}/{name}") } }))
    }

    async fn upload_file(
        State(host): State<Arc<MockHost>>,
        Path(server): Path<String>,
        headers: HeaderMap,
        mut multipart: Multipart,
    ) -> Json<Value> {
        let mut folder = None;
        let mut file_name = String::new();
        let mut content = Vec::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let field_name = field.name().unwrap_or_default().to_string();
            match field_name.as_str() {
                "folderId" => folder = Some(field.text().await.unwrap()),
                "file" => {
                    file_name = field.file_name().unwrap_or_default().to_string();
                    content = field.bytes().await.unwrap().to_vec();
                }
                _ => {}
            }
        }
        if file_name == "rejected.txt" {
            return Json(json!({ "status": "error-rejected", "data": {} }));
        }

        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let parent = folder.clone().unwrap_or_else(|| "root".to_string());
        host.uploads.lock().unwrap().push(Upload {
            server,
            folder,
            file_name: file_name.clone(),
            content,
            auth,
        });
        Json(json!({
            "status": "ok",
            "data": {
                "downloadPage": format!("https://gofile.test/d/{parent}"),
                "parentFolder": parent,
                "guestToken": "guest-token",
                "fileName": file_name
            }
        }))
    }

    async fn spawn_host() -> (String, Arc<MockHost>) {
        let host = Arc::new(MockHost::default());
        let app = Router::new()
            .route("/servers", get(servers))
            .route("/contents/createFolder", post(create_folder))
            .route("/{server}/uploadfile", post(upload_file))
            .with_state(host.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), host)
    }

    fn uploader(base: &str, extra: &[(&str, &str)]) -> GofileUploader {
        let upload_url = format!("{base}/{{server}}/uploadfile");
        let mut options: ComponentOptions = [
            ("ApiUrl", base),
            ("UploadUrl", upload_url.as_str()),
            ("IntervalMs", "1"),
        ]
        .into_iter()
        .collect();
        for (key, value) in extra {
            options.insert(*key, *value);
        }
        GofileUploader::from_options(&options).unwrap()
    }

    #[tokio::test]
    async fn test_guest_upload_mirrors_subfolders() {
        init_tracing();
        let (base, host) = spawn_host().await;
        let dir = TempDir::new().unwrap();
        let items = vec![
            write_file(dir.path(), "", "a.txt", b"alpha"),
            write_file(dir.path(), "x/y", "b.txt", b"beta"),
            write_file(dir.path(), "x", "c.txt", b"gamma"),
        ];

        let mut sink = uploader(&base, &[]);
        let outcomes = sink.consume(feed(items).await, &context()).await.unwrap();

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| o.kind() == OutcomeKind::Success));
        assert_eq!(
            outcomes[3].message(),
            "Access downloads from https://gofile.test/d/root"
        );

        let uploads = host.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 4);
        assert!(uploads.iter().all(|u| u.server == "store-eu"));

        assert_eq!(uploads[0].file_name, PLACEHOLDER_NAME);
        assert_eq!(uploads[0].folder, None);
        assert_eq!(uploads[0].auth, None);

        assert_eq!(uploads[1].file_name, "a.txt");
        assert_eq!(uploads[1].content, b"alpha");
        assert_eq!(uploads[1].folder.as_deref(), Some("root"));
        assert_eq!(uploads[1].auth.as_deref(), Some("Bearer guest-token"));
        assert_eq!(uploads[2].folder.as_deref(), Some("root/x/y"));
        assert_eq!(uploads[3].folder.as_deref(), Some("root/x"));

        let folders = host.folders.lock().unwrap().clone();
        assert_eq!(
            folders,
            vec![
                ("root".to_string(), "x".to_string()),
                ("root/x".to_string(), "y".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_configured_folder_and_account() {
        let (base, host) = spawn_host().await;
        let dir = TempDir::new().unwrap();
        let items = vec![write_file(dir.path(), "", "a.txt", b"alpha")];

        let mut sink = uploader(&base, &[("FolderId", "home"), ("AccountId", "acct")]);
        let outcomes = sink.consume(feed(items).await, &context()).await.unwrap();

        let uploads = host.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].folder.as_deref(), Some("home"));
        assert_eq!(uploads[0].auth.as_deref(), Some("Bearer acct"));
        assert_eq!(
            outcomes.last().unwrap().message(),
            "Access downloads from https://gofile.test/d/home"
        );
    }

    #[tokio::test]
    async fn test_rejected_and_missing_items_fail() {
        let (base, _host) = spawn_host().await;
        let dir = TempDir::new().unwrap();
        let items = vec![
            write_file(dir.path(), "", "a.txt", b"alpha"),
            write_file(dir.path(), "", "rejected.txt", b"no"),
            ContentDescriptor::new("gone.txt", "", dir.path().join("gone.txt"), 1),
        ];

        let mut sink = uploader(&base, &[("FolderId", "home")]);
        let outcomes = sink.consume(feed(items).await, &context()).await.unwrap();

        let kinds: Vec<_> = outcomes.iter().map(|o| o.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                OutcomeKind::Success,
                OutcomeKind::Failure,
                OutcomeKind::Failure,
                OutcomeKind::Success
            ]
        );
        assert!(matches!(
            outcomes[1]
                .cause()
                .and_then(|c| c.downcast_ref::<StageError>()),
            Some(StageError::Api { status, .. }) if status == "error-rejected"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_every_item() {
        let dir = TempDir::new().unwrap();
        let items = vec![
            write_file(dir.path(), "", "a.txt", b"a"),
            write_file(dir.path(), "", "b.txt", b"b"),
        ];

        let mut sink = uploader("http://127.0.0.1:1", &[]);
        let outcomes = sink.consume(feed(items).await, &context()).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(Outcome::is_failure));
        assert!(outcomes[0].message().starts_with("Could not reach"));
    }

    #[tokio::test]
    async fn test_cancelled_before_upload() {
        let (base, host) = spawn_host().await;
        let dir = TempDir::new().unwrap();
        let items = vec![write_file(dir.path(), "", "a.txt", b"a")];
        let ctx = context();
        ctx.token.cancel();

        let mut sink = uploader(&base, &[("FolderId", "home")]);
        let outcomes = sink.consume(feed(items).await, &ctx).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].kind(), OutcomeKind::Cancelled);
        assert!(host.uploads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_options() {
        let uploader = GofileUploader::from_options(&ComponentOptions::new()).unwrap();
        assert_eq!(uploader.api_url, DEFAULT_API_URL);
        assert_eq!(uploader.upload_url, DEFAULT_UPLOAD_URL);
        assert_eq!(
            uploader.limiter.interval(),
            Duration::from_millis(DEFAULT_INTERVAL_MS)
        );
        assert!(uploader.folder_id.is_none());

        let options: ComponentOptions = [("IntervalMs", "soon")].into_iter().collect();
        assert!(GofileUploader::from_options(&options).is_err());
    }
}
