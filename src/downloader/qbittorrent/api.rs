//! HTTP layer of the qBittorrent Web API v2.
//!
//! Knows endpoints, the SID cookie and status-code mapping. Retry and session
//! recovery live one level up in the adapter.

use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Response, StatusCode, multipart};
use std::time::Duration;
use tokio::sync::RwLock;

use super::models::{AddOptions, AddSource, TorrentFile, TorrentInfo};
use crate::error::{DownloaderError, Error, Result};

const SID_COOKIE: &str = "SID";

/// Thin client over the Web API endpoints
pub(crate) struct WebApi {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    // `Some("")` means the server accepted the login without issuing a cookie
    sid: RwLock<Option<String>>,
}

impl WebApi {
    pub(crate) fn new(
        base_url: &str,
        username: Option<&str>,
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("media-dl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.unwrap_or_default().to_string(),
            password: password.unwrap_or_default().to_string(),
            sid: RwLock::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, path)
    }

    /// Log in and store the session cookie
    pub(crate) async fn login(&self) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint("auth/login"))
            .header("Referer", &self.base_url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            // IP ban: logging in again only extends it
            StatusCode::FORBIDDEN => {
                return Err(DownloaderError::Api {
                    status: StatusCode::FORBIDDEN.as_u16(),
                    message: "IP banned after too many failed login attempts".into(),
                }
                .into());
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(api_error(status, body));
            }
        }

        let sid = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(parse_sid);

        let body = response.text().await?;
        if body.trim() != "Ok." {
            return Err(DownloaderError::Auth("invalid username or password".into()).into());
        }

        tracing::debug!(base_url = %self.base_url, "logged in to qBittorrent");
        *self.sid.write().await = Some(sid.unwrap_or_default());
        Ok(())
    }

    /// Log in unless a session is already held
    pub(crate) async fn ensure_logged_in(&self) -> Result<()> {
        if self.sid.read().await.is_some() {
            return Ok(());
        }
        self.login().await
    }

    /// Forget the session so the next call logs in again
    pub(crate) async fn invalidate_session(&self) {
        *self.sid.write().await = None;
    }

    async fn with_cookie(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.sid.read().await.as_deref() {
            Some(sid) if !sid.is_empty() => request.header(COOKIE, format!("{SID_COOKIE}={sid}")),
            _ => request,
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        let request = self.http.get(self.endpoint(path)).query(query);
        let response = self.with_cookie(request).await.send().await?;
        check(response).await
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Response> {
        let request = self.http.post(self.endpoint(path)).form(form);
        let response = self.with_cookie(request).await.send().await?;
        check(response).await
    }

    /// `GET /app/version`
    pub(crate) async fn version(&self) -> Result<String> {
        Ok(self.get("app/version", &[]).await?.text().await?.trim().to_string())
    }

    /// `GET /app/webapiVersion`
    pub(crate) async fn webapi_version(&self) -> Result<String> {
        Ok(self
            .get("app/webapiVersion", &[])
            .await?
            .text()
            .await?
            .trim()
            .to_string())
    }

    /// `GET /torrents/info`, optionally filtered by hash
    pub(crate) async fn torrents(&self, hash: Option<&str>) -> Result<Vec<TorrentInfo>> {
        let query: Vec<(&str, &str)> = hash.map(|h| ("hashes", h)).into_iter().collect();
        Ok(self.get("torrents/info", &query).await?.json().await?)
    }

    /// `GET /torrents/files`
    pub(crate) async fn files(&self, hash: &str) -> Result<Vec<TorrentFile>> {
        match self.get("torrents/files", &[("hash", hash)]).await {
            Ok(response) => Ok(response.json().await?),
            Err(Error::Downloader(DownloaderError::Api { status: 404, .. })) => {
                Err(DownloaderError::NotFound(hash.to_string()).into())
            }
            Err(e) => Err(e),
        }
    }

    /// `POST /torrents/add`
    pub(crate) async fn add(&self, source: &AddSource, options: &AddOptions) -> Result<()> {
        let mut fields: Vec<(&str, String)> = Vec::new();
        if let Some(save_path) = &options.save_path {
            fields.push(("savepath", save_path.clone()));
        }
        if let Some(category) = &options.category {
            fields.push(("category", category.clone()));
        }
        if options.paused {
            // "paused" before v5, "stopped" from v5 on
            fields.push(("paused", "true".into()));
            fields.push(("stopped", "true".into()));
        }

        let request = self.http.post(self.endpoint("torrents/add"));
        let request = match source {
            AddSource::Url(link) => {
                fields.push(("urls", link.clone()));
                request.form(&fields)
            }
            AddSource::File { bytes, filename } => {
                let part = multipart::Part::bytes(bytes.clone())
                    .file_name(filename.clone())
                    .mime_str("application/x-bittorrent")?;
                let form = fields
                    .into_iter()
                    .fold(multipart::Form::new(), |form, (k, v)| form.text(k, v))
                    .part("torrents", part);
                request.multipart(form)
            }
        };

        let response = self.with_cookie(request).await.send().await?;
        let response = check(response).await?;
        let body = response.text().await.unwrap_or_default();
        if body.trim() == "Fails." {
            tracing::debug!("qBittorrent rejected add, torrent may already be present");
        }
        Ok(())
    }

    /// `POST /torrents/addTags`
    pub(crate) async fn add_tags(&self, hash: &str, tags: &[String]) -> Result<()> {
        let tags = tags.join(",");
        self.post_form("torrents/addTags", &[("hashes", hash), ("tags", &tags)])
            .await?;
        Ok(())
    }

    /// Pause, falling back to the v5 `stop` endpoint
    pub(crate) async fn pause(&self, hash: &str) -> Result<()> {
        self.post_with_fallback("torrents/pause", "torrents/stop", hash)
            .await
    }

    /// Resume, falling back to the v5 `start` endpoint
    pub(crate) async fn resume(&self, hash: &str) -> Result<()> {
        self.post_with_fallback("torrents/resume", "torrents/start", hash)
            .await
    }

    /// `POST /torrents/delete`
    pub(crate) async fn delete(&self, hash: &str, delete_files: bool) -> Result<()> {
        let delete_files = if delete_files { "true" } else { "false" };
        self.post_form(
            "torrents/delete",
            &[("hashes", hash), ("deleteFiles", delete_files)],
        )
        .await?;
        Ok(())
    }

    async fn post_with_fallback(&self, path: &str, fallback: &str, hash: &str) -> Result<()> {
        match self.post_form(path, &[("hashes", hash)]).await {
            Err(Error::Downloader(DownloaderError::Api { status: 404, .. })) => {
                self.post_form(fallback, &[("hashes", hash)]).await?;
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    /// Download a .torrent file, returning its bytes and a file name
    pub(crate) async fn fetch_torrent(&self, link: &str) -> Result<(Vec<u8>, String)> {
        let response = self.http.get(link).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, format!("fetch torrent file: {body}")));
        }

        let filename = torrent_filename(&response, link);
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::Other(format!("empty torrent file from {link}")));
        }
        Ok((bytes.to_vec(), filename))
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(api_error(status, body))
}

fn api_error(status: StatusCode, body: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DownloaderError::Auth(format!("session rejected ({})", status.as_u16())).into()
        }
        _ => DownloaderError::Api {
            status: status.as_u16(),
            message: body.trim().to_string(),
        }
        .into(),
    }
}

fn parse_sid(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name == SID_COOKIE && !value.is_empty()).then(|| value.to_string())
}

/// File name from Content-Disposition, else the last URL path segment
fn torrent_filename(response: &Response, link: &str) -> String {
    if let Some(value) = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
    {
        for part in value.split(';').map(str::trim) {
            if let Some(name) = part.strip_prefix("filename*=") {
                // charset'lang'encoded-filename
                if let Some(idx) = name.rfind('\'')
                    && let Ok(decoded) = urlencoding::decode(&name[idx + 1..])
                    && !decoded.is_empty()
                {
                    return decoded.into_owned();
                }
            } else if let Some(name) = part.strip_prefix("filename=") {
                let name = name.trim_matches('"');
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
    }

    if let Ok(url) = url::Url::parse(link)
        && let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        return last.to_string();
    }

    "download.torrent".to_string()
}
