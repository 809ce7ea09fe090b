use std::{
    net::IpAddr,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use common::{error::AppError, utils::config::AppConfig};
use reqwest::{header::CONTENT_TYPE, redirect};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{info, warn};
use url::{Host, Url};

/// Content types accepted for source images.
pub const ALLOWED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/jpg"];

/// Same ceiling reqwest applies by default.
const MAX_REDIRECTS: usize = 10;

/// Some image hosts refuse requests without a browser-like agent.
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// A downloaded source image that has been checked to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub path: PathBuf,
    pub content_type: String,
    pub bytes: u64,
    pub width: u32,
    pub height: u32,
}

pub struct Fetcher {
    client: reqwest::Client,
    max_bytes: u64,
    allow_private_sources: bool,
}

impl Fetcher {
    pub fn new(
        timeout: Duration,
        max_bytes: u64,
        allow_private_sources: bool,
    ) -> Result<Self, AppError> {
        let client = client_builder(timeout, allow_private_sources).build()?;
        Ok(Self {
            client,
            max_bytes,
            allow_private_sources,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            config.fetch_timeout(),
            config.fetch_max_bytes,
            config.allow_private_sources,
        )
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Download `url` into `dest`, enforcing the type allow-list and the size
    /// ceiling, then make sure the result decodes.
    ///
    /// On any error a partially written `dest` is removed.
    pub async fn fetch(&self, url: &Url, dest: &Path) -> Result<SourceImage, AppError> {
        if !self.allow_private_sources {
            ensure_source_url_allowed(url)?;
        }

        let started = Instant::now();
        let result = self.download(url, dest).await;
        let result = match result {
            Ok((content_type, bytes)) => decode_check(dest)
                .await
                .map(|(width, height)| SourceImage {
                    path: dest.to_path_buf(),
                    content_type,
                    bytes,
                    width,
                    height,
                }),
            Err(err) => Err(err),
        };

        match result {
            Ok(image) => {
                info!(
                    %url,
                    bytes = image.bytes,
                    width = image.width,
                    height = image.height,
                    content_type = %image.content_type,
                    elapsed_ms = started.elapsed().as_millis(),
                    "source image downloaded"
                );
                Ok(image)
            }
            Err(err) => {
                if let Err(remove_err) = tokio::fs::remove_file(dest).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %dest.display(), error = %remove_err, "failed to remove partial download");
                    }
                }
                Err(err)
            }
        }
    }

    async fn download(&self, url: &Url, dest: &Path) -> Result<(String, u64), AppError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| {
                if err.is_redirect() {
                    AppError::Validation(format!("input_url redirect refused: {err}"))
                } else {
                    AppError::Fetch(format!("failed to download {url}: {err}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!(
                "failed to download {url}: HTTP {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<mime::Mime>().ok())
            .map(|mime| mime.essence_str().to_ascii_lowercase())
            .ok_or_else(|| {
                AppError::InvalidContentType("response has no usable Content-Type".to_string())
            })?;
        if !ALLOWED_IMAGE_TYPES.contains(&content_type.as_str()) {
            return Err(AppError::InvalidContentType(format!(
                "{content_type} is not one of {}",
                ALLOWED_IMAGE_TYPES.join(", ")
            )));
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "declared size {declared} bytes exceeds limit of {} bytes",
                    self.max_bytes
                )));
            }
        }

        let mut file = File::create(dest).await.map_err(|err| {
            AppError::Workspace(format!("failed to create {}: {err}", dest.display()))
        })?;
        let mut written: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| AppError::Fetch(format!("download of {url} interrupted: {err}")))?
        {
            written = written.saturating_add(chunk.len() as u64);
            if written > self.max_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "body exceeds limit of {} bytes",
                    self.max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok((content_type, written))
    }
}

/// Every redirect hop is held to the same source policy as `input_url`.
fn client_builder(timeout: Duration, allow_private_sources: bool) -> reqwest::ClientBuilder {
    let policy = redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !allow_private_sources && ensure_source_url_allowed(attempt.url()).is_err() {
            attempt.error("redirect target is not an allowed source")
        } else {
            attempt.follow()
        }
    });

    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(policy)
}

async fn decode_check(path: &Path) -> Result<(u32, u32), AppError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let image = image::ImageReader::open(&path)
            .and_then(image::ImageReader::with_guessed_format)
            .map_err(|err| AppError::InvalidImage(err.to_string()))?
            .decode()
            .map_err(|err| AppError::InvalidImage(format!("image could not be decoded: {err}")))?;
        Ok((image.width(), image.height()))
    })
    .await?
}

/// Only public http(s) hosts are fetched by default; loopback and private
/// ranges would let callers probe the runner's own network.
pub fn ensure_source_url_allowed(url: &Url) -> Result<(), AppError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            warn!(%url, %scheme, "rejected source URL due to unsupported scheme");
            return Err(AppError::Validation(
                "input_url must use http or https".to_string(),
            ));
        }
    }

    let ip = match url.host() {
        None => {
            warn!(%url, "rejected source URL missing host");
            return Err(AppError::Validation(
                "input_url is missing a host component".to_string(),
            ));
        }
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.');
            if domain.eq_ignore_ascii_case("localhost")
                || domain.to_ascii_lowercase().ends_with(".localhost")
            {
                warn!(%url, host = domain, "rejected source URL to localhost");
                return Err(AppError::Validation(
                    "input_url host is not allowed".to_string(),
                ));
            }
            return Ok(());
        }
        Some(Host::Ipv4(v4)) => IpAddr::V4(v4),
        // ::ffff:a.b.c.d reaches the IPv4 host, so classify it as one.
        Some(Host::Ipv6(v6)) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
    };

    let is_disallowed = match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_broadcast(),
        IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
    };
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || is_disallowed {
        warn!(%url, %ip, "rejected source URL pointing to restricted network range");
        return Err(AppError::Validation(
            "input_url host is not allowed".to_string(),
        ));
    }

    Ok(())
}
