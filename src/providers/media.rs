use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use url::Url;

use super::traits::MediaBackend;
use super::types::ProviderError;
use super::util::{ensure_success, with_bearer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/",
            MediaKind::Video => "video/",
        }
    }
}

/// Open option bag serialized as query parameters (width, height, seed,
/// nologo, quality, image, duration, aspectRatio, audio, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaOptions(BTreeMap<String, String>);

impl MediaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Clone)]
pub struct MediaRequest {
    pub kind: MediaKind,
    pub prompt: String,
    pub model: String,
    pub options: MediaOptions,
    pub api_key: String,
}

impl std::fmt::Debug for MediaRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaRequest")
            .field("kind", &self.kind)
            .field("prompt", &self.prompt)
            .field("model", &self.model)
            .field("options", &self.options)
            .field("api_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MediaBlob {
    /// Shareable URL of the generated asset (no credentials in it).
    pub url: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Media generation over plain GET endpoints: `<base>/<encoded prompt>?model=..&opt=..`.
pub struct PollinationsMediaBackend {
    client: Client,
    image_base_url: String,
    video_base_url: String,
}

impl PollinationsMediaBackend {
    pub fn new(
        image_base_url: impl Into<String>,
        video_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self {
            client,
            image_base_url: image_base_url.into(),
            video_base_url: video_base_url.into(),
        }
    }

    pub fn build_url(&self, request: &MediaRequest) -> Result<Url, ProviderError> {
        let base = match request.kind {
            MediaKind::Image => &self.image_base_url,
            MediaKind::Video => &self.video_base_url,
        };
        let mut url = Url::parse(base)
            .map_err(|e| ProviderError::RequestFailed(format!("Invalid endpoint {}: {}", base, e)))?;

        url.path_segments_mut()
            .map_err(|_| ProviderError::RequestFailed(format!("Endpoint cannot take a path: {}", base)))?
            .pop_if_empty()
            .push(&request.prompt);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("model", &request.model);
            for (key, value) in request.options.iter() {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl MediaBackend for PollinationsMediaBackend {
    async fn generate(&self, request: MediaRequest) -> Result<MediaBlob, ProviderError> {
        let url = self.build_url(&request)?;
        tracing::debug!("Requesting {:?} generation with model {}", request.kind, request.model);

        let response = with_bearer(self.client.get(url.clone()), &request.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
        let response = ensure_success(response).await?;

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let expected = request.kind.mime_prefix();
        if !mime_type.starts_with(expected) {
            return Err(ProviderError::UnexpectedMediaType {
                expected: expected.to_string(),
                actual: mime_type,
            });
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        Ok(MediaBlob {
            url: url.to_string(),
            mime_type,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request(kind: MediaKind) -> MediaRequest {
        MediaRequest {
            kind,
            prompt: "a cat/dog?".to_string(),
            model: "flux".to_string(),
            options: MediaOptions::new().set("width", 512).set("nologo", true),
            api_key: String::new(),
        }
    }

    fn backend(server: &MockServer) -> PollinationsMediaBackend {
        PollinationsMediaBackend::new(
            format!("{}/prompt", server.uri()),
            format!("{}/video", server.uri()),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_prompt_is_path_encoded() {
        let backend = PollinationsMediaBackend::new(
            "https://media.example/prompt/",
            "https://media.example/video",
            Duration::from_secs(1),
        );
        let url = backend.build_url(&request(MediaKind::Image)).unwrap();
        assert_eq!(url.path(), "/prompt/a%20cat%2Fdog%3F");
        assert_eq!(url.query(), Some("model=flux&nologo=true&width=512"));
    }

    #[tokio::test]
    async fn test_image_generation_validates_mime() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prompt/a%20cat%2Fdog%3F"))
            .and(query_param("width", "512"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89, 0x50], "image/png"))
            .mount(&server)
            .await;

        let blob = backend(&server)
            .generate(request(MediaKind::Image))
            .await
            .unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.data.len(), 2);
    }

    #[tokio::test]
    async fn test_wrong_mime_is_an_error_despite_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("oops", "text/html"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate(request(MediaKind::Video))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedMediaType { .. }));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate(request(MediaKind::Image))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
