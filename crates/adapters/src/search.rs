use reqwest::blocking::Client;
use serde::Deserialize;

use book_core::{ImageSourceError, StockImageSearch};

use crate::base_url::resolve_base_url;
use crate::error::AdapterError;
use crate::llm::{build_client, ensure_success};

const LEXICA_SEARCH_URL: &str = "https://lexica.art/api/v1/search";

/// Lexica-style search endpoint: `GET {url}?q=...` returning `images[].src`.
pub struct LexicaSearch {
    client: Client,
    url: String,
}

impl LexicaSearch {
    pub fn new(url: &str, timeout: u64) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: resolve_base_url(url, LEXICA_SEARCH_URL),
        })
    }

    fn send(&self, query: &str) -> Result<Vec<String>, AdapterError> {
        let response = self.client.get(&self.url).query(&[("q", query)]).send()?;
        let parsed: SearchResponse = ensure_success(response)?.json()?;
        Ok(image_sources(parsed))
    }
}

impl StockImageSearch for LexicaSearch {
    fn search(&self, query: &str) -> Result<Vec<String>, ImageSourceError> {
        Ok(self.send(query)?)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    images: Vec<SearchImage>,
}

#[derive(Debug, Deserialize)]
struct SearchImage {
    #[serde(default)]
    src: Option<String>,
}

fn image_sources(response: SearchResponse) -> Vec<String> {
    response
        .images
        .into_iter()
        .filter_map(|image| image.src)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_keep_result_order() {
        let body = r#"{"images":[{"id":"1"},{"src":"https://a/1.jpg"},{"src":"https://a/2.jpg"}]}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(image_sources(parsed), ["https://a/1.jpg", "https://a/2.jpg"]);
    }

    #[test]
    fn missing_images_field_is_empty() {
        let parsed: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(image_sources(parsed).is_empty());
    }
}
