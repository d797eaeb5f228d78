use crate::config::Credential;
use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

/// Printed in place of a quote when the API turns the request down.
pub const ERROR_MARKER: &str = "Error:";

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct Quote {
    pub quote: String,
    pub author: Option<String>,
    pub category: Option<String>,
}

impl Quote {
    pub fn attributed(&self) -> String {
        match &self.author {
            Some(author) => format!("\"{}\" ~{}", self.quote, author),
            None => format!("\"{}\"", self.quote),
        }
    }
}

#[async_trait]
pub trait QuoteSource {
    async fn random_quote(&self, category: &str) -> Result<Quote, FetchError>;
}

pub struct QuoteFetcher {
    http: Client,
    base_url: String,
    credential: Credential,
}

impl QuoteFetcher {
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Self {
        QuoteFetcher {
            http: Client::new(),
            base_url: base_url.into(),
            credential,
        }
    }
}

#[async_trait]
impl QuoteSource for QuoteFetcher {
    async fn random_quote(&self, category: &str) -> Result<Quote, FetchError> {
        let request = self
            .http
            .get(&self.base_url)
            .query(&[("category", category)])
            .header("X-Api-Key", self.credential.as_str())
            .build()?;
        tracing::debug!("GET {}", request.url());

        let response = self.http.execute(request).await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Rejected(status));
        }

        let body = response.text().await?;
        tracing::debug!("API response: {}", body);
        let quotes: Vec<Quote> = serde_json::from_str(&body)?;
        let quote = quotes.into_iter().next().ok_or(FetchError::Empty)?;
        tracing::debug!("Got quote by {:?} in {:?}", quote.author, quote.category);
        Ok(quote)
    }
}

async fn fetch_line<S, F>(source: &S, category: &str, render: F) -> Result<String, FetchError>
where
    S: QuoteSource + Sync + ?Sized,
    F: FnOnce(Quote) -> String,
{
    match source.random_quote(category).await {
        Ok(quote) => Ok(render(quote)),
        Err(e) if e.is_rejection() => {
            tracing::error!("{}", e);
            Ok(ERROR_MARKER.into())
        }
        Err(e) => Err(e),
    }
}

/// The quote text for `category`, or [`ERROR_MARKER`] if the API refused.
/// Broken responses and transport failures are returned as errors.
pub async fn fetch_quote<S>(source: &S, category: &str) -> Result<String, FetchError>
where
    S: QuoteSource + Sync + ?Sized,
{
    fetch_line(source, category, |quote| quote.quote).await
}

/// Like [`fetch_quote`], rendered as `"<quote>" ~<author>`.
pub async fn fetch_attributed_quote<S>(source: &S, category: &str) -> Result<String, FetchError>
where
    S: QuoteSource + Sync + ?Sized,
{
    fetch_line(source, category, |quote| quote.attributed()).await
}
