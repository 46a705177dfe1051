/*!
*   External fetcher seam
*
*   The core never opens sockets itself; retrieving `did.jsonl` or
*   `did-witness.json` goes through [`ProofFetcher`]. A reqwest-backed
*   implementation ships behind the `network` feature.
*/

use crate::{WebVhError, witness::WitnessProofEntry};
use async_trait::async_trait;
use url::Url;

/// Retrieval of DID logs and witness proof files.
#[async_trait]
pub trait ProofFetcher: Send + Sync {
    /// Fetch the raw newline-delimited DID log.
    async fn fetch_log(&self, url: &Url) -> Result<String, WebVhError>;

    /// Fetch and parse the witness proof file.
    async fn fetch_witness_proofs(&self, url: &Url)
    -> Result<Vec<WitnessProofEntry>, WebVhError>;
}

/// HTTP fetcher over a shared reqwest client.
#[cfg(feature = "network")]
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "network")]
impl HttpFetcher {
    pub fn with_client(client: reqwest::Client) -> Self {
        HttpFetcher { client }
    }

    async fn download(&self, url: &Url) -> Result<String, WebVhError> {
        self.client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| WebVhError::External(format!("url ({url}): {e}")))?
            .error_for_status()
            .map_err(|e| WebVhError::External(format!("url ({url}): {e}")))?
            .text()
            .await
            .map_err(|e| {
                WebVhError::External(format!("url ({url}): failed to read response: {e}"))
            })
    }
}

#[cfg(feature = "network")]
#[async_trait]
impl ProofFetcher for HttpFetcher {
    async fn fetch_log(&self, url: &Url) -> Result<String, WebVhError> {
        self.download(url).await
    }

    async fn fetch_witness_proofs(
        &self,
        url: &Url,
    ) -> Result<Vec<WitnessProofEntry>, WebVhError> {
        let text = self.download(url).await?;
        crate::witness::parse_witness_proofs(&text)
    }
}
