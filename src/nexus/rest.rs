//! Per-file download links from the REST v1 API.

use super::{map_status, NexusClient};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One time-limited download link, in server preference order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLink {
    pub name: String,
    pub short_name: String,
    pub uri: String,
}

impl NexusClient {
    /// Fetch the download links for one mod file. Non-premium credentials
    /// are rejected upstream with 403, surfaced as `PremiumRequired`.
    pub async fn get_download_links(
        &self,
        game_domain: &str,
        mod_id: i64,
        file_id: i64,
        cancel: &CancelToken,
    ) -> Result<Vec<DownloadLink>> {
        let url = format!(
            "{}/games/{}/mods/{}/files/{}/download_link.json",
            self.rest_base(),
            game_domain,
            mod_id,
            file_id
        );

        #[derive(Deserialize)]
        struct LinkInfo {
            name: String,
            #[serde(rename = "short_name")]
            short_name: String,
            #[serde(rename = "URI")]
            uri: String,
        }

        self.retry()
            .run(cancel, || async {
                let response = self.send(self.http().get(&url), cancel).await?;

                let status = response.status();
                if status.as_u16() == 403 {
                    return Err(Error::PremiumRequired);
                }
                if !status.is_success() {
                    return Err(map_status(
                        status.as_u16(),
                        &format!("mod {} file {}", mod_id, file_id),
                    ));
                }

                let links: Vec<LinkInfo> = response.json().await?;
                Ok(links
                    .into_iter()
                    .map(|l| DownloadLink {
                        name: l.name,
                        short_name: l.short_name,
                        uri: l.uri,
                    })
                    .collect())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::nexus::StaticCredential;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unreachable_endpoint_surfaces_http_error() {
        let config = Config {
            max_retries: 0,
            ..Config::default()
        };
        let client = NexusClient::new(Arc::new(StaticCredential::new("key")), &config)
            .unwrap()
            .with_endpoints(
                "http://127.0.0.1:9/graphql".to_string(),
                "http://127.0.0.1:9/v1".to_string(),
            );

        let err = client
            .get_download_links("skyrimspecialedition", 1, 2, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let config = Config::default();
        let client = NexusClient::new(Arc::new(StaticCredential::new("key")), &config).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();

        let err = client
            .get_download_links("skyrimspecialedition", 1, 2, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
