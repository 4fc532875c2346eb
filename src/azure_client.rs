// src/azure_client.rs
//
// AzureBlobContainer: BlobContainer over an Azure Storage block-blob
// container (feature "azure"). Authenticates through the default credential
// chain (env, managed identity, CLI), cached once per process.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::trace;

use azure_core::credentials::TokenCredential;
use azure_core::error::ErrorKind;
use azure_core::http::{Body, NoFormat, RequestContent, StatusCode};
use azure_identity::DefaultAzureCredential;

use azure_storage_blob::clients::{
    BlobClient, BlobClientOptions, BlobContainerClient, BlobContainerClientOptions,
};
use azure_storage_blob::models::{
    BlobClientDownloadOptions, BlobContainerClientListBlobFlatSegmentOptions,
    BlockBlobClientCommitBlockListOptions, BlockBlobClientStageBlockOptions, BlockLookupList,
    ListBlobsFlatSegmentResponse,
};

use crate::blob_store::{BlobByteStream, BlobContainer, BlobListing, DeleteOutcome};
use crate::error::StoreError;

static AZURE_CREDENTIAL: OnceCell<Arc<dyn TokenCredential>> = OnceCell::const_new();

async fn default_credential() -> Result<Arc<dyn TokenCredential>, StoreError> {
    AZURE_CREDENTIAL
        .get_or_try_init(|| async {
            let credential: Arc<dyn TokenCredential> =
                DefaultAzureCredential::new().map_err(map_azure_err)?;
            Ok::<_, StoreError>(credential)
        })
        .await
        .cloned()
}

/// Sort an SDK error into the retry classes the reader understands.
fn map_azure_err(e: azure_core::Error) -> StoreError {
    if let Some(status) = e.http_status() {
        return match status {
            StatusCode::NotFound => StoreError::NotFound(e.to_string()),
            StatusCode::TooManyRequests
            | StatusCode::InternalServerError
            | StatusCode::BadGateway
            | StatusCode::ServiceUnavailable
            | StatusCode::GatewayTimeout => StoreError::Transient(e.to_string()),
            _ => StoreError::Protocol(e.to_string()),
        };
    }
    match e.kind() {
        ErrorKind::Io => StoreError::StreamBroken(e.to_string()),
        _ => StoreError::Other(anyhow::Error::new(e)),
    }
}

pub struct AzureBlobContainer {
    account_url: String,
    container: String,
    credential: Arc<dyn TokenCredential>,
}

impl AzureBlobContainer {
    /// Public endpoint for an account name.
    pub fn account_url_from_account(account: &str) -> String {
        format!("https://{}.blob.core.windows.net", account)
    }

    /// Azurite emulator endpoint, e.g. http://127.0.0.1:10000/devstoreaccount1
    pub fn azurite_url(host: &str, port: u16, account: &str) -> String {
        format!("http://{}:{}/{}", host, port, account)
    }

    pub async fn connect(account: &str, container: &str) -> Result<Self, StoreError> {
        Self::connect_url(&Self::account_url_from_account(account), container).await
    }

    /// Same, for a full endpoint URL (emulator or private endpoint).
    pub async fn connect_url(account_url: &str, container: &str) -> Result<Self, StoreError> {
        Ok(Self {
            account_url: account_url.to_string(),
            container: container.to_string(),
            credential: default_credential().await?,
        })
    }

    fn container_client(&self) -> Result<BlobContainerClient, StoreError> {
        BlobContainerClient::new(
            &self.account_url,
            self.container.clone(),
            self.credential.clone(),
            Some(BlobContainerClientOptions::default()),
        )
        .map_err(map_azure_err)
    }

    fn blob_client(&self, blob: &str) -> Result<BlobClient, StoreError> {
        BlobClient::new(
            &self.account_url,
            self.container.clone(),
            blob.to_string(),
            self.credential.clone(),
            Some(BlobClientOptions::default()),
        )
        .map_err(map_azure_err)
    }
}

#[async_trait]
impl BlobContainer for AzureBlobContainer {
    fn container_name(&self) -> &str {
        &self.container
    }

    async fn list_blobs(
        &self,
        prefix: &str,
        page_size_hint: Option<u32>,
    ) -> Result<Vec<BlobListing>, StoreError> {
        let container = self.container_client()?;
        let mut opts = BlobContainerClientListBlobFlatSegmentOptions::default();
        if !prefix.is_empty() {
            opts.prefix = Some(prefix.to_string());
        }
        opts.maxresults = page_size_hint.map(|n| n as i32);

        let mut pager = container.list_blobs(Some(opts)).map_err(map_azure_err)?;
        let limit = page_size_hint.map_or(usize::MAX, |n| n as usize);
        let mut out = Vec::new();

        // A page hint bounds the request; the first page is all the caller wants.
        while let Some(next) = pager.next().await {
            let body: ListBlobsFlatSegmentResponse =
                next.map_err(map_azure_err)?.into_body().await.map_err(map_azure_err)?;
            for it in body.segment.blob_items {
                let size = it.properties.as_ref().and_then(|p| p.content_length).unwrap_or(0);
                if let Some(name) = it.name.and_then(|bn| bn.content) {
                    out.push(BlobListing { name, size });
                }
            }
            if out.len() >= limit {
                out.truncate(limit);
                break;
            }
        }
        Ok(out)
    }

    async fn get_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<BlobByteStream, StoreError> {
        if length == 0 {
            return Ok(Box::pin(futures::stream::empty::<Result<Bytes, StoreError>>()));
        }
        let blob = self.blob_client(key)?;
        let opts = BlobClientDownloadOptions {
            range: Some(format!("bytes={}-{}", offset, offset + length - 1)),
            ..Default::default()
        };
        trace!("azure GET {}/{} range {}+{}", self.container, key, offset, length);

        let resp = blob.download(Some(opts)).await.map_err(map_azure_err)?;
        let body = resp.into_raw_body().map_err(map_azure_err);
        Ok(Box::pin(body))
    }

    async fn stage_block(
        &self,
        key: &str,
        block_id: &str,
        payload: Bytes,
    ) -> Result<(), StoreError> {
        let bb = self.blob_client(key)?.block_blob_client();
        let content_len = payload.len() as u64;
        let body: RequestContent<Bytes, NoFormat> = Body::from(payload).into();
        bb.stage_block(
            block_id.as_bytes(),
            content_len,
            body,
            Some(BlockBlobClientStageBlockOptions::default()),
        )
        .await
        .map_err(map_azure_err)?;
        Ok(())
    }

    async fn commit_block_list(&self, key: &str, block_ids: &[String]) -> Result<(), StoreError> {
        let bb = self.blob_client(key)?.block_blob_client();
        let lookup = BlockLookupList {
            committed: None,
            latest: Some(block_ids.iter().map(|id| id.as_bytes().to_vec()).collect()),
            uncommitted: None,
        };
        bb.commit_block_list(
            lookup.try_into().map_err(map_azure_err)?,
            Some(BlockBlobClientCommitBlockListOptions::default()),
        )
            .await
            .map_err(map_azure_err)?;
        Ok(())
    }

    async fn delete_blob(&self, key: &str) -> Result<DeleteOutcome, StoreError> {
        let blob = self.blob_client(key)?;
        match blob.delete(None).await {
            Ok(_) => Ok(DeleteOutcome { deleted: true }),
            Err(e) if e.http_status() == Some(StatusCode::NotFound) => {
                Ok(DeleteOutcome { deleted: false })
            }
            Err(e) => Err(map_azure_err(e)),
        }
    }
}
