use super::{ObjectClient, ObjectStoreError, ObjectUploader};
use crate::provider::EntryReader;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use tokio::io::AsyncReadExt;

/// Size of each multipart upload part. Also the most an upload buffers.
const PART_SIZE: usize = 8 * 1024 * 1024;

type StoreResult<T> = std::result::Result<T, ObjectStoreError>;

/// [`ObjectClient`] and [`ObjectUploader`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct SdkObjectStore {
    client: Client,
}

impl SdkObjectStore {
    /// Build a client from the default credential and region chain.
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(Client::new(&config))
    }

    /// Wrap an existing SDK client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn read_part(body: &mut EntryReader, part_size: usize) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(part_size);
    body.take(part_size as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(ObjectStoreError::Body)?;
    Ok(buf)
}

fn classify<E, R>(err: SdkError<E, R>) -> ObjectStoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.code() {
        Some(code) => ObjectStoreError::Api {
            code: code.to_string(),
            message: err.message().unwrap_or_default().to_string(),
        },
        None => ObjectStoreError::Transport(DisplayErrorContext(&err).to_string()),
    }
}

#[async_trait]
impl ObjectClient for SdkObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<EntryReader> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify)?;
        Ok(Box::pin(output.body.into_async_read()))
    }
}

/// One uploaded part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UploadedPart {
    number: i32,
    e_tag: Option<String>,
}

/// The object store calls an upload is made of.
#[async_trait]
trait MultipartStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StoreResult<()>;
    async fn create(&self, bucket: &str, key: &str) -> StoreResult<String>;
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: i32,
        body: Vec<u8>,
    ) -> StoreResult<Option<String>>;
    async fn complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> StoreResult<()>;
    async fn abort(&self, bucket: &str, key: &str, upload_id: &str) -> StoreResult<()>;
}

/// Upload `body`, in one request when it fits in a part and as a multipart
/// upload otherwise. A multipart upload that fails at any step is aborted.
async fn upload_with<S: MultipartStore + ?Sized>(
    store: &S,
    bucket: &str,
    key: &str,
    mut body: EntryReader,
    part_size: usize,
) -> StoreResult<()> {
    let first = read_part(&mut body, part_size).await?;
    if first.len() < part_size {
        return store.put(bucket, key, first).await;
    }

    let upload_id = store.create(bucket, key).await?;
    let result = async {
        let parts = upload_parts(store, bucket, key, &upload_id, first, &mut body, part_size).await?;
        store.complete(bucket, key, &upload_id, parts).await
    }
    .await;

    if result.is_err()
        && let Err(abort) = store.abort(bucket, key, &upload_id).await
    {
        tracing::warn!(key, error = %abort, "Failed to abort multipart upload");
    }
    result
}

async fn upload_parts<S: MultipartStore + ?Sized>(
    store: &S,
    bucket: &str,
    key: &str,
    upload_id: &str,
    first: Vec<u8>,
    body: &mut EntryReader,
    part_size: usize,
) -> StoreResult<Vec<UploadedPart>> {
    let mut parts = Vec::new();
    let mut part = first;
    let mut number: i32 = 1;
    loop {
        let size = part.len();
        let e_tag = store.upload_part(bucket, key, upload_id, number, part).await?;
        tracing::trace!(key, part = number, size, "Uploaded part");
        parts.push(UploadedPart { number, e_tag });

        part = read_part(body, part_size).await?;
        if part.is_empty() {
            return Ok(parts);
        }
        number += 1;
    }
}

#[async_trait]
impl MultipartStore for SdkObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StoreResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create(&self, bucket: &str, key: &str) -> StoreResult<String> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify)?;
        created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| ObjectStoreError::Transport("multipart upload has no id".into()))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: i32,
        body: Vec<u8>,
    ) -> StoreResult<Option<String>> {
        let response = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(classify)?;
        Ok(response.e_tag().map(str::to_string))
    }

    async fn complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> StoreResult<()> {
        let parts = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .set_e_tag(part.e_tag)
                    .part_number(part.number)
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn abort(&self, bucket: &str, key: &str, upload_id: &str) -> StoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl ObjectUploader for SdkObjectStore {
    async fn upload(&self, bucket: &str, key: &str, body: EntryReader) -> StoreResult<()> {
        upload_with(self, bucket, key, body, PART_SIZE).await
    }
}
