//! Object-store client backed by [`object_store::ObjectStore`].
//!
//! [`ObjectStoreClient`] is a thin, cloneable wrapper around
//! `Arc<dyn ObjectStore>` with the operations the ingestion pipelines need.
//! Every public method is instrumented with [`tracing`].

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload};

use crate::{Error, Result};

mod output;

pub use output::{GetOutput, PutOutput};

/// Label attached to every error raised by this client.
const LABEL: &str = "object-store";

/// Cloneable handle to any [`ObjectStore`] backend.
///
/// All methods accept string keys and convert them to
/// [`object_store::path::Path`] internally.
#[derive(Clone, Debug)]
pub struct ObjectStoreClient(Arc<dyn ObjectStore>);

impl ObjectStoreClient {
    /// Wraps a concrete [`ObjectStore`] implementation.
    pub fn new(store: impl ObjectStore) -> Self {
        Self(Arc::new(store))
    }

    /// Wraps an already shared store.
    pub fn from_arc(store: Arc<dyn ObjectStore>) -> Self {
        Self(store)
    }

    /// Returns the underlying store.
    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.0
    }

    /// Verifies that the backing store is reachable.
    ///
    /// A not-found response for the probe key counts as reachable.
    #[tracing::instrument(name = "object.verify", skip(self))]
    pub async fn verify_reachable(&self) -> Result<()> {
        let path = Path::from("_yorutsuke_verify_probe");
        match self.0.head(&path).await {
            Ok(_) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(from_object_store(e)),
        }
    }

    /// Lists object metadata under `prefix`.
    #[tracing::instrument(name = "object.list", skip(self), fields(prefix))]
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Lazily streams object metadata under `prefix`.
    pub fn list_stream(&self, prefix: &str) -> BoxStream<'_, Result<ObjectMeta>> {
        let prefix = (!prefix.is_empty()).then(|| Path::from(prefix));
        self.0
            .list(prefix.as_ref())
            .map_err(from_object_store)
            .boxed()
    }

    /// Retrieves the bytes, content-type and metadata stored at `key`.
    #[tracing::instrument(name = "object.get", skip(self), fields(key))]
    pub async fn get(&self, key: &str) -> Result<GetOutput> {
        let path = Path::from(key);
        let result = self.0.get(&path).await.map_err(from_object_store)?;
        let meta = result.meta.clone();
        let content_type = result
            .attributes
            .get(&object_store::Attribute::ContentType)
            .map(|v| v.to_string());
        let data = result.bytes().await.map_err(from_object_store)?;

        Ok(GetOutput {
            data,
            content_type,
            meta,
        })
    }

    /// Streams the body stored at `key` chunk by chunk.
    ///
    /// The whole object is never buffered, so arbitrarily large result
    /// files can be consumed.
    #[tracing::instrument(name = "object.get_stream", skip(self), fields(key))]
    pub async fn get_stream(&self, key: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let path = Path::from(key);
        let result = self.0.get(&path).await.map_err(from_object_store)?;
        Ok(result.into_stream().map_err(from_object_store).boxed())
    }

    /// Uploads `data` to `key`, overwriting any existing object.
    pub async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<PutOutput> {
        self.put_opts(key, data, PutMode::Overwrite, content_type)
            .await
    }

    /// Uploads `data` to `key` with the specified [`PutMode`].
    #[tracing::instrument(name = "object.put_opts", skip(self, data), fields(key, size = data.len()))]
    pub async fn put_opts(
        &self,
        key: &str,
        data: Bytes,
        mode: PutMode,
        content_type: Option<&str>,
    ) -> Result<PutOutput> {
        let path = Path::from(key);
        let mut opts = PutOptions {
            mode,
            ..Default::default()
        };
        if let Some(ct) = content_type {
            opts.attributes
                .insert(object_store::Attribute::ContentType, ct.to_owned().into());
        }

        let result = self
            .0
            .put_opts(&path, PutPayload::from(data), opts)
            .await
            .map_err(from_object_store)?;
        Ok(result.into())
    }

    /// Gets object metadata without downloading the body.
    #[tracing::instrument(name = "object.head", skip(self), fields(key))]
    pub async fn head(&self, key: &str) -> Result<ObjectMeta> {
        let path = Path::from(key);
        self.0.head(&path).await.map_err(from_object_store)
    }

    /// Returns whether an object exists at `key`.
    #[tracing::instrument(name = "object.exists", skip(self), fields(key))]
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Deletes the object at `key`.
    #[tracing::instrument(name = "object.delete", skip(self), fields(key))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = Path::from(key);
        self.0.delete(&path).await.map_err(from_object_store)
    }

    /// Copies an object from `src` to `dst` within the same store.
    ///
    /// Overwrites `dst`; copying the same source twice is harmless.
    #[tracing::instrument(name = "object.copy", skip(self), fields(src, dst))]
    pub async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let from = Path::from(src);
        let to = Path::from(dst);
        self.0.copy(&from, &to).await.map_err(from_object_store)
    }
}

/// Converts an [`object_store::Error`] into a crate [`Error`].
fn from_object_store(err: object_store::Error) -> Error {
    if let object_store::Error::NotFound { path, .. } = &err {
        let key = path.clone();
        return Error::not_found(&key, LABEL).with_source(err);
    }

    let retryable = !matches!(
        err,
        object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. }
            | object_store::Error::AlreadyExists { .. }
            | object_store::Error::Precondition { .. }
            | object_store::Error::NotSupported { .. }
    );
    Error::runtime(err.to_string(), LABEL, retryable).with_source(err)
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use object_store::memory::InMemory;

    use super::*;

    fn test_client() -> ObjectStoreClient {
        ObjectStoreClient::new(InMemory::new())
    }

    #[tokio::test]
    async fn put_and_get() {
        let client = test_client();
        let data = Bytes::from("receipt bytes");
        client
            .put("uploads/owner-1/img.jpg", data.clone(), Some("image/jpeg"))
            .await
            .unwrap();

        let result = client.get("uploads/owner-1/img.jpg").await.unwrap();
        assert_eq!(result.data, data);
        assert_eq!(result.content_type_or_guess(), "image/jpeg");
    }

    #[tokio::test]
    async fn content_type_is_guessed_from_extension() {
        let client = test_client();
        client
            .put("uploads/owner-1/img.PNG", Bytes::from("x"), None)
            .await
            .unwrap();

        let result = client.get("uploads/owner-1/img.PNG").await.unwrap();
        assert_eq!(result.content_type_or_guess(), "image/png");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let client = test_client();
        let err = client.get("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_retryable());

        assert!(!client.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn copy_then_delete() {
        let client = test_client();
        client.put("src.bin", Bytes::from("copy me"), None).await.unwrap();
        client.copy("src.bin", "dst.bin").await.unwrap();
        client.delete("src.bin").await.unwrap();

        assert!(client.exists("dst.bin").await.unwrap());
        assert!(!client.exists("src.bin").await.unwrap());
    }

    #[tokio::test]
    async fn copy_of_missing_source_is_not_found() {
        let client = test_client();
        let err = client.copy("gone.bin", "dst.bin").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn get_stream_yields_whole_body() {
        let client = test_client();
        let body = "line one\nline two\n".repeat(100);
        client
            .put("batch-output/job/out.jsonl", Bytes::from(body.clone()), None)
            .await
            .unwrap();

        let chunks: Vec<Bytes> = client
            .get_stream("batch-output/job/out.jsonl")
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, body.as_bytes());
    }

    #[tokio::test]
    async fn list_under_prefix() {
        let client = test_client();
        for i in 0..3 {
            client
                .put(&format!("receipts/o/f{i}.jpg"), Bytes::from("x"), None)
                .await
                .unwrap();
        }
        client.put("uploads/o/f.jpg", Bytes::from("x"), None).await.unwrap();

        assert_eq!(client.list("receipts/").await.unwrap().len(), 3);
        assert_eq!(client.list("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn put_create_only() {
        let client = test_client();
        client
            .put_opts("unique.bin", Bytes::from("first"), PutMode::Create, None)
            .await
            .unwrap();

        let err = client
            .put_opts("unique.bin", Bytes::from("second"), PutMode::Create, None)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn verify_reachable() {
        test_client().verify_reachable().await.unwrap();
    }
}
