//! Outputs of [`ObjectStoreClient`](super::ObjectStoreClient) reads and writes.

use bytes::Bytes;
use object_store::ObjectMeta;

/// Result of a successful [`ObjectStoreClient::get`](super::ObjectStoreClient::get) call.
#[derive(Debug)]
pub struct GetOutput {
    /// Raw bytes of the retrieved object.
    pub data: Bytes,
    /// MIME content-type, if the backend provides one.
    pub content_type: Option<String>,
    /// Object metadata (size, etag, last_modified, location).
    pub meta: ObjectMeta,
}

impl GetOutput {
    /// Returns the content-type, guessing from the key when the backend has none.
    pub fn content_type_or_guess(&self) -> String {
        if let Some(content_type) = &self.content_type {
            return content_type.clone();
        }

        let key = self.meta.location.as_ref().to_ascii_lowercase();
        let guessed = match key.rsplit_once('.').map(|(_, ext)| ext) {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            Some("heic") => "image/heic",
            Some("pdf") => "application/pdf",
            _ => "image/jpeg",
        };
        guessed.to_owned()
    }
}

/// Result of a successful put.
#[derive(Debug, Clone, Default)]
pub struct PutOutput {
    /// Entity tag of the written object, if the backend reports one.
    pub e_tag: Option<String>,
    /// Object version, if the backend is versioned.
    pub version: Option<String>,
}

impl From<object_store::PutResult> for PutOutput {
    fn from(result: object_store::PutResult) -> Self {
        Self {
            e_tag: result.e_tag,
            version: result.version,
        }
    }
}
