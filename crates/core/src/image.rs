//! Optimized image derivatives.

use crate::upload::UploadId;
use serde::{Deserialize, Serialize};

/// Why an image upload needs derivatives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// Embedded in at least one post body.
    Post,
    /// Used as a user avatar.
    Avatar,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Avatar => "avatar",
        }
    }
}

/// A generated image variant stored next to the original.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivative {
    pub width: u32,
    pub height: u32,
    /// Object key inside the store.
    pub key: String,
    pub filesize: u64,
    /// Problems found while generating this variant. A derivative with errors
    /// is never recorded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// All derivatives generated for one upload. Written once, never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptimizedImage {
    pub upload_id: UploadId,
    pub derivatives: Vec<Derivative>,
}

impl OptimizedImage {
    pub fn derivatives_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.derivatives)?)
    }

    pub fn from_json(upload_id: UploadId, json: &str) -> crate::Result<Self> {
        Ok(Self {
            upload_id,
            derivatives: serde_json::from_str(json)?,
        })
    }
}
