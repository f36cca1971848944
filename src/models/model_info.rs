use serde::Deserialize;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One entry of the model server's local catalog (`GET /api/tags`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(rename = "size", default)]
    pub size_bytes: Option<u64>,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>, size_bytes: Option<u64>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
        }
    }

    /// Size in gigabytes (base 1024), if the server reported a non-zero size.
    pub fn size_gb(&self) -> Option<f64> {
        self.size_bytes
            .filter(|size| *size > 0)
            .map(|size| size as f64 / BYTES_PER_GB)
    }
}
