use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use bundle_import::ModelBundle;
use crate::Error;

/// Sidecar describing how to feed the exported graph and read its output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceMeta {
    pub feature_names: Vec<String>,
    pub use_log_target: bool
}

impl OccurrenceMeta {
    pub fn from_bundle(bundle: &ModelBundle) -> Self {
        Self {
            feature_names: bundle.feature_names.clone(),
            use_log_target: bundle.use_log_target
        }
    }

    pub fn to_pretty_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The same facts as `(key, value)` pairs for the graph's `metadata_props`.
    pub fn to_metadata_props(&self) -> Result<Vec<(String, String)>, Error> {
        Ok(vec![
            ("feature_names".to_string(), serde_json::to_string(&self.feature_names)?),
            ("use_log_target".to_string(), self.use_log_target.to_string()),
        ])
    }
}

/// Writes the graph and sidecar files into one directory, replacing earlier copies.
pub struct ArtifactWriter {
    dir: PathBuf
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.dir).map_err(|source| Error::Io { path: self.dir.clone(), source })
    }

    pub fn write(&self, file_name: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf, Error> {
        let path = self.dir.join(file_name);
        fs::write(&path, contents.as_ref()).map_err(|source| Error::Io { path: path.clone(), source })?;
        log::debug!("Wrote {} bytes to {}", contents.as_ref().len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_json_uses_two_space_indent_and_keeps_order() {
        let meta = OccurrenceMeta {
            feature_names: vec!["zeta".to_string(), "alpha".to_string()],
            use_log_target: true
        };
        assert_eq!(
            meta.to_pretty_json().unwrap(),
            "{\n  \"feature_names\": [\n    \"zeta\",\n    \"alpha\"\n  ],\n  \"use_log_target\": true\n}"
        );
    }

    #[test]
    fn metadata_props_encode_features_as_json() {
        let meta = OccurrenceMeta { feature_names: vec!["a".to_string()], use_log_target: false };
        assert_eq!(meta.to_metadata_props().unwrap(), vec![
            ("feature_names".to_string(), "[\"a\"]".to_string()),
            ("use_log_target".to_string(), "false".to_string()),
        ]);
    }

    #[test]
    fn writer_creates_nested_dirs_and_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(root.path().join("a/b/c"));
        writer.ensure_dir().unwrap();
        writer.ensure_dir().unwrap();
        let path = writer.write("x.bin", b"first version").unwrap();
        writer.write("x.bin", b"v2").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"v2");
    }
}
