//! Build-context assembly shared by the preprocessing strategies.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tar::{Builder as TarBuilder, Header, HeaderMode};
use walkdir::WalkDir;

use crate::error::PreprocessError;

/// Files a preprocessor ships, and where they land in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFiles {
    path_prefix: String,
    /// Local files or directories copied under the prefix.
    pub input_files: Vec<PathBuf>,
    /// Explicit local path → container path entries.
    pub output_map: BTreeMap<PathBuf, String>,
}

impl ContextFiles {
    /// Creates an empty file set rooted at `path_prefix`.
    pub fn new(path_prefix: impl Into<String>) -> Self {
        let mut path_prefix = path_prefix.into();
        if !path_prefix.ends_with('/') {
            path_prefix.push('/');
        }
        Self {
            path_prefix,
            input_files: Vec::new(),
            output_map: BTreeMap::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.input_files = inputs;
        self
    }

    pub fn with_output_map(mut self, output_map: BTreeMap<PathBuf, String>) -> Self {
        self.output_map = output_map;
        self
    }

    /// Adds an input unless it is already listed.
    pub fn push_input(&mut self, input: PathBuf) {
        if !self.input_files.contains(&input) {
            self.input_files.push(input);
        }
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// Fails on the first listed input that does not exist.
    pub fn check_inputs(&self) -> Result<(), PreprocessError> {
        self.input_files
            .iter()
            .chain(self.output_map.keys())
            .find(|p| !p.exists())
            .map_or(Ok(()), |missing| {
                Err(PreprocessError::InputNotFound(missing.clone()))
            })
    }

    /// Container path of a listed input.
    ///
    /// Relative inputs keep their relative path; absolute inputs are rooted
    /// at their parent directory.
    pub fn container_path(&self, input: &Path) -> String {
        self.container_path_within(input, input)
    }

    fn container_path_within(&self, input: &Path, path: &Path) -> String {
        let root = if input.is_absolute() {
            input.parent().unwrap_or(input)
        } else {
            Path::new("")
        };
        let relative = path.strip_prefix(root).unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        format!("{}{}", self.path_prefix, parts.join("/"))
    }

    /// Container path → local path, walking directories recursively.
    pub fn context_map(&self) -> Result<BTreeMap<String, PathBuf>, PreprocessError> {
        self.check_inputs()?;
        let mut map = BTreeMap::new();

        for input in &self.input_files {
            if input.is_dir() {
                for entry in WalkDir::new(input).sort_by_file_name() {
                    let entry = entry.map_err(|e| PreprocessError::Walk {
                        path: input.clone(),
                        reason: e.to_string(),
                    })?;
                    if entry.file_type().is_file() {
                        map.insert(
                            self.container_path_within(input, entry.path()),
                            entry.path().to_path_buf(),
                        );
                    }
                }
            } else {
                map.insert(self.container_path(input), input.clone());
            }
        }

        for (local, remote) in &self.output_map {
            map.insert(remote.clone(), local.clone());
        }

        Ok(map)
    }
}

/// A packed build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextArchive {
    /// Gzip'd tar bytes.
    pub bytes: Vec<u8>,
    /// Hex SHA-256 of `bytes`.
    pub digest: String,
    /// Archive paths in order.
    pub entries: Vec<String>,
}

impl ContextArchive {
    /// First 12 hex digits of the digest, used in image tags.
    pub fn short_digest(&self) -> &str {
        self.digest.get(..12).unwrap_or(&self.digest)
    }

    /// Writes the archive to `path`.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, &self.bytes)
    }
}

enum EntrySource<'a> {
    File(&'a Path),
    Bytes(&'a [u8]),
}

/// Packs `context` (container path → local file) and `extra` in-memory
/// files into a reproducible gzip'd tar.
///
/// Archive paths are container paths without the leading '/'. Entries are
/// sorted with zeroed mtimes so equal inputs give equal digests. An `extra`
/// entry replaces a context entry with the same path.
pub fn build_context_archive(
    context: &BTreeMap<String, PathBuf>,
    extra: &[(String, Vec<u8>)],
) -> Result<ContextArchive, PreprocessError> {
    let mut sources: BTreeMap<String, EntrySource<'_>> = context
        .iter()
        .map(|(remote, local)| {
            (
                remote.trim_start_matches('/').to_string(),
                EntrySource::File(local.as_path()),
            )
        })
        .collect();
    for (name, data) in extra {
        sources.insert(
            name.trim_start_matches('/').to_string(),
            EntrySource::Bytes(data.as_slice()),
        );
    }

    let mut tar = TarBuilder::new(GzEncoder::new(Vec::new(), Compression::default()));
    tar.mode(HeaderMode::Deterministic);

    for (name, source) in &sources {
        let data = match source {
            EntrySource::File(path) => std::fs::read(path)?,
            EntrySource::Bytes(bytes) => bytes.to_vec(),
        };
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        tar.append_data(&mut header, name, data.as_slice())?;
    }

    let bytes = tar.into_inner()?.finish()?;
    let digest = hex::encode(Sha256::digest(&bytes));

    Ok(ContextArchive {
        bytes,
        digest,
        entries: sources.into_keys().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn archive_contents(archive: &ContextArchive) -> BTreeMap<String, String> {
        let mut reader = tar::Archive::new(GzDecoder::new(archive.bytes.as_slice()));
        let mut out = BTreeMap::new();
        for entry in reader.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            out.insert(path, body);
        }
        out
    }

    #[test]
    fn test_prefix_gets_trailing_slash() {
        assert_eq!(ContextFiles::new("/srv").path_prefix(), "/srv/");
        assert_eq!(ContextFiles::new("/app/").path_prefix(), "/app/");
    }

    #[test]
    fn test_container_path() {
        let files = ContextFiles::new("/app/");
        assert_eq!(files.container_path(Path::new("train.py")), "/app/train.py");
        assert_eq!(files.container_path(Path::new("./src/model.py")), "/app/src/model.py");
        assert_eq!(files.container_path(Path::new("/tmp/job/train.py")), "/app/train.py");
    }

    #[test]
    fn test_context_map_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("a.py"), "a").unwrap();
        std::fs::write(src.join("nested").join("b.py"), "b").unwrap();
        let config = dir.path().join("config.yaml");
        std::fs::write(&config, "lr: 0.1").unwrap();

        let mut output_map = BTreeMap::new();
        output_map.insert(config.clone(), "/etc/train/config.yaml".to_string());
        let files = ContextFiles::new("/app/")
            .with_inputs(vec![src.clone()])
            .with_output_map(output_map);

        let map = files.context_map().unwrap();
        assert_eq!(
            map.keys().cloned().collect::<Vec<_>>(),
            vec![
                "/app/src/a.py".to_string(),
                "/app/src/nested/b.py".to_string(),
                "/etc/train/config.yaml".to_string(),
            ]
        );
        assert_eq!(map["/etc/train/config.yaml"], config);
    }

    #[test]
    fn test_context_map_missing_input() {
        let files = ContextFiles::new("/app/").with_inputs(vec![PathBuf::from("/no/such/file.py")]);
        assert!(matches!(
            files.context_map(),
            Err(PreprocessError::InputNotFound(_))
        ));
    }

    #[test]
    fn test_archive_is_reproducible_and_extra_wins() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("train.py");
        std::fs::write(&script, "print('train')").unwrap();

        let mut context = BTreeMap::new();
        context.insert("/app/train.py".to_string(), script.clone());
        context.insert("/Dockerfile".to_string(), script);
        let extra = vec![("Dockerfile".to_string(), b"FROM scratch".to_vec())];

        let first = build_context_archive(&context, &extra).unwrap();
        let second = build_context_archive(&context, &extra).unwrap();
        assert_eq!(first.digest, second.digest);
        assert_eq!(first.digest.len(), 64);
        assert_eq!(first.short_digest().len(), 12);
        assert_eq!(first.entries, vec!["Dockerfile", "app/train.py"]);

        let contents = archive_contents(&first);
        assert_eq!(contents["Dockerfile"], "FROM scratch");
        assert_eq!(contents["app/train.py"], "print('train')");
    }

    #[test]
    fn test_archive_digest_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("train.py");
        let mut context = BTreeMap::new();
        context.insert("/app/train.py".to_string(), script.clone());

        std::fs::write(&script, "v1").unwrap();
        let v1 = build_context_archive(&context, &[]).unwrap();
        std::fs::write(&script, "v2").unwrap();
        let v2 = build_context_archive(&context, &[]).unwrap();
        assert_ne!(v1.digest, v2.digest);
    }
}
