use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::script::{shell_quote, DeployScript};

pub const TRACING_TARGET_ASSETS: &str = "sitestack::assets";

fn iter_files_recursively<P: AsRef<Path>>(
    start_dir: P,
    callback: &mut impl FnMut(PathBuf) -> Result<()>,
) -> Result<()> {
    let start_dir = start_dir.as_ref();
    let readdir = std::fs::read_dir(start_dir).map_err(|e| Error::io(start_dir, e))?;
    for entry in readdir {
        let direntry = entry.map_err(|e| Error::io(start_dir, e))?;
        let path = direntry.path();
        // follows symlinks, like zip does when the asset is packaged
        let metadata = std::fs::metadata(&path).map_err(|e| Error::io(&path, e))?;
        if metadata.is_dir() {
            iter_files_recursively(&path, callback)?;
        } else {
            callback(path)?;
        }
    }
    Ok(())
}

/// a local directory of built site files, fingerprinted so it can be
/// zipped and staged under a content addressed object key.
#[derive(Debug, Clone)]
pub struct StagedAsset {
    pub source_dir: PathBuf,
    /// paths relative to `source_dir`, '/' separated, sorted.
    pub files: Vec<String>,
    pub total_bytes: u64,
    pub fingerprint: String,
    pub object_key: String,
}

impl StagedAsset {
    pub fn stage<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source_dir = match std::fs::canonicalize(path) {
            Ok(p) if p.is_dir() => p,
            _ => return Err(Error::AssetDirectoryMissing(path.to_path_buf())),
        };

        let mut files = vec![];
        iter_files_recursively(&source_dir, &mut |p| {
            files.push(p);
            Ok(())
        })?;
        if files.is_empty() {
            return Err(Error::EmptyAssetDirectory(path.to_path_buf()));
        }

        let mut relative: Vec<(String, PathBuf)> = files.into_iter()
            .filter_map(|p| {
                let rel = p.strip_prefix(&source_dir).ok()?;
                let rel = rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                Some((rel, p))
            })
            .collect();
        relative.sort();

        // both names and contents feed the fingerprint, so renames
        // produce a new object key even when the bytes are unchanged.
        let mut hasher = adler::Adler32::new();
        let mut total_bytes = 0;
        for (rel, full) in relative.iter() {
            let contents = std::fs::read(full).map_err(|e| Error::io(full, e))?;
            total_bytes += contents.len() as u64;
            hasher.write_slice(rel.as_bytes());
            hasher.write_slice(&[0]);
            hasher.write_slice(&(contents.len() as u64).to_le_bytes());
            hasher.write_slice(&contents);
        }
        let fingerprint = format!("{:08x}", hasher.checksum());
        let object_key = format!("asset.{fingerprint}.zip");
        let files: Vec<String> = relative.into_iter().map(|(rel, _)| rel).collect();

        tracing::info!(
            target: TRACING_TARGET_ASSETS,
            source = %source_dir.display(),
            files = files.len(),
            bytes = total_bytes,
            fingerprint = %fingerprint,
            "staged asset directory"
        );

        Ok(Self { source_dir, files, total_bytes, fingerprint, object_key })
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        let relative_path = relative_path.trim_start_matches('/');
        self.files.iter().any(|f| f == relative_path)
    }

    pub fn zip_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(&self.object_key)
    }

    /// zips the directory into `out_dir` during the build phase and
    /// copies the zip to the staging bucket during the package phase.
    pub fn add_commands(&self, script: &mut DeployScript, out_dir: &Path, staging_bucket: &str) {
        let zip = shell_quote(&self.zip_path(out_dir).display().to_string());
        let source = shell_quote(&self.source_dir.display().to_string());
        let destination = shell_quote(&format!("s3://{staging_bucket}/{}", self.object_key));
        script.add_build_cmd(format!("rm -f {zip}"));
        script.add_build_cmd(format!("(cd {source} && zip -qr -X {zip} .)"));
        script.add_package_cmd(format!("aws s3 cp {zip} {destination}"));
    }
}
