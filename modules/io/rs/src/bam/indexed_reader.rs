use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};

use derive_getters::Dissolve;
use eyre::{eyre, Result, WrapErr};
use noodles::{bam, bgzf, csi::BinningIndex};

#[derive(Dissolve)]
pub struct IndexedReader<R> {
    pub inner: bam::io::Reader<R>,
    pub index: Box<dyn BinningIndex + Send + Sync>,
}

impl IndexedReader<bgzf::io::Reader<File>> {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let index = locate_index(path)?;
        let index = bam::bai::read(&index)
            .wrap_err_with(|| format!("Failed to read BAM index: {}", index.display()))?;
        let file = File::open(path)
            .wrap_err_with(|| format!("Failed to open BAM file: {}", path.display()))?;

        Ok(Self {
            inner: bam::io::Reader::new(file),
            index: Box::new(index),
        })
    }
}

/// Look for `<file>.bam.bai`, then for `<file>.bai`.
fn locate_index(path: &Path) -> Result<PathBuf> {
    let mut appended = OsString::from(path);
    appended.push(".bai");
    let appended = PathBuf::from(appended);
    if appended.exists() {
        return Ok(appended);
    }

    let replaced = path.with_extension("bai");
    if replaced.exists() {
        return Ok(replaced);
    }

    Err(eyre!(
        "BAM index not found for {} (tried {} and {})",
        path.display(),
        appended.display(),
        replaced.display()
    ))
}
