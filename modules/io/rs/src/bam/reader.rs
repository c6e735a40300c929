use std::fs::File;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use basepile_core_rs::loc::Interval;
use derive_getters::Getters;
use eyre::{Result, WrapErr};
use noodles::bam;
use noodles::bgzf;
use noodles::core::position::Position;
use noodles::core::region;
use noodles::csi::BinningIndex;

use super::accessor::{resolve, Exhausted, OpenAccessor, ReadAccessor, Reads};
use super::indexed_reader::IndexedReader;
use super::query::{Query, Scan};

/// Reads of a single BAM file. The index is only required, and loaded, for region queries.
#[derive(Getters)]
pub struct Reader {
    path: PathBuf,
    contigs: Vec<String>,
    #[getter(skip)]
    ids: AHashMap<String, usize>,
    #[getter(skip)]
    indexed: Option<IndexedReader<bgzf::io::Reader<File>>>,
}

impl Reader {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (_, contigs) = Self::open(&path)?;
        let ids = contigs
            .iter()
            .enumerate()
            .map(|(ind, name)| (name.clone(), ind))
            .collect();

        Ok(Self {
            path,
            contigs,
            ids,
            indexed: None,
        })
    }

    fn open(path: &Path) -> Result<(bam::io::Reader<bgzf::io::Reader<File>>, Vec<String>)> {
        let file = File::open(path)
            .wrap_err_with(|| format!("Failed to open BAM file: {}", path.display()))?;
        let mut reader = bam::io::Reader::new(file);
        let header = reader
            .read_header()
            .wrap_err_with(|| format!("Failed to read BAM header: {}", path.display()))?;

        let contigs = header
            .reference_sequences()
            .keys()
            .map(|name| name.to_string())
            .collect();
        Ok((reader, contigs))
    }
}

impl ReadAccessor for Reader {
    fn query(&mut self, contig: &str, interval: Interval<u64>) -> Result<Reads<'_>> {
        let Some(reference_sequence_id) = resolve(contig, &self.ids) else {
            log::debug!(
                "Contig {} is absent from {}, nothing to fetch",
                contig,
                self.path.display()
            );
            return Ok(Box::new(Exhausted));
        };

        let Self {
            path,
            contigs,
            indexed,
            ..
        } = self;
        let indexed = match indexed.take() {
            Some(loaded) => indexed.insert(loaded),
            None => indexed.insert(IndexedReader::new(path.as_path())?),
        };

        let (start, end): (u64, u64) = interval.into();
        let interval = region::Interval::from(
            Position::try_from(start as usize)?..=Position::try_from(end as usize)?,
        );
        let chunks = indexed
            .index
            .query(reference_sequence_id, interval)
            .wrap_err_with(|| format!("Failed to query the BAM index: {}", path.display()))?;

        Ok(Box::new(Query::new(
            indexed.inner.get_mut(),
            chunks,
            reference_sequence_id,
            interval,
            contigs,
        )))
    }

    fn scan(&mut self) -> Result<Reads<'_>> {
        let (reader, _) = Self::open(&self.path)?;
        Ok(Box::new(Scan::new(reader, &self.contigs)))
    }
}

/// Opens BAM files from the disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct BamFiles;

impl OpenAccessor for BamFiles {
    fn open(&self, path: &Path) -> Result<Box<dyn ReadAccessor>> {
        Ok(Box::new(Reader::new(path)?))
    }
}
