use std::cmp::Ordering;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use basepile_core_rs::loc::{contig, Interval, IntervalOp};
use basepile_io_rs::fasta::ReferenceLookup;
use basepile_io_rs::positions::{Position, PositionFile};
use derive_getters::Getters;
use eyre::{ensure, Result, WrapErr};
use log::info;

/// A genomic window of interest together with its reference bases. Variants are immutable and
/// shared between all pipeline stages.
#[derive(Clone, Debug, Getters)]
pub struct Variant {
    // Index of the variant among the data lines of the position file
    ordinal: usize,
    name: String,
    // Normalized chromosome name
    chromosome: String,
    interval: Interval<u64>,
    reference: Vec<u8>,
    alt: Option<Vec<u8>>,
    // Raw line of the position file
    line: String,
}

impl Variant {
    pub fn new(position: &Position, reference: Vec<u8>) -> Result<Self> {
        let interval = *position.interval();
        ensure!(
            reference.len() as u64 == interval.len(),
            "Reference bases for {} {}:{} have length {}, expected {}",
            position.name(),
            position.chromosome(),
            interval,
            reference.len(),
            interval.len()
        );
        Ok(Self {
            ordinal: *position.ordinal(),
            name: position.name().clone(),
            chromosome: contig::normalize(position.chromosome()),
            interval,
            reference,
            alt: position.alt().clone(),
            line: position.line().clone(),
        })
    }

    /// Resolve reference bases for every position of the file.
    pub fn load(
        positions: &PositionFile,
        reference: &mut dyn ReferenceLookup,
    ) -> Result<Vec<Arc<Variant>>> {
        let mut variants = Vec::with_capacity(positions.positions().len());
        for position in positions.positions() {
            let bases = reference
                .bases(position.chromosome(), *position.interval())
                .wrap_err_with(|| {
                    format!(
                        "Failed to fetch reference bases for {} ({}:{})",
                        position.name(),
                        position.chromosome(),
                        position.interval()
                    )
                })?;
            variants.push(Arc::new(Self::new(position, bases)?));
        }
        info!("Loaded {} variant positions", variants.len());
        Ok(variants)
    }

    pub fn start(&self) -> u64 {
        self.interval.start()
    }

    pub fn end(&self) -> u64 {
        self.interval.end()
    }

    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    pub fn is_single_base(&self) -> bool {
        self.interval.len() == 1
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.chromosome == other.chromosome && self.interval == other.interval
    }
}

impl Eq for Variant {}

impl PartialOrd for Variant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Chromosomes in natural order, then start and end.
impl Ord for Variant {
    fn cmp(&self, other: &Self) -> Ordering {
        contig::ordering(&self.chromosome, &other.chromosome)
            .then_with(|| self.chromosome.cmp(&other.chromosome))
            .then_with(|| self.start().cmp(&other.start()))
            .then_with(|| self.end().cmp(&other.end()))
    }
}

/// An alignment file to pile up.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Getters)]
pub struct Sample {
    ordinal: usize,
    path: PathBuf,
    name: String,
}

impl Sample {
    /// Make a sample; the name defaults to the file stem.
    pub fn new(ordinal: usize, path: impl Into<PathBuf>, name: Option<String>) -> Self {
        let path = path.into();
        let name = name.unwrap_or_else(|| stem(&path));
        Self {
            ordinal,
            path,
            name,
        }
    }

    pub fn from_paths(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Vec<Arc<Sample>> {
        paths
            .into_iter()
            .enumerate()
            .map(|(ordinal, path)| Arc::new(Self::new(ordinal, path, None)))
            .collect()
    }

    /// Parse a list of samples, one `path[<tab>name]` per line. Blank lines and lines starting
    /// with '#' are skipped.
    pub fn from_list(reader: impl BufRead) -> Result<Vec<Arc<Sample>>> {
        let mut samples = Vec::new();
        for (ind, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (path, name) = match line.split_once('\t') {
                Some((path, name)) if !name.trim().is_empty() => {
                    (path.trim(), Some(name.trim().to_string()))
                }
                Some((path, _)) => (path.trim(), None),
                None => (line, None),
            };
            ensure!(!path.is_empty(), "Empty BAM path at line {}", ind + 1);
            samples.push(Arc::new(Self::new(samples.len(), path, name)));
        }
        Ok(samples)
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|x| x.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use basepile_io_rs::fasta::InMemory;
    use basepile_io_rs::positions::Format;

    use super::*;

    #[test]
    fn test_load_variants() -> Result<()> {
        let mut reference = InMemory::new();
        reference
            .insert("chr1", "ACGTACGTAC")
            .insert("chrMT", "GGGCCC");

        let positions = PositionFile::read(
            "#header\nv1\t1\t2\t4\tT\nv2\tM\t5\t5\nv3\tchr1\t10\t10\n".as_bytes(),
            Format::Tab,
        )?;
        let variants = Variant::load(&positions, &mut reference)?;
        assert_eq!(variants.len(), 3);

        assert_eq!(variants[0].chromosome(), "chr1");
        assert_eq!(variants[0].reference(), b"CGT");
        assert_eq!(variants[0].len(), 3);
        assert!(!variants[0].is_single_base());
        assert_eq!(variants[0].alt().as_deref(), Some(b"T".as_slice()));

        assert_eq!(variants[1].chromosome(), "chrMT");
        assert_eq!(variants[1].reference(), b"C");
        assert_eq!(*variants[1].ordinal(), 1);
        assert_eq!(variants[1].line(), "v2\tM\t5\t5");

        let mut sorted = variants.clone();
        sorted.sort();
        assert_eq!(
            sorted.iter().map(|x| x.name().as_str()).collect::<Vec<_>>(),
            ["v1", "v3", "v2"]
        );
        Ok(())
    }

    #[test]
    fn test_load_unknown_chromosome() -> Result<()> {
        let mut reference = InMemory::new();
        reference.insert("chr1", "ACGT");
        let positions = PositionFile::read("v1\tchr2\t1\t1\n".as_bytes(), Format::Tab)?;
        assert!(Variant::load(&positions, &mut reference).is_err());
        Ok(())
    }

    #[test]
    fn test_samples() -> Result<()> {
        let samples = Sample::from_list(
            "# samples\n/data/tumour.bam\tT1\n\n/data/normal.bam\n".as_bytes(),
        )?;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].name(), "T1");
        assert_eq!(*samples[1].ordinal(), 1);
        assert_eq!(samples[1].name(), "normal");
        assert_eq!(samples[1].path(), Path::new("/data/normal.bam"));

        let samples = Sample::from_paths(["a.bam", "dir/b.bam"]);
        assert_eq!(samples[1].name(), "b");
        Ok(())
    }
}
