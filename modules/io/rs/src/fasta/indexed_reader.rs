use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use ahash::AHashMap;
use basepile_core_rs::loc::{Interval, IntervalOp};
use derive_getters::{Dissolve, Getters};
use eyre::{ensure, eyre, Result, WrapErr};

use super::lookup::ReferenceLookup;

/// One line of a samtools FASTA index (.fai).
#[derive(Clone, PartialEq, Eq, Debug, Dissolve, Getters)]
pub struct FaiRecord {
    id: String,
    // Total length of the sequence, in bases
    length: u64,
    // Offset in the FASTA file of the first base
    offset: u64,
    bases_per_line: u64,
    // Including the line terminator
    bytes_per_line: u64,
}

impl FaiRecord {
    pub fn parse(line: &str) -> Result<Self> {
        let err = || eyre!("Invalid FASTA index line: {}", line);
        let mut parts = line.trim_end_matches(['\r', '\n']).split('\t');

        let id = parts.next().filter(|x| !x.is_empty()).ok_or_else(err)?;
        let mut number = |what: &str| -> Result<u64> {
            parts
                .next()
                .ok_or_else(err)?
                .parse::<u64>()
                .wrap_err_with(|| format!("Invalid {} in FASTA index line: {}", what, line))
        };
        let record = Self {
            id: id.to_string(),
            length: number("length")?,
            offset: number("offset")?,
            bases_per_line: number("bases per line")?,
            bytes_per_line: number("bytes per line")?,
        };

        ensure!(
            record.length > 0,
            "Length of the reference sequence must be greater than zero, line: {}",
            line
        );
        ensure!(
            record.bases_per_line > 0,
            "Bases per line must be greater than zero, line: {}",
            line
        );
        ensure!(
            record.bytes_per_line > record.bases_per_line,
            "Bytes per line must be greater than bases per line, line: {}",
            line
        );
        ensure!(
            parts.next().is_none(),
            "Extra fields in the FASTA index, line: {}",
            line
        );
        Ok(record)
    }

    /// Byte offset of a 0-based position inside the sequence.
    fn byte_offset(&self, position: u64) -> u64 {
        self.offset
            + (position / self.bases_per_line) * self.bytes_per_line
            + position % self.bases_per_line
    }
}

/// An uncompressed FASTA file with its .fai index.
#[derive(Debug, Dissolve, Getters)]
pub struct IndexedReader<R> {
    #[getter(skip)]
    reader: R,
    records: Vec<FaiRecord>,
    #[getter(skip)]
    index: AHashMap<String, usize>,
}

impl IndexedReader<BufReader<File>> {
    /// Open `<fasta>` together with `<fasta>.fai`.
    pub fn from_path(fasta: impl AsRef<Path>) -> Result<Self> {
        let fasta = fasta.as_ref();
        let mut fai = fasta.as_os_str().to_owned();
        fai.push(".fai");
        let fai = Path::new(&fai);
        ensure!(fai.exists(), "fai index does not exist: {}", fai.display());

        let file = File::open(fasta)
            .wrap_err_with(|| format!("Failed to open FASTA file: {}", fasta.display()))?;
        let index = BufReader::new(File::open(fai)?);
        Self::new(BufReader::new(file), index)
            .wrap_err_with(|| format!("Failed to load FASTA index: {}", fai.display()))
    }
}

impl<R: Read + Seek> IndexedReader<R> {
    pub fn new(reader: R, index: impl BufRead) -> Result<Self> {
        let mut records = Vec::new();
        for line in index.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(FaiRecord::parse(&line)?);
        }

        let index = records
            .iter()
            .enumerate()
            .map(|(ind, record)| (record.id.clone(), ind))
            .collect();
        Ok(Self {
            reader,
            records,
            index,
        })
    }

    /// Fetch bases of a 1-based inclusive interval.
    pub fn fetch_interval(
        &mut self,
        seqid: &str,
        interval: Interval<u64>,
        buffer: &mut Vec<u8>,
    ) -> Result<()> {
        let record = self
            .index
            .get(seqid)
            .map(|ind| &self.records[*ind])
            .ok_or_else(|| eyre!("Reference sequence ID not found in the index: {}", seqid))?;
        ensure!(
            interval.end() <= record.length,
            "End coordinate for {} is out of bounds: {} > {}",
            seqid,
            interval.end(),
            record.length
        );

        // 0-based half-open coordinates from here on
        let (start, end) = (interval.start() - 1, interval.end());
        let first_line = start / record.bases_per_line;
        let last_line = (end - 1) / record.bases_per_line;

        buffer.clear();
        buffer.try_reserve((end - start) as usize)?;

        // Read the whole byte range and drop line terminators on the fly
        let first_byte = record.byte_offset(start);
        let last_byte = record.byte_offset(end - 1);
        let mut raw = Vec::with_capacity((last_byte - first_byte + 1) as usize);
        self.reader.seek(SeekFrom::Start(first_byte))?;
        self.reader
            .by_ref()
            .take(last_byte - first_byte + 1)
            .read_to_end(&mut raw)?;

        buffer.extend(raw.into_iter().filter(|x| !matches!(x, b'\n' | b'\r')));
        ensure!(
            buffer.len() as u64 == end - start,
            "Truncated FASTA sequence {} at lines {}-{}: expected {} bases, got {}",
            seqid,
            first_line,
            last_line,
            end - start,
            buffer.len()
        );
        Ok(())
    }
}

impl<R: Read + Seek> ReferenceLookup for IndexedReader<R> {
    fn fetch(&mut self, seqid: &str, interval: Interval<u64>, buffer: &mut Vec<u8>) -> Result<()> {
        self.fetch_interval(seqid, interval, buffer)
    }

    fn contains(&self, seqid: &str) -> bool {
        self.index.contains_key(seqid)
    }
}
