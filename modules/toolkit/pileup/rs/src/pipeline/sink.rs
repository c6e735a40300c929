use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crossbeam_channel::Receiver;
use eyre::{bail, ensure, OptionExt, Result, WrapErr};
use itertools::Itertools;
use log::{info, warn};
use rayon::prelude::*;

use super::shared::{pull, Pulled, Shared};
use super::{OutputRow, Workload};
use crate::config::Mode;
use crate::format;

/// Progress and liveness are checked every that many rows.
const CHECK_EVERY: usize = 10_000;

/// Rows of sorted layouts are spilled to `<output>.unsorted` before the final sort.
pub fn spill_path(output: &Path) -> PathBuf {
    let mut path = output.as_os_str().to_owned();
    path.push(".unsorted");
    PathBuf::from(path)
}

enum Next {
    Row(OutputRow),
    // All rows were received
    Drained,
    // Cancelled or asked to stop early
    Stop,
}

pub struct Sink<'a> {
    workload: &'a Workload,
    shared: &'a Shared,
    output: PathBuf,
    received: usize,
}

impl<'a> Sink<'a> {
    pub fn new(workload: &'a Workload, shared: &'a Shared, output: PathBuf) -> Self {
        Self {
            workload,
            shared,
            output,
            received: 0,
        }
    }

    pub fn run(self, rows: Receiver<OutputRow>) -> Result<()> {
        info!("Writing pileups to {}", self.output.display());
        match self.workload.config.mode() {
            Mode::Columns => self.columns(rows),
            _ => self.sorted(rows),
        }
    }

    fn next(&mut self, rows: &Receiver<OutputRow>) -> Next {
        if let Some(limit) = self.workload.config.stop_sink_after() {
            if self.received >= limit {
                info!("Writer stopped after {} rows", self.received);
                return Next::Stop;
            }
        }
        if self.received > 0 && self.received % CHECK_EVERY == 0 {
            if self.shared.is_failed() {
                return Next::Stop;
            }
            info!("Received {} pileup rows", self.received);
        }

        match pull(rows, self.shared) {
            Pulled::Item(row) => {
                self.received += 1;
                Next::Row(row)
            }
            Pulled::Drained => {
                self.shared.mark_drained();
                Next::Drained
            }
            Pulled::Cancelled => Next::Stop,
        }
    }

    /// Spill rows as they come, then sort them by the variant rank and the sample ordinal.
    fn sorted(mut self, rows: Receiver<OutputRow>) -> Result<()> {
        let spill = spill_path(&self.output);
        {
            let mut writer = BufWriter::new(
                File::create(&spill)
                    .wrap_err_with(|| format!("Failed to create {}", spill.display()))?,
            );
            loop {
                match self.next(&rows) {
                    Next::Row(row) => {
                        writeln!(writer, "{}\t{}\t{}", row.variant, row.sample, row.text)?
                    }
                    Next::Drained => break,
                    Next::Stop => return Ok(()),
                }
            }
            writer.flush()?;
        }
        info!("Received all {} pileup rows, sorting", self.received);

        let mut loaded = Vec::with_capacity(self.received);
        let reader = BufReader::new(
            File::open(&spill).wrap_err_with(|| format!("Failed to open {}", spill.display()))?,
        );
        for line in reader.lines() {
            loaded.push(parse_spilled(&line?)?);
        }
        ensure!(
            loaded.len() == self.received,
            "Spill file {} holds {} rows, expected {}",
            spill.display(),
            loaded.len(),
            self.received
        );

        let ranks = &self.workload.ranks;
        loaded.par_sort_by_key(|row| (ranks[row.variant], row.sample));

        let mut writer = self.create()?;
        for row in &loaded {
            writeln!(writer, "{}", row.text)?;
        }
        writer.flush()?;

        std::fs::remove_file(&spill)
            .wrap_err_with(|| format!("Failed to remove {}", spill.display()))?;
        info!("Wrote {} pileup rows", loaded.len());
        Ok(())
    }

    /// Collect a cell for every (variant, sample) pair and write one line per variant in the
    /// order of the position file.
    fn columns(mut self, rows: Receiver<OutputRow>) -> Result<()> {
        let (variants, samples) = (
            self.workload.variants.len(),
            self.workload.samples.len(),
        );
        let mut table: Vec<Vec<Option<String>>> = vec![vec![None; samples]; variants];

        loop {
            let row = match self.next(&rows) {
                Next::Row(row) => row,
                Next::Drained => break,
                Next::Stop => return Ok(()),
            };
            let cell = table
                .get_mut(row.variant)
                .and_then(|x| x.get_mut(row.sample))
                .ok_or_eyre("Pileup row for an unknown variant or sample")?;
            ensure!(
                cell.is_none(),
                "Duplicate pileup row for {} in {}",
                self.workload.variants[row.variant].line(),
                self.workload.samples[row.sample].name()
            );
            *cell = Some(row.text);
        }
        info!("Received all {} pileup rows", self.received);

        let incomplete: Vec<_> = table
            .iter()
            .enumerate()
            .filter(|(_, cells)| cells.iter().any(|x| x.is_none()))
            .map(|(ind, _)| self.workload.variants[ind].line().as_str())
            .collect();
        if !incomplete.is_empty() {
            for line in &incomplete {
                warn!("No pileup for every sample at {}", line);
            }
            bail!(
                "Missing pileups for {} positions:\n{}",
                incomplete.len(),
                incomplete.iter().join("\n")
            );
        }

        let mut writer = self.create()?;
        for (variant, cells) in self.workload.variants.iter().zip(table) {
            write!(writer, "{}", variant.line())?;
            for cell in cells.into_iter().flatten() {
                write!(writer, "\t{}", cell)?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        info!("Wrote {} positions", variants);
        Ok(())
    }

    /// Open the output and write the header.
    fn create(&self) -> Result<BufWriter<File>> {
        let file = File::create(&self.output)
            .wrap_err_with(|| format!("Failed to create {}", self.output.display()))?;
        let mut writer = BufWriter::new(file);
        let header = format::header(
            *self.workload.config.mode(),
            *self.workload.config.strand_specific(),
            &self.workload.header,
            &self.workload.samples,
        );
        for line in header {
            writeln!(writer, "{}", line)?;
        }
        Ok(writer)
    }
}

fn parse_spilled(line: &str) -> Result<OutputRow> {
    let mut split = line.splitn(3, '\t');
    let (variant, sample, text) = match (split.next(), split.next(), split.next()) {
        (Some(variant), Some(sample), Some(text)) => (variant, sample, text),
        _ => bail!("Malformed spilled row: {}", line),
    };
    Ok(OutputRow {
        variant: variant.parse()?,
        sample: sample.parse()?,
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spill_path() {
        assert_eq!(
            spill_path(Path::new("/tmp/out.txt")),
            PathBuf::from("/tmp/out.txt.unsorted")
        );
    }

    #[test]
    fn test_parse_spilled() -> Result<()> {
        let row = parse_spilled("3\t1\tS\tx.bam\tv\tchr1")?;
        assert_eq!((row.variant, row.sample), (3, 1));
        assert_eq!(row.text, "S\tx.bam\tv\tchr1");

        assert!(parse_spilled("3\t1").is_err());
        assert!(parse_spilled("a\t1\tx").is_err());
        Ok(())
    }
}
