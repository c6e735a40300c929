//! Textual rendering of pileups and result headers.
//!
//! Rendering is a pure function of a finalized [`Pileup`] and the output mode. Every row is a
//! single line without the trailing newline.
use std::fmt::Write;
use std::sync::Arc;

use crate::accumulator::{Keyed, Pileup, BASES};
use crate::config::Mode;
use crate::variant::Sample;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DESCRIPTION: [&str; 6] = ["Sample", "BAM", "ID", "Chr", "Start", "End"];

fn version_line() -> String {
    format!("##basepile version {}", VERSION)
}

/// Header lines of the result file.
///
/// `positions` are the header lines of the position file, `samples` are the samples in the
/// output order. `stranded` selects the per-strand layout of the default mode.
pub fn header(
    mode: Mode,
    stranded: bool,
    positions: &[String],
    samples: &[Arc<Sample>],
) -> Vec<String> {
    match mode {
        Mode::Default => {
            let mut columns: Vec<String> = DESCRIPTION
                .iter()
                .chain(&["RefBases", "TotalRef", "TotalNonRef"])
                .map(|x| x.to_string())
                .collect();
            let bases = BASES.iter().map(|x| String::from_utf8_lossy(x).into_owned());
            if stranded {
                columns.extend(bases.clone().map(|x| format!("{}Pos", x)));
                columns.push("TotalPos".to_string());
                columns.extend(bases.map(|x| format!("{}Neg", x)));
                columns.push("TotalNeg".to_string());
            } else {
                columns.extend(bases);
                columns.push("Total".to_string());
            }
            vec![version_line(), format!("#{}", columns.join("\t"))]
        }
        Mode::Compound => {
            let columns = DESCRIPTION.iter().chain(&[
                "RefBases", "AltBases", "TotalPos", "RefPos", "AltPos", "OtherPos", "TotalNeg",
                "RefNeg", "AltNeg", "OtherNeg",
            ]);
            vec![
                version_line(),
                format!("#{}", columns.copied().collect::<Vec<_>>().join("\t")),
            ]
        }
        Mode::IndelCheck => positions
            .iter()
            .map(|line| {
                if line.starts_with("Hugo") {
                    format!("{}\tIndel_Check", line)
                } else {
                    line.clone()
                }
            })
            .collect(),
        Mode::Columns => {
            let names = samples
                .iter()
                .map(|x| x.name().as_str())
                .collect::<Vec<_>>()
                .join("\t");

            let mut lines = vec![version_line()];
            match positions.split_last() {
                Some((last, rest)) => {
                    lines.extend(rest.iter().cloned());
                    let last = if last.starts_with('#') {
                        last.clone()
                    } else {
                        format!("#{}", last)
                    };
                    lines.push(format!("{}\t{}", last, names));
                }
                None => lines.push(format!("#Position\t{}", names)),
            }
            lines
        }
    }
}

/// Tab-separated counts: one column per base for single-base windows, one `BASES:count`
/// column per observed key otherwise.
fn counts(keyed: &Keyed<u64>, single_base: bool, into: &mut String) {
    for (key, count) in keyed.iter() {
        if single_base {
            let _ = write!(into, "\t{}", count);
        } else {
            let _ = write!(into, "\t{}:{}", String::from_utf8_lossy(key), count);
        }
    }
}

/// Compact counts of a single cell: `A,C,G,T,N` counts for single-base windows, comma-separated
/// `BASES:count` pairs otherwise and `-` when nothing was observed.
pub fn cell(pileup: &Pileup) -> String {
    let totals = pileup.totals();
    if pileup.variant().is_single_base() {
        return BASES
            .iter()
            .map(|base| totals.count(base).to_string())
            .collect::<Vec<_>>()
            .join(",");
    }
    if totals.is_empty() {
        return "-".to_string();
    }
    totals
        .iter()
        .map(|(key, count)| format!("{}:{}", String::from_utf8_lossy(key), count))
        .collect::<Vec<_>>()
        .join(",")
}

fn describe(pileup: &Pileup, into: &mut String) {
    let (variant, sample) = (pileup.variant(), pileup.sample());
    let _ = write!(
        into,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        sample.name(),
        sample.path().display(),
        variant.name(),
        variant.chromosome(),
        variant.start(),
        variant.end(),
        String::from_utf8_lossy(variant.reference())
    );
}

/// Render a row of the given mode. `stranded` selects the per-strand layout of the default mode
/// and is only honored when the pileup tracked strands.
pub fn row(pileup: &Pileup, mode: Mode, stranded: bool) -> String {
    let variant = pileup.variant();
    let mut line = String::new();

    match mode {
        Mode::Default => {
            describe(pileup, &mut line);
            let (reference, other) = pileup.reference_split();
            let _ = write!(line, "\t{}\t{}", reference, other);

            let single_base = variant.is_single_base();
            match (stranded, pileup.strands()) {
                (true, Some(strands)) => {
                    for keyed in [&strands.forward, &strands.reverse] {
                        counts(keyed, single_base, &mut line);
                        let _ = write!(line, "\t{}", keyed.total());
                    }
                }
                _ => {
                    counts(pileup.totals(), single_base, &mut line);
                    let _ = write!(line, "\t{}", pileup.totals().total());
                }
            }
        }
        Mode::Compound => {
            describe(pileup, &mut line);
            let reference = variant.reference().as_slice();
            let alt = variant.alt().as_deref().unwrap_or_default();
            let _ = write!(line, "\t{}", String::from_utf8_lossy(alt));

            let empty = Keyed::default();
            let strands = pileup.strands();
            for strand in [
                strands.as_ref().map(|x| &x.forward),
                strands.as_ref().map(|x| &x.reverse),
            ] {
                let keyed = strand.unwrap_or(&empty);
                let (ref_count, alt_count) = (keyed.count(reference), keyed.count(alt));
                let other: u64 = keyed
                    .iter()
                    .filter(|(key, _)| *key != reference && *key != alt)
                    .map(|(_, count)| *count)
                    .sum();
                let _ = write!(
                    line,
                    "\t{}\t{}\t{}\t{}",
                    keyed.total(),
                    ref_count,
                    alt_count,
                    other
                );
            }
        }
        Mode::IndelCheck => {
            let flag = if pileup.counters().indel_adjacent > 0 { "yes" } else { "" };
            let _ = write!(line, "{}\t{}", variant.line(), flag);
        }
        Mode::Columns => line = cell(pileup),
    }
    line
}

#[cfg(test)]
mod tests {
    use basepile_io_rs::bam::{flags, AlignedRead};
    use basepile_io_rs::positions::{Format, PositionFile};
    use eyre::Result;

    use super::*;
    use crate::accumulator::{Accumulator, Rules};
    use crate::config::Config;
    use crate::variant::Variant;

    fn pile(
        config: &Config,
        line: &str,
        reference: &str,
        reads: &[AlignedRead],
    ) -> Result<Pileup> {
        let positions = PositionFile::read(line.as_bytes(), Format::Tab)?;
        let variant = Arc::new(Variant::new(
            &positions.positions()[0],
            reference.as_bytes().to_vec(),
        )?);
        let sample = Arc::new(Sample::new(0, "/data/S1.bam", None));

        let rules = Rules::new(config);
        let mut accumulator = Accumulator::new(variant, sample, &rules);
        for read in reads {
            accumulator.add(read)?;
        }
        Ok(accumulator.finalize())
    }

    #[test]
    fn test_default_rows() -> Result<()> {
        let reads = [
            AlignedRead::new("r1", "chr1", 99, "3M", "GAT")?,
            AlignedRead::new("r2", "chr1", 99, "3M", "GCT")?.with_flags(flags::REVERSE),
            AlignedRead::new("r3", "chr1", 100, "1M", "A")?,
        ];

        let config = Config::new();
        let pileup = pile(&config, "snp1\t1\t100\t100\n", "A", &reads)?;
        assert_eq!(
            row(&pileup, Mode::Default, true),
            "S1\t/data/S1.bam\tsnp1\tchr1\t100\t100\tA\t2\t1\t2\t0\t0\t0\t0\t2\t0\t1\t0\t0\t0\t1"
        );
        assert_eq!(
            row(&pileup, Mode::Default, false),
            "S1\t/data/S1.bam\tsnp1\tchr1\t100\t100\tA\t2\t1\t2\t1\t0\t0\t0\t3"
        );
        assert_eq!(row(&pileup, Mode::Columns, true), "2,1,0,0,0");
        assert_eq!(row(&pileup, Mode::IndelCheck, true), "snp1\t1\t100\t100\t");
        Ok(())
    }

    #[test]
    fn test_multi_base_rows() -> Result<()> {
        let reads = [
            AlignedRead::new("r1", "chr2", 10, "2M", "TT")?,
            AlignedRead::new("r2", "chr2", 10, "2M", "CA")?,
            AlignedRead::new("r3", "chr2", 10, "2M", "TT")?,
        ];
        let config = Config::new().with_strand_specific(false);
        let pileup = pile(&config, "mnv\tchr2\t10\t11\tTT\n", "CA", &reads)?;
        assert_eq!(
            row(&pileup, Mode::Default, false),
            "S1\t/data/S1.bam\tmnv\tchr2\t10\t11\tCA\t1\t2\tTT:2\tCA:1\t3"
        );
        assert_eq!(cell(&pileup), "TT:2,CA:1");

        let empty = pile(&config, "mnv\tchr2\t10\t11\n", "CA", &[])?;
        assert_eq!(cell(&empty), "-");
        Ok(())
    }

    #[test]
    fn test_totals_follow_novel_starts() -> Result<()> {
        let mut reads = Vec::new();
        for name in ["f1", "f2", "f3"] {
            reads.push(AlignedRead::new(name, "chr1", 100, "10M", "AAAAAAAAAA")?);
        }
        let reverse = AlignedRead::new("r1", "chr1", 100, "10M", "AAAAAAAAAA")?;
        reads.push(reverse.with_flags(flags::REVERSE));

        let config = Config::new().with_novel_starts(true);
        let pileup = pile(&config, "snp1\t1\t105\t105\n", "A", &reads)?;
        assert_eq!(pileup.counters().passed_filters, 4);
        assert_eq!(
            row(&pileup, Mode::Default, true),
            "S1\t/data/S1.bam\tsnp1\tchr1\t105\t105\tA\t2\t0\t1\t0\t0\t0\t0\t1\t1\t0\t0\t0\t0\t1"
        );
        assert_eq!(
            row(&pileup, Mode::Default, false),
            "S1\t/data/S1.bam\tsnp1\tchr1\t105\t105\tA\t2\t0\t2\t0\t0\t0\t0\t2"
        );
        Ok(())
    }

    #[test]
    fn test_compound_row() -> Result<()> {
        let reads = [
            AlignedRead::new("r1", "chr2", 10, "2M", "TT")?,
            AlignedRead::new("r2", "chr2", 10, "2M", "CA")?.with_flags(flags::REVERSE),
            AlignedRead::new("r3", "chr2", 10, "2M", "GA")?.with_flags(flags::REVERSE),
            AlignedRead::new("r4", "chr2", 10, "2M", "TT")?.with_flags(flags::REVERSE),
        ];
        let config = Config::new()
            .with_mode(Mode::Compound)
            .with_strand_specific(false);
        let pileup = pile(&config, "mnv\tchr2\t10\t11\tTT\n", "CA", &reads)?;
        assert_eq!(
            row(&pileup, Mode::Compound, false),
            "S1\t/data/S1.bam\tmnv\tchr2\t10\t11\tCA\tTT\t1\t0\t1\t0\t3\t1\t1\t1"
        );
        Ok(())
    }

    #[test]
    fn test_indel_check_row() -> Result<()> {
        let reads = [AlignedRead::new("r1", "chr1", 98, "2M1D2M", "ACGT")?];
        let config = Config::new().with_mode(Mode::IndelCheck);
        let pileup = pile(&config, "snp1\t1\t101\t101\n", "G", &reads)?;
        assert_eq!(row(&pileup, Mode::IndelCheck, true), "snp1\t1\t101\t101\tyes");
        Ok(())
    }

    #[test]
    fn test_headers() {
        let samples = Sample::from_paths(["a.bam", "b.bam"]);
        let default = header(Mode::Default, false, &[], &samples);
        assert_eq!(default[0], format!("##basepile version {}", VERSION));
        assert_eq!(
            default[1],
            "#Sample\tBAM\tID\tChr\tStart\tEnd\tRefBases\tTotalRef\tTotalNonRef\tA\tC\tG\tT\tN\tTotal"
        );
        let stranded = header(Mode::Default, true, &[], &samples);
        assert!(stranded[1].ends_with("\tAPos\tCPos\tGPos\tTPos\tNPos\tTotalPos\tANeg\tCNeg\tGNeg\tTNeg\tNNeg\tTotalNeg"));

        let positions = vec!["#version 2".to_string(), "Hugo_Symbol\tChr".to_string()];
        assert_eq!(
            header(Mode::IndelCheck, true, &positions, &samples),
            ["#version 2", "Hugo_Symbol\tChr\tIndel_Check"]
        );
        assert_eq!(
            header(Mode::Columns, true, &positions, &samples)[1..],
            ["#version 2", "#Hugo_Symbol\tChr\ta\tb"]
        );
        assert_eq!(
            header(Mode::Columns, true, &[], &samples)[1],
            "#Position\ta\tb"
        );
        assert!(header(Mode::Compound, true, &[], &samples)[1].ends_with("\tRefNeg\tAltNeg\tOtherNeg"));
    }
}
