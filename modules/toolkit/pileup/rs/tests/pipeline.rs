use std::path::{Path, PathBuf};
use std::sync::Arc;

use basepile_io_rs::bam::{self, flags, AlignedRead, FlagFilter};
use basepile_io_rs::fasta;
use basepile_io_rs::positions::{Format, PositionFile};
use basepile_pileup_rs::format::VERSION;
use basepile_pileup_rs::pipeline::spill_path;
use basepile_pileup_rs::{Config, Mode, Pipeline, Profile, Sample, Strategy, Variant};
use eyre::{eyre, Result};

fn reference() -> fasta::InMemory {
    let mut reference = fasta::InMemory::new();
    reference
        .insert("chr1", "ACGT".repeat(50))
        .insert("chr2", "ACGT".repeat(50))
        .insert("chr3", "ACGT".repeat(50))
        .insert("chr10", "A".repeat(50));
    reference
}

fn variants(lines: &str) -> Result<(Vec<String>, Vec<Arc<Variant>>)> {
    let positions = PositionFile::read(lines.as_bytes(), Format::Tab)?;
    let variants = Variant::load(&positions, &mut reference())?;
    Ok((positions.header().clone(), variants))
}

fn run(
    config: Config,
    lines: &str,
    alignments: bam::InMemory,
    samples: Vec<Arc<Sample>>,
    output: &Path,
) -> Result<()> {
    let (header, variants) = variants(lines)?;
    Pipeline::new(config, variants, samples, Arc::new(alignments))?
        .with_header(header)
        .run(output)
}

/// Header columns and data rows of a result file.
fn table(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let content = std::fs::read_to_string(path)?;
    let mut lines = content.lines();
    let version = lines.next().ok_or_else(|| eyre!("Empty output"))?;
    assert_eq!(version, format!("##basepile version {}", VERSION));

    let header = lines
        .next()
        .and_then(|x| x.strip_prefix('#'))
        .ok_or_else(|| eyre!("Missing header"))?;
    let columns = header.split('\t').map(|x| x.to_string()).collect();
    let rows = lines
        .map(|line| line.split('\t').map(|x| x.to_string()).collect())
        .collect();
    Ok((columns, rows))
}

fn column<'a>(columns: &[String], row: &'a [String], name: &str) -> &'a str {
    let ind = columns.iter().position(|x| x == name).unwrap();
    &row[ind]
}

/// Three samples with reads on chr1-chr3, the second one using bare contig names.
fn dataset() -> Result<(bam::InMemory, Vec<Arc<Sample>>)> {
    let paths = ["S1.bam", "S2.bam", "S3.bam"];
    let mut alignments = bam::InMemory::new();
    for (ind, path) in paths.iter().enumerate() {
        let mut reads = Vec::new();
        for contig in ["chr1", "chr2", "chr3"] {
            let contig = if ind == 1 { &contig[3..] } else { contig };
            for start in (1..150u64).step_by(7 + ind) {
                let sequence: String = (0..20)
                    .map(|x| b"ACGT"[(start as usize + x * (ind + 1)) % 4] as char)
                    .collect();
                let cigar = if start % 3 == 0 { "8M2D12M" } else { "20M" };
                let strand = if start % 2 == 0 { flags::REVERSE } else { 0 };
                let read = AlignedRead::new(
                    format!("{}-{}", contig, start),
                    contig,
                    start,
                    cigar,
                    &sequence,
                )?
                .with_flags(strand);
                reads.push(read);
            }
        }
        // Unplaced reads come last
        reads.push(AlignedRead::default());
        alignments.insert(*path, reads);
    }
    Ok((alignments, Sample::from_paths(paths)))
}

const POSITIONS: &str = "\
v1\tchr1\t10\t10
v2\tchr2\t55\t57
v3\tchr1\t100\t100
v4\tchr3\t33\t33
v5\tchr10\t5\t5
v6\tchr1\t10\t10
v7\tchr2\t140\t141
";

fn single_read(read: AlignedRead) -> (bam::InMemory, Vec<Arc<Sample>>) {
    let mut alignments = bam::InMemory::new();
    alignments.insert("S1.bam", vec![read]);
    (alignments, Sample::from_paths(["S1.bam"]))
}

#[test]
fn test_base_quality_gate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = Config::new()
        .with_min_base_quality(Some(20))
        .with_strand_specific(false);
    // chr1:101 is 'A'
    let read = AlignedRead::new("r1", "chr1", 95, "10M", "CCCCCCACCC")?;

    // Quality 30 passes the filter
    let output = dir.path().join("pass.txt");
    let (alignments, samples) = single_read(read.clone());
    run(config.clone(), "v1\tchr1\t101\t101\n", alignments, samples, &output)?;

    let (columns, rows) = table(&output)?;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    for (name, expected) in [
        ("Sample", "S1"),
        ("ID", "v1"),
        ("Chr", "chr1"),
        ("Start", "101"),
        ("RefBases", "A"),
        ("A", "1"),
        ("C", "0"),
        ("G", "0"),
        ("T", "0"),
        ("N", "0"),
        ("Total", "1"),
        ("TotalRef", "1"),
        ("TotalNonRef", "0"),
    ] {
        assert_eq!(column(&columns, row, name), expected, "{}", name);
    }

    // Quality 10 does not
    let output = dir.path().join("fail.txt");
    let (alignments, samples) = single_read(read.with_qualities(vec![10; 10])?);
    run(config, "v1\tchr1\t101\t101\n", alignments, samples, &output)?;

    let (columns, rows) = table(&output)?;
    for name in ["A", "C", "G", "T", "N", "Total", "TotalRef", "TotalNonRef"] {
        assert_eq!(column(&columns, &rows[0], name), "0", "{}", name);
    }
    Ok(())
}

#[test]
fn test_deletion_inside_window() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // chr1:100-102 is "TAC"; the read skips 101
    let read = AlignedRead::new("r1", "chr1", 98, "3M1D3M", "CGTACG")?;
    let lines = "v1\tchr1\t100\t102\n";

    let output = dir.path().join("with-indels.txt");
    let (alignments, samples) = single_read(read.clone());
    let config = Config::new().with_strand_specific(false);
    run(config.clone(), lines, alignments, samples, &output)?;
    let (columns, rows) = table(&output)?;
    assert_eq!(column(&columns, &rows[0], "RefBases"), "TAC");
    // No keys were observed: the row ends with the total right after the ref/non-ref split
    assert_eq!(rows[0].len(), 10);
    assert_eq!(rows[0][9], "0");

    let output = dir.path().join("without-indels.txt");
    let (alignments, samples) = single_read(read);
    run(
        config.with_include_indels(false),
        lines,
        alignments,
        samples,
        &output,
    )?;
    let (_, rows) = table(&output)?;
    assert_eq!(rows[0][9], "0");
    Ok(())
}

#[test]
fn test_columns_fill_missing_chromosomes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut alignments = bam::InMemory::new();
    alignments
        .insert(
            "S1.bam",
            vec![AlignedRead::new("r1", "chr1", 5, "10M", "AAAAAAAAAA")?],
        )
        .insert(
            "S2.bam",
            vec![AlignedRead::new("r2", "chr1", 45, "10M", "CCCCCCCCCC")?],
        )
        .insert(
            "S3.bam",
            vec![
                AlignedRead::new("r3", "chr3", 25, "10M", "GGGGGGGGGG")?,
                AlignedRead::new("r4", "chr3", 35, "10M", "TTTTTTTTTT")?,
            ],
        );
    let samples = Sample::from_paths(["S1.bam", "S2.bam", "S3.bam"]);
    let lines = "p1\tchr1\t10\t10\np2\tchr1\t50\t50\np3\tchr2\t20\t20\np4\tchr3\t30\t30\np5\tchr3\t40\t40\n";

    let output = dir.path().join("columns.txt");
    let config = Config::new()
        .with_mode(Mode::Columns)
        .with_strategy(Strategy::Scan)
        .with_threads(3);
    run(config, lines, alignments, samples, &output)?;

    let zero = "0,0,0,0,0";
    let expected = [
        format!("##basepile version {}", VERSION),
        "#Position\tS1\tS2\tS3".to_string(),
        format!("p1\tchr1\t10\t10\t1,0,0,0,0\t{}\t{}", zero, zero),
        format!("p2\tchr1\t50\t50\t{}\t0,1,0,0,0\t{}", zero, zero),
        format!("p3\tchr2\t20\t20\t{}\t{}\t{}", zero, zero, zero),
        format!("p4\tchr3\t30\t30\t{}\t{}\t0,0,1,0,0", zero, zero),
        format!("p5\tchr3\t40\t40\t{}\t{}\t0,0,0,1,0", zero, zero),
    ];
    let content = std::fs::read_to_string(&output)?;
    assert_eq!(content.lines().collect::<Vec<_>>(), expected);
    Ok(())
}

#[test]
fn test_strategies_agree() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut outputs = Vec::new();
    for strategy in [Strategy::Probe, Strategy::Scan, Strategy::PerVariant] {
        let (alignments, samples) = dataset()?;
        let output = dir.path().join(format!("{}.txt", strategy));
        let config = Config::new().with_strategy(strategy).with_threads(2);
        run(config, POSITIONS, alignments, samples, &output)?;
        outputs.push(std::fs::read_to_string(&output)?);
    }

    // 7 positions in 3 samples
    assert_eq!(outputs[0].lines().count(), 2 + 7 * 3);
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], outputs[2]);

    // Rows follow the natural order of chromosomes, then the sample order
    let (columns, rows) = table(&dir.path().join("probe.txt"))?;
    let order: Vec<_> = rows
        .iter()
        .map(|x| {
            (
                column(&columns, x, "ID").to_string(),
                column(&columns, x, "Sample").to_string(),
            )
        })
        .collect();
    assert_eq!(order[0], ("v1".to_string(), "S1".to_string()));
    assert_eq!(order[2], ("v1".to_string(), "S3".to_string()));
    assert_eq!(order[3], ("v6".to_string(), "S1".to_string()));
    assert_eq!(order[20], ("v5".to_string(), "S3".to_string()));

    // Nothing aligns to chr10
    for row in &rows[18..] {
        assert_eq!(column(&columns, row, "TotalPos"), "0");
        assert_eq!(column(&columns, row, "TotalNeg"), "0");
    }
    Ok(())
}

#[test]
fn test_thread_count_does_not_change_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for strategy in [Strategy::Probe, Strategy::Scan, Strategy::PerVariant] {
        let mut outputs = Vec::new();
        for threads in [1, 8] {
            let (alignments, samples) = dataset()?;
            let output = dir.path().join(format!("{}-{}.txt", strategy, threads));
            let config = Config::new()
                .with_strategy(strategy)
                .with_threads(threads)
                .with_queue_capacity(2);
            run(config, POSITIONS, alignments, samples, &output)?;
            outputs.push(std::fs::read_to_string(&output)?);
        }
        assert_eq!(outputs[0], outputs[1], "{}", strategy);
    }
    Ok(())
}

#[test]
fn test_novel_start_totals() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // chr1:105 is 'A'
    let forward = [
        ("f1", 100, "AAAAAAAAAA"),
        ("f2", 100, "AAAAAAAAAA"),
        ("f3", 102, "AAAAAAAAAA"),
        ("f4", 101, "AAAACAAAAA"),
    ];
    let reverse = [("r1", 100), ("r2", 96), ("r3", 96)];

    let mut reads = Vec::new();
    for (name, start, sequence) in forward {
        reads.push(AlignedRead::new(name, "chr1", start, "10M", sequence)?);
    }
    for (name, start) in reverse {
        let read = AlignedRead::new(name, "chr1", start, "10M", "AAAAAAAAAA")?;
        reads.push(read.with_flags(flags::REVERSE));
    }

    for strand_specific in [false, true] {
        let output = dir.path().join(format!("novel-{}.txt", strand_specific));
        let config = Profile::Rna
            .apply(Config::new())
            .with_strand_specific(strand_specific);
        let mut alignments = bam::InMemory::new();
        alignments.insert("S1.bam", reads.clone());
        let samples = Sample::from_paths(["S1.bam"]);
        run(config, "v1\tchr1\t105\t105\n", alignments, samples, &output)?;

        let (columns, rows) = table(&output)?;
        let row = &rows[0];
        let count = |name: &str| -> Result<u64> { Ok(column(&columns, row, name).parse()?) };
        if strand_specific {
            // Starts 100, 101 and 102 forward; 5' ends 105 and 109 reverse
            for (suffix, a, c) in [("Pos", 2, 1), ("Neg", 2, 0)] {
                assert_eq!(count(&format!("A{}", suffix))?, a);
                assert_eq!(count(&format!("C{}", suffix))?, c);
                let sum = ["A", "C", "G", "T", "N"]
                    .into_iter()
                    .map(|x| count(&format!("{}{}", x, suffix)))
                    .sum::<Result<u64>>()?;
                assert_eq!(count(&format!("Total{}", suffix))?, sum);
            }
        } else {
            assert_eq!(count("A")?, 4);
            assert_eq!(count("C")?, 1);
            let sum = ["A", "C", "G", "T", "N"]
                .into_iter()
                .map(|x| count(x))
                .sum::<Result<u64>>()?;
            assert_eq!(sum, 5);
            assert_eq!(count("Total")?, sum);
            assert_eq!(count("TotalRef")? + count("TotalNonRef")?, sum);
        }
    }
    Ok(())
}

#[test]
fn test_indel_check_rows() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut alignments = bam::InMemory::new();
    alignments.insert(
        "S1.bam",
        vec![
            // Insertion between 102 and 103
            AlignedRead::new("r1", "chr1", 100, "3M2I3M", "ACGTTACG")?,
            AlignedRead::new("r2", "chr1", 110, "20M", "GTACGTACGTACGTACGTAC")?,
            // Deletion of 141-142 right after the window start
            AlignedRead::new("r3", "chr1", 137, "4M2D3M", "ACGTGTA")?,
        ],
    );
    let lines = "v1\tchr1\t103\t103\nv2\tchr1\t120\t120\nv3\tchr1\t140\t141\n";
    let output = dir.path().join("indels.txt");
    run(
        Config::new().with_mode(Mode::IndelCheck),
        lines,
        alignments,
        Sample::from_paths(["S1.bam"]),
        &output,
    )?;

    let content = std::fs::read_to_string(&output)?;
    assert_eq!(
        content.lines().collect::<Vec<_>>(),
        [
            "v1\tchr1\t103\t103\tyes",
            "v2\tchr1\t120\t120\t",
            "v3\tchr1\t140\t141\tyes",
        ]
    );
    Ok(())
}

#[test]
fn test_read_filter() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (alignments, samples) = dataset()?;
    let (header, variants) = variants(POSITIONS)?;

    let output = dir.path().join("forward.txt");
    Pipeline::new(Config::new(), variants, samples, Arc::new(alignments))?
        .with_header(header)
        .with_filter(Arc::new(FlagFilter::new().with_exclude(flags::REVERSE)))
        .run(&output)?;

    let (columns, rows) = table(&output)?;
    let single_base: Vec<_> = rows
        .iter()
        .filter(|x| column(&columns, x, "Start") == column(&columns, x, "End"))
        .collect();
    assert_eq!(single_base.len(), 5 * 3);
    for row in &single_base {
        assert_eq!(column(&columns, row, "TotalNeg"), "0");
    }
    assert!(single_base
        .iter()
        .any(|row| column(&columns, row, "TotalPos") != "0"));
    Ok(())
}

#[test]
fn test_early_writer_exit_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output: PathBuf = dir.path().join("partial.txt");
    let (alignments, samples) = dataset()?;
    let config = Config::new().with_stop_sink_after(Some(2));

    let result = run(config, POSITIONS, alignments, samples, &output);
    assert!(result.is_err());
    assert!(!output.exists());
    assert!(!spill_path(&output).exists());
    Ok(())
}

#[test]
fn test_unsorted_scan_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut alignments = bam::InMemory::new();
    alignments.insert(
        "S1.bam",
        vec![
            AlignedRead::new("r1", "chr1", 5, "10M", "AAAAAAAAAA")?,
            AlignedRead::new("r2", "chr2", 5, "10M", "AAAAAAAAAA")?,
            AlignedRead::new("r3", "chr1", 50, "10M", "AAAAAAAAAA")?,
        ],
    );
    let output = dir.path().join("unsorted.txt");
    let config = Config::new().with_strategy(Strategy::Scan);
    let err = run(
        config,
        POSITIONS,
        alignments,
        Sample::from_paths(["S1.bam"]),
        &output,
    )
    .unwrap_err();

    assert!(format!("{:?}", err).contains("not sorted"));
    assert!(!output.exists());
    Ok(())
}

#[test]
fn test_missing_alignments_fail() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (alignments, _) = dataset()?;
    let samples = Sample::from_paths(["S1.bam", "missing.bam"]);
    let output = dir.path().join("missing.txt");

    let err = run(Config::new(), POSITIONS, alignments, samples, &output).unwrap_err();
    assert!(format!("{:?}", err).contains("missing.bam"));
    assert!(!output.exists());
    Ok(())
}

#[test]
fn test_compound_rows() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut alignments = bam::InMemory::new();
    // chr1:10 is 'C'
    alignments.insert(
        "S1.bam",
        vec![
            AlignedRead::new("r1", "chr1", 8, "5M", "GTCAC")?,
            AlignedRead::new("r2", "chr1", 9, "3M", "TTA")?.with_flags(flags::REVERSE),
            AlignedRead::new("r3", "chr1", 10, "2M", "GA")?.with_flags(flags::REVERSE),
        ],
    );
    let output = dir.path().join("compound.txt");
    run(
        Config::new().with_mode(Mode::Compound),
        "v1\tchr1\t10\t10\tT\n",
        alignments,
        Sample::from_paths(["S1.bam"]),
        &output,
    )?;

    let (columns, rows) = table(&output)?;
    for (name, expected) in [
        ("RefBases", "C"),
        ("AltBases", "T"),
        ("TotalPos", "1"),
        ("RefPos", "1"),
        ("AltPos", "0"),
        ("OtherPos", "0"),
        ("TotalNeg", "2"),
        ("RefNeg", "0"),
        ("AltNeg", "1"),
        ("OtherNeg", "1"),
    ] {
        assert_eq!(column(&columns, &rows[0], name), expected, "{}", name);
    }
    Ok(())
}
