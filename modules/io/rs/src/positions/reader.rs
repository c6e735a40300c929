use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use basepile_core_rs::loc::Interval;
use derive_getters::{Dissolve, Getters};
use eyre::{bail, ensure, OptionExt, Report, Result, WrapErr};

use super::is_header;
use crate::ReadRecord;

/// Layout of a position file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Format {
    /// name, chromosome, start, end[, alt]
    #[default]
    Tab,
    /// DCC1 submission files: name in column 3, coordinates in columns 5-7
    Dcc1,
    /// Mutation annotation format: coordinates in columns 5-7, alt allele in column 13
    Maf,
    /// chromosome, position, id, ref, alt
    Vcf,
    /// name, chromosome, start, end, <ignored>, alt; at least 6 columns
    Columns,
}

impl FromStr for Format {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "tab" | "txt" => Self::Tab,
            "dcc1" | "dccq" => Self::Dcc1,
            "maf" => Self::Maf,
            "vcf" => Self::Vcf,
            "columns" => Self::Columns,
            _ => bail!("Unknown position file format: {}", s),
        })
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tab => "tab",
            Self::Dcc1 => "dcc1",
            Self::Maf => "maf",
            Self::Vcf => "vcf",
            Self::Columns => "columns",
        };
        write!(f, "{}", name)
    }
}

/// A single data line of a position file.
#[derive(Clone, PartialEq, Eq, Debug, Default, Dissolve, Getters)]
pub struct Position {
    // 0-based index among the data lines of the file
    ordinal: usize,
    name: String,
    // As written in the file, not normalized
    chromosome: String,
    interval: Interval<u64>,
    alt: Option<Vec<u8>>,
    line: String,
}

pub mod parse {
    use super::*;

    pub fn field<'a>(values: &[&'a str], column: usize, what: &str) -> Result<&'a str> {
        values
            .get(column)
            .copied()
            .filter(|x| !x.is_empty())
            .ok_or_else(|| eyre::eyre!("Missing {} (column {})", what, column + 1))
    }

    pub fn coordinate(values: &[&str], column: usize, what: &str) -> Result<u64> {
        let value = field(values, column, what)?;
        value
            .trim()
            .parse::<u64>()
            .wrap_err_with(|| format!("Invalid {}: {}", what, value))
    }

    pub fn interval(values: &[&str], start: usize, end: usize) -> Result<Interval<u64>> {
        let start = coordinate(values, start, "start")?;
        let end = coordinate(values, end, "end")?;
        Interval::new(start, end).wrap_err("Invalid position interval")
    }

    /// Alternative bases; "-", "." and empty values mean there are none.
    pub fn alt(value: Option<&str>) -> Option<Vec<u8>> {
        match value.map(str::trim) {
            None | Some("") | Some("-") | Some(".") => None,
            Some(x) => Some(x.to_ascii_uppercase().into_bytes()),
        }
    }

    /// Alternative bases from a "REF>ALT" mutation column.
    pub fn mutation(value: Option<&str>) -> Option<Vec<u8>> {
        alt(value.and_then(|x| x.split_once('>')).map(|(_, alt)| alt))
    }

    pub fn tab(values: &[&str]) -> Result<(String, String, Interval<u64>, Option<Vec<u8>>)> {
        Ok((
            field(values, 0, "name")?.to_string(),
            field(values, 1, "chromosome")?.to_string(),
            interval(values, 2, 3)?,
            alt(values.get(4).copied()),
        ))
    }

    pub fn columns(values: &[&str]) -> Result<(String, String, Interval<u64>, Option<Vec<u8>>)> {
        ensure!(
            values.len() >= 6,
            "Columnar position files require at least 6 columns, got {}",
            values.len()
        );
        let (name, chromosome, interval, _) = tab(values)?;
        Ok((name, chromosome, interval, alt(values.get(5).copied())))
    }

    pub fn dcc1(
        values: &[&str],
        mutation_column: Option<usize>,
    ) -> Result<(String, String, Interval<u64>, Option<Vec<u8>>)> {
        Ok((
            field(values, 2, "name")?.to_string(),
            field(values, 4, "chromosome")?.to_string(),
            interval(values, 5, 6)?,
            mutation(mutation_column.and_then(|x| values.get(x).copied())),
        ))
    }

    pub fn maf(values: &[&str]) -> Result<(String, String, Interval<u64>, Option<Vec<u8>>)> {
        Ok((
            field(values, 0, "name")?.to_string(),
            field(values, 4, "chromosome")?.to_string(),
            interval(values, 5, 6)?,
            alt(values.get(12).copied()),
        ))
    }

    pub fn vcf(values: &[&str]) -> Result<(String, String, Interval<u64>, Option<Vec<u8>>)> {
        let chromosome = field(values, 0, "chromosome")?.to_string();
        let start = coordinate(values, 1, "position")?;
        let reference = field(values, 3, "reference allele")?;
        let end = start + reference.len() as u64 - 1;
        let interval = Interval::new(start, end).wrap_err("Invalid VCF position")?;

        let name = match values.get(2).copied() {
            Some(id) if !id.is_empty() && id != "." => id.to_string(),
            _ => format!("{}:{}", chromosome, start),
        };
        let alt = alt(values.get(4).and_then(|x| x.split(',').next()));
        Ok((name, chromosome, interval, alt))
    }
}

/// Streaming reader over the data lines of a position file. Header lines are collected as they
/// are encountered.
pub struct Reader<R> {
    reader: R,
    format: Format,
    buffer: String,
    line_number: usize,
    ordinal: usize,
    mutation_column: Option<usize>,
    header: Vec<String>,
}

impl<R: BufRead> Reader<R> {
    pub fn new(reader: R, format: Format) -> Self {
        Self {
            reader,
            format,
            buffer: String::new(),
            line_number: 0,
            ordinal: 0,
            mutation_column: None,
            header: Vec::new(),
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn on_header(&mut self, line: &str) {
        if line.starts_with("analysis_id") {
            self.mutation_column = line.split('\t').position(|x| x == "mutation");
        }
        self.header.push(line.to_string());
    }

    fn parse(&self, line: &str) -> Result<(String, String, Interval<u64>, Option<Vec<u8>>)> {
        let values: Vec<&str> = line.split('\t').collect();
        match self.format {
            Format::Tab => parse::tab(&values),
            Format::Columns => parse::columns(&values),
            Format::Dcc1 => parse::dcc1(&values, self.mutation_column),
            Format::Maf => parse::maf(&values),
            Format::Vcf => parse::vcf(&values),
        }
    }
}

impl<R: BufRead> ReadRecord for Reader<R> {
    type Record = Position;

    fn read_record(&mut self, into: &mut Self::Record) -> Result<bool> {
        loop {
            self.buffer.clear();
            if self.reader.read_line(&mut self.buffer)? == 0 {
                return Ok(false);
            }
            self.line_number += 1;

            let line = std::mem::take(&mut self.buffer);
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.trim().is_empty() {
                self.buffer = line;
                continue;
            }
            if is_header(trimmed) {
                self.on_header(trimmed);
                self.buffer = line;
                continue;
            }

            let (name, chromosome, interval, alt) = self.parse(trimmed).wrap_err_with(|| {
                format!(
                    "Malformed {} position at line {}: {}",
                    self.format, self.line_number, trimmed
                )
            })?;
            *into = Position {
                ordinal: self.ordinal,
                name,
                chromosome,
                interval,
                alt,
                line: trimmed.to_string(),
            };
            self.ordinal += 1;
            self.buffer = line;
            return Ok(true);
        }
    }
}

/// Fully parsed position file.
#[derive(Clone, PartialEq, Eq, Debug, Default, Dissolve, Getters)]
pub struct PositionFile {
    format: Format,
    header: Vec<String>,
    positions: Vec<Position>,
}

impl PositionFile {
    pub fn read(reader: impl BufRead, format: Format) -> Result<Self> {
        let mut reader = Reader::new(reader, format);
        let mut positions = Vec::new();
        reader.read_to_end(&mut positions)?;
        Ok(Self {
            format,
            header: reader.header,
            positions,
        })
    }

    pub fn from_path(path: impl AsRef<Path>, format: Format) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .wrap_err_with(|| format!("Failed to open position file: {}", path.display()))?;
        Self::read(BufReader::new(file), format)
            .wrap_err_with(|| format!("Failed to parse position file: {}", path.display()))
    }

    /// Positions of the given chromosome (as written in the file).
    pub fn on(&self, chromosome: &str) -> impl Iterator<Item = &Position> {
        let chromosome = chromosome.to_string();
        self.positions
            .iter()
            .filter(move |x| x.chromosome == chromosome)
    }

    pub fn get(&self, ordinal: usize) -> Result<&Position> {
        self.positions
            .get(ordinal)
            .ok_or_eyre("Position ordinal is out of range")
    }
}
