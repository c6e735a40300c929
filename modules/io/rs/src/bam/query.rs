use std::io;

use eyre::{eyre, Result};
use noodles::{
    bam, bam::io::Reader, bgzf, core::region::Interval, csi,
    csi::binning_index::index::reference_sequence::bin::Chunk,
    sam::alignment::record::cigar::op::Kind,
    sam::alignment::Record as _,
};

use super::record::{AlignedRead, CigarOp};
use crate::ReadRecord;

/// Reads overlapping a region, fetched through the BAM index.
pub struct Query<'a, R> {
    reader: Reader<csi::io::Query<'a, R>>,
    reference_sequence_id: usize,
    interval: Interval,
    contigs: &'a [String],
    record: bam::Record,
    cigar: Vec<(CigarOp, u32)>,
}

impl<'a, R> Query<'a, R>
where
    R: bgzf::io::BufRead + bgzf::io::Seek,
{
    pub fn new(
        reader: &'a mut R,
        chunks: Vec<Chunk>,
        reference_sequence_id: usize,
        interval: Interval,
        contigs: &'a [String],
    ) -> Self {
        Self {
            reader: Reader::from(csi::io::Query::new(reader, chunks)),
            reference_sequence_id,
            interval,
            contigs,
            record: bam::Record::default(),
            cigar: Vec::new(),
        }
    }

    fn is_record_ok(&self) -> io::Result<bool> {
        match (
            self.record.reference_sequence_id().transpose()?,
            self.record.alignment_start().transpose()?,
            self.record.alignment_end().transpose()?,
        ) {
            (Some(id), Some(start), Some(end)) => {
                let alignment_interval = (start..=end).into();
                Ok(id == self.reference_sequence_id
                    && self.interval.intersects(alignment_interval))
            }
            _ => Ok(false),
        }
    }
}

impl<R> ReadRecord for Query<'_, R>
where
    R: bgzf::io::BufRead + bgzf::io::Seek,
{
    type Record = AlignedRead;

    fn read_record(&mut self, into: &mut Self::Record) -> Result<bool> {
        loop {
            if self.reader.read_record(&mut self.record)? == 0 {
                return Ok(false);
            }
            if self.is_record_ok()? {
                decode(&self.record, self.contigs, &mut self.cigar, into)?;
                return Ok(true);
            }
        }
    }
}

/// All records of a BAM file in storage order.
pub struct Scan<'a, R> {
    reader: Reader<R>,
    contigs: &'a [String],
    record: bam::Record,
    cigar: Vec<(CigarOp, u32)>,
}

impl<'a, R> Scan<'a, R> {
    /// The reader must be positioned right after the header.
    pub fn new(reader: Reader<R>, contigs: &'a [String]) -> Self {
        Self {
            reader,
            contigs,
            record: bam::Record::default(),
            cigar: Vec::new(),
        }
    }
}

impl<R: io::Read> ReadRecord for Scan<'_, R> {
    type Record = AlignedRead;

    fn read_record(&mut self, into: &mut Self::Record) -> Result<bool> {
        if self.reader.read_record(&mut self.record)? == 0 {
            return Ok(false);
        }
        decode(&self.record, self.contigs, &mut self.cigar, into)?;
        Ok(true)
    }
}

fn cigar_op(kind: Kind) -> CigarOp {
    match kind {
        Kind::Match => CigarOp::Match,
        Kind::Insertion => CigarOp::Insertion,
        Kind::Deletion => CigarOp::Deletion,
        Kind::Skip => CigarOp::Skip,
        Kind::SoftClip => CigarOp::SoftClip,
        Kind::HardClip => CigarOp::HardClip,
        Kind::Pad => CigarOp::Pad,
        Kind::SequenceMatch => CigarOp::SequenceMatch,
        Kind::SequenceMismatch => CigarOp::SequenceMismatch,
    }
}

fn decode(
    record: &bam::Record,
    contigs: &[String],
    cigar: &mut Vec<(CigarOp, u32)>,
    into: &mut AlignedRead,
) -> Result<()> {
    let contig = match record.reference_sequence_id().transpose()? {
        Some(id) => contigs
            .get(id)
            .map(|x| x.as_str())
            .ok_or_else(|| eyre!("Reference sequence ID {} is missing from the header", id))?,
        None => "",
    };
    let start = record
        .alignment_start()
        .transpose()?
        .map(|x| usize::from(x) as u64)
        .unwrap_or(0);
    let name = record.name().map(|x| x.to_string()).unwrap_or_default();
    let mapq = record.mapping_quality().map(|x| x.get()).unwrap_or(255);

    cigar.clear();
    for op in record.cigar().iter() {
        let op = op?;
        cigar.push((cigar_op(op.kind()), op.len() as u32));
    }

    into.set(
        &name,
        contig,
        start,
        u16::from(record.flags()),
        mapq,
        cigar.drain(..),
        record.sequence().iter(),
        record.quality_scores().as_ref(),
    );
    Ok(())
}
