use basepile_core_rs::loc::{Interval, IntervalOp};
use basepile_io_rs::bam::{AlignedRead, CigarOp};
use eyre::{bail, ensure, eyre, Result};

/// Project the read onto a reference window.
///
/// The CIGAR is walked from the unclipped start of the read. Every aligned base that lands inside
/// the window is copied, along with its quality, to `bases` and `qualities` at the offset
/// `position - window.start`. Offsets without an aligned base stay zero. Returns `true` when every
/// offset of the window received a base.
///
/// Padding, a non-clip operator outside the aligned span of the read, or a CIGAR that runs past
/// the end of the sequence are errors.
pub fn deconvolve(
    read: &AlignedRead,
    window: &Interval<u64>,
    bases: &mut Vec<u8>,
    qualities: &mut Vec<u8>,
) -> Result<bool> {
    let length = window.len() as usize;
    bases.clear();
    bases.resize(length, 0);
    qualities.clear();
    qualities.resize(length, 0);

    let (aligned_start, aligned_end) = (*read.start() as i64, read.end() as i64);
    let (window_start, window_end) = (window.start() as i64, window.end() as i64);
    let (sequence, quals) = (read.sequence(), read.qualities());

    let mut refpos = read.unclipped_start();
    let mut readind = 0usize;
    for &(op, len) in read.cigar().iter() {
        match op {
            CigarOp::SoftClip => {
                refpos += len as i64;
                readind += len as usize;
                continue;
            }
            CigarOp::HardClip => {
                refpos += len as i64;
                continue;
            }
            CigarOp::Insertion => {
                readind += len as usize;
                continue;
            }
            CigarOp::Pad => bail!("Padding operator in CIGAR {}", read.cigar()),
            _ => {}
        }

        ensure!(
            aligned_start <= refpos && refpos <= aligned_end,
            "Reference position {} is outside of the aligned span {}-{} at {}{} (CIGAR {})",
            refpos,
            aligned_start,
            aligned_end,
            len,
            op.symbol(),
            read.cigar()
        );

        match op {
            CigarOp::Match | CigarOp::SequenceMatch | CigarOp::SequenceMismatch => {
                for _ in 0..len {
                    let base = *sequence.get(readind).ok_or_else(|| {
                        eyre!(
                            "Read index {} is past the end of the sequence ({} bases, CIGAR {})",
                            readind,
                            sequence.len(),
                            read.cigar()
                        )
                    })?;
                    if window_start <= refpos && refpos <= window_end {
                        let offset = (refpos - window_start) as usize;
                        bases[offset] = base;
                        // Missing qualities are treated as the lowest possible score
                        qualities[offset] = quals.get(readind).copied().unwrap_or(0);
                    }
                    readind += 1;
                    refpos += 1;
                }
            }
            _ => refpos += len as i64,
        }
    }

    Ok(bases.iter().all(|x| *x != 0))
}

/// Check if the read carries an insertion right before the position or a deletion flanking it.
pub fn indel_adjacent(read: &AlignedRead, position: u64) -> bool {
    if !read.cigar().contains(CigarOp::Insertion) && !read.cigar().contains(CigarOp::Deletion) {
        return false;
    }

    let position = position as i64;
    let mut refpos = *read.start() as i64;
    for &(op, len) in read.cigar().iter() {
        let len = len as i64;
        match op {
            CigarOp::Deletion if position == refpos - 1 || position == refpos + len => return true,
            CigarOp::Insertion if position == refpos => return true,
            _ => {}
        }
        if op.consumes_reference() {
            refpos += len;
        }
    }
    false
}
