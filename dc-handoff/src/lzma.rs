//! LZMA Payload Decompression
//!
//! Payloads may be stored as raw LZMA streams: a 13-byte header (properties
//! byte, dictionary size, uncompressed size) followed by range-coded data.
//! The whole image is expanded into one buffer, which also serves as the
//! dictionary. The uncompressed size must be recorded in the header; the
//! decoder stops once it has produced that many bytes.
//!
//! Only `lc + lp <= 3` is accepted, which keeps the literal tables a fixed
//! size and covers the streams the standard tools produce.

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use dc_elf::header::ELF_MAGIC;
use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Size of the stream header
pub const HEADER_SIZE: usize = size_of::<StreamHeader>();

/// Largest `lc + lp` accepted
pub const MAX_LITERAL_BITS: u32 = 3;

const PROB_BITS: u32 = 11;
const PROB_INIT: u16 = 1 << (PROB_BITS - 1);
const MOVE_BITS: u32 = 5;
const TOP: u32 = 1 << 24;

const STATES: usize = 12;
const POS_STATES_MAX: usize = 1 << 4;
const LEN_TO_POS_STATES: usize = 4;
const END_POS_MODEL_INDEX: u32 = 14;
const FULL_DISTANCES: usize = 1 << (END_POS_MODEL_INDEX >> 1);
const ALIGN_BITS: u32 = 4;
const MATCH_MIN_LEN: usize = 2;
const LITERAL_CODER_SIZE: usize = 0x300;
const END_MARKER: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone, Copy, FromBytes, Immutable, KnownLayout)]
struct StreamHeader {
    properties: u8,
    dict_size: U32,
    unpacked_size: U64,
}

const _: () = assert!(HEADER_SIZE == 13);

/// Errors raised while expanding a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LzmaError {
    /// Input ends before the header or the coded data does
    Truncated,
    /// Properties byte is out of range or needs too large literal tables
    BadProperties,
    /// Header does not record the uncompressed size
    UnknownSize,
    /// Uncompressed size cannot be allocated
    TooLarge,
    /// Coded data is inconsistent
    Corrupt,
}

impl fmt::Display for LzmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated lzma stream"),
            Self::BadProperties => write!(f, "unsupported lzma properties"),
            Self::UnknownSize => write!(f, "lzma stream does not record its size"),
            Self::TooLarge => write!(f, "lzma stream too large to expand"),
            Self::Corrupt => write!(f, "corrupt lzma stream"),
        }
    }
}

/// Literal context, literal position and position bit counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Properties {
    pub lc: u32,
    pub lp: u32,
    pub pb: u32,
}

impl Properties {
    /// Decode the properties byte.
    pub fn decode(byte: u8) -> Result<Self, LzmaError> {
        if byte >= 9 * 5 * 5 {
            return Err(LzmaError::BadProperties);
        }
        let byte = u32::from(byte);
        let props = Self {
            lc: byte % 9,
            lp: (byte / 9) % 5,
            pb: byte / 45,
        };
        if props.lc + props.lp > MAX_LITERAL_BITS {
            return Err(LzmaError::BadProperties);
        }
        Ok(props)
    }
}

/// Uncompressed size recorded in the header of `src`.
pub fn expanded_size(src: &[u8]) -> Result<usize, LzmaError> {
    let (header, _) = StreamHeader::read_from_prefix(src).map_err(|_| LzmaError::Truncated)?;
    let size = header.unpacked_size.get();
    if size == u64::MAX {
        return Err(LzmaError::UnknownSize);
    }
    usize::try_from(size).map_err(|_| LzmaError::TooLarge)
}

/// Expand the stream in `src`.
pub fn decompress(src: &[u8]) -> Result<Vec<u8>, LzmaError> {
    let (header, coded) = StreamHeader::read_from_prefix(src).map_err(|_| LzmaError::Truncated)?;
    let props = Properties::decode(header.properties)?;
    let size = expanded_size(src)?;
    log::debug!(
        "lzma: lc={} lp={} pb={}, dictionary {:#x}, {} bytes",
        props.lc,
        props.lp,
        props.pb,
        header.dict_size.get(),
        size
    );

    let mut out = Vec::new();
    out.try_reserve_exact(size).map_err(|_| LzmaError::TooLarge)?;
    if size == 0 {
        return Ok(out);
    }
    Decoder::new(props, RangeDecoder::new(coded)?).run(&mut out, size)?;
    Ok(out)
}

/// Expand `image` if it is an LZMA stream. ELF images are returned as they are.
pub fn unpack_payload(image: Vec<u8>) -> Result<Vec<u8>, LzmaError> {
    if image.starts_with(&ELF_MAGIC) {
        return Ok(image);
    }
    let expanded = decompress(&image)?;
    log::info!("Expanded payload from {} to {} bytes", image.len(), expanded.len());
    Ok(expanded)
}

struct RangeDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    range: u32,
    code: u32,
}

impl<'a> RangeDecoder<'a> {
    fn new(data: &'a [u8]) -> Result<Self, LzmaError> {
        let Some(&[first, b1, b2, b3, b4]) = data.first_chunk::<5>() else {
            return Err(LzmaError::Truncated);
        };
        let code = u32::from_be_bytes([b1, b2, b3, b4]);
        if first != 0 || code == u32::MAX {
            return Err(LzmaError::Corrupt);
        }
        Ok(Self {
            data,
            pos: 5,
            range: u32::MAX,
            code,
        })
    }

    fn normalize(&mut self) -> Result<(), LzmaError> {
        if self.range < TOP {
            let byte = *self.data.get(self.pos).ok_or(LzmaError::Truncated)?;
            self.pos += 1;
            self.range <<= 8;
            self.code = (self.code << 8) | u32::from(byte);
        }
        Ok(())
    }

    fn bit(&mut self, prob: &mut u16) -> Result<u32, LzmaError> {
        let bound = (self.range >> PROB_BITS) * u32::from(*prob);
        let bit = if self.code < bound {
            *prob += ((1 << PROB_BITS) - *prob) >> MOVE_BITS;
            self.range = bound;
            0
        } else {
            *prob -= *prob >> MOVE_BITS;
            self.code -= bound;
            self.range -= bound;
            1
        };
        self.normalize()?;
        Ok(bit)
    }

    fn direct_bits(&mut self, count: u32) -> Result<u32, LzmaError> {
        let mut result = 0;
        for _ in 0..count {
            self.range >>= 1;
            let bit = if self.code >= self.range {
                self.code -= self.range;
                1
            } else {
                0
            };
            self.normalize()?;
            result = (result << 1) | bit;
        }
        Ok(result)
    }

    /// Most significant bit first; `probs[1..1 << bits]` are used.
    fn bit_tree(&mut self, probs: &mut [u16], bits: u32) -> Result<u32, LzmaError> {
        let mut m = 1usize;
        for _ in 0..bits {
            m = (m << 1) | self.bit(&mut probs[m])? as usize;
        }
        Ok((m - (1 << bits)) as u32)
    }

    /// Least significant bit first; `probs[1..1 << bits]` are used.
    fn reverse_bit_tree(&mut self, probs: &mut [u16], bits: u32) -> Result<u32, LzmaError> {
        let mut m = 1usize;
        let mut symbol = 0;
        for i in 0..bits {
            let bit = self.bit(&mut probs[m])?;
            m = (m << 1) | bit as usize;
            symbol |= bit << i;
        }
        Ok(symbol)
    }
}

struct LenDecoder {
    choice: u16,
    choice2: u16,
    low: [[u16; 1 << 3]; POS_STATES_MAX],
    mid: [[u16; 1 << 3]; POS_STATES_MAX],
    high: [u16; 1 << 8],
}

impl LenDecoder {
    const fn new() -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; 1 << 3]; POS_STATES_MAX],
            mid: [[PROB_INIT; 1 << 3]; POS_STATES_MAX],
            high: [PROB_INIT; 1 << 8],
        }
    }

    fn decode(&mut self, rc: &mut RangeDecoder<'_>, pos_state: usize) -> Result<usize, LzmaError> {
        let len = if rc.bit(&mut self.choice)? == 0 {
            rc.bit_tree(&mut self.low[pos_state], 3)?
        } else if rc.bit(&mut self.choice2)? == 0 {
            8 + rc.bit_tree(&mut self.mid[pos_state], 3)?
        } else {
            16 + rc.bit_tree(&mut self.high, 8)?
        };
        Ok(len as usize)
    }
}

struct Decoder<'a> {
    rc: RangeDecoder<'a>,
    lc: u32,
    lp_mask: usize,
    pb_mask: usize,
    literal: [u16; LITERAL_CODER_SIZE << MAX_LITERAL_BITS],
    is_match: [u16; STATES * POS_STATES_MAX],
    is_rep: [u16; STATES],
    is_rep_g0: [u16; STATES],
    is_rep_g1: [u16; STATES],
    is_rep_g2: [u16; STATES],
    is_rep0_long: [u16; STATES * POS_STATES_MAX],
    pos_slot: [[u16; 1 << 6]; LEN_TO_POS_STATES],
    pos_special: [u16; 1 + FULL_DISTANCES - END_POS_MODEL_INDEX as usize],
    align: [u16; 1 << ALIGN_BITS],
    len: LenDecoder,
    rep_len: LenDecoder,
}

impl<'a> Decoder<'a> {
    fn new(props: Properties, rc: RangeDecoder<'a>) -> Self {
        Self {
            rc,
            lc: props.lc,
            lp_mask: (1 << props.lp) - 1,
            pb_mask: (1 << props.pb) - 1,
            literal: [PROB_INIT; LITERAL_CODER_SIZE << MAX_LITERAL_BITS],
            is_match: [PROB_INIT; STATES * POS_STATES_MAX],
            is_rep: [PROB_INIT; STATES],
            is_rep_g0: [PROB_INIT; STATES],
            is_rep_g1: [PROB_INIT; STATES],
            is_rep_g2: [PROB_INIT; STATES],
            is_rep0_long: [PROB_INIT; STATES * POS_STATES_MAX],
            pos_slot: [[PROB_INIT; 1 << 6]; LEN_TO_POS_STATES],
            pos_special: [PROB_INIT; 1 + FULL_DISTANCES - END_POS_MODEL_INDEX as usize],
            align: [PROB_INIT; 1 << ALIGN_BITS],
            len: LenDecoder::new(),
            rep_len: LenDecoder::new(),
        }
    }

    /// Decode until `out` holds `size` bytes. `rep0` and friends hold
    /// distances minus one.
    fn run(&mut self, out: &mut Vec<u8>, size: usize) -> Result<(), LzmaError> {
        let (mut rep0, mut rep1, mut rep2, mut rep3) = (0usize, 0usize, 0usize, 0usize);
        let mut state = 0usize;

        while out.len() < size {
            let pos_state = out.len() & self.pb_mask;

            if self.rc.bit(&mut self.is_match[(state << 4) + pos_state])? == 0 {
                self.literal(out, state, rep0)?;
                state = match state {
                    0..=3 => 0,
                    4..=9 => state - 3,
                    _ => state - 6,
                };
                continue;
            }

            let len;
            if self.rc.bit(&mut self.is_rep[state])? != 0 {
                if out.is_empty() {
                    return Err(LzmaError::Corrupt);
                }
                if self.rc.bit(&mut self.is_rep_g0[state])? == 0 {
                    if self.rc.bit(&mut self.is_rep0_long[(state << 4) + pos_state])? == 0 {
                        state = if state < 7 { 9 } else { 11 };
                        let byte = back(out, rep0)?;
                        out.push(byte);
                        continue;
                    }
                } else {
                    let dist;
                    if self.rc.bit(&mut self.is_rep_g1[state])? == 0 {
                        dist = rep1;
                    } else {
                        if self.rc.bit(&mut self.is_rep_g2[state])? == 0 {
                            dist = rep2;
                        } else {
                            dist = rep3;
                            rep3 = rep2;
                        }
                        rep2 = rep1;
                    }
                    rep1 = rep0;
                    rep0 = dist;
                }
                len = self.rep_len.decode(&mut self.rc, pos_state)?;
                state = if state < 7 { 8 } else { 11 };
            } else {
                rep3 = rep2;
                rep2 = rep1;
                rep1 = rep0;
                len = self.len.decode(&mut self.rc, pos_state)?;
                state = if state < 7 { 7 } else { 10 };
                let dist = self.distance(len)?;
                if dist == END_MARKER {
                    log::warn!("lzma: end marker after {} of {} bytes", out.len(), size);
                    return Err(LzmaError::Corrupt);
                }
                rep0 = dist as usize;
                if rep0 >= out.len() {
                    return Err(LzmaError::Corrupt);
                }
            }

            let len = (len + MATCH_MIN_LEN).min(size - out.len());
            let start = out.len().checked_sub(rep0 + 1).ok_or(LzmaError::Corrupt)?;
            for i in 0..len {
                // Each push keeps `start + i` behind the end
                let byte = out[start + i];
                out.push(byte);
            }
        }
        Ok(())
    }

    fn literal(&mut self, out: &mut Vec<u8>, state: usize, rep0: usize) -> Result<(), LzmaError> {
        let prev = usize::from(out.last().copied().unwrap_or(0));
        let lit_state = ((out.len() & self.lp_mask) << self.lc) + (prev >> (8 - self.lc));
        let base = LITERAL_CODER_SIZE * lit_state;
        let probs = &mut self.literal[base..base + LITERAL_CODER_SIZE];

        let mut symbol = 1usize;
        if state >= 7 {
            let mut match_byte = usize::from(back(out, rep0)?);
            loop {
                let match_bit = (match_byte >> 7) & 1;
                match_byte <<= 1;
                let bit = self.rc.bit(&mut probs[((1 + match_bit) << 8) + symbol])? as usize;
                symbol = (symbol << 1) | bit;
                if match_bit != bit || symbol >= 0x100 {
                    break;
                }
            }
        }
        while symbol < 0x100 {
            symbol = (symbol << 1) | self.rc.bit(&mut probs[symbol])? as usize;
        }
        out.push((symbol - 0x100) as u8);
        Ok(())
    }

    fn distance(&mut self, len: usize) -> Result<u32, LzmaError> {
        let len_state = len.min(LEN_TO_POS_STATES - 1);
        let slot = self.rc.bit_tree(&mut self.pos_slot[len_state], 6)?;
        if slot < 4 {
            return Ok(slot);
        }

        let direct = (slot >> 1) - 1;
        let mut dist = (2 | (slot & 1)) << direct;
        if slot < END_POS_MODEL_INDEX {
            let base = (dist - slot) as usize;
            dist += self.rc.reverse_bit_tree(&mut self.pos_special[base..], direct)?;
        } else {
            dist += self.rc.direct_bits(direct - ALIGN_BITS)? << ALIGN_BITS;
            dist += self.rc.reverse_bit_tree(&mut self.align, ALIGN_BITS)?;
        }
        Ok(dist)
    }
}

/// The byte `rep + 1` positions back from the end of `out`.
fn back(out: &[u8], rep: usize) -> Result<u8, LzmaError> {
    out.len()
        .checked_sub(rep + 1)
        .map(|at| out[at])
        .ok_or(LzmaError::Corrupt)
}
