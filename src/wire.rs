//! Wire framing: the fixed 55-byte header shared by every frame type, plus
//! per-type trailers, all little-endian as spec'd.
//!
//! ```text
//! type (u8) | uuid.cid.time (u64) | uuid.cid.rand (u64)
//!           | uuid.time (u64)     | uuid.rand (u64)
//!           | dest.time (u64)     | dest.rand (u64)   <- zero pair = broadcast
//!           | totalSize (u32)     | chunkSize (u16)
//! ```
//!
//! The `type` byte is matched modulo 16: the high nibble is reserved for
//! future protocol extensions and must be ignored by readers.

use crate::error::{ClusterError, Result};
use crate::identity::{ClusterIdentity, Uuid};

/// Size of the fixed header, in bytes.
pub const HEADER_LEN: usize = 1 + 8 * 6 + 4 + 2;

/// Frame type discriminants (matched modulo 16 against the wire byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// sender -> receiver: one chunk of a fragmented message.
    MessageChunk = 1,
    /// sender -> receiver: "tell me you got it".
    MessageReceiptRequest = 2,
    /// receiver -> sender: "got it, processed it".
    MessageReceipt = 3,
    /// receiver -> sender: list of missing chunk indices.
    MessageChunksNeeded = 4,
    /// receiver -> sender: list of missing chunk index ranges (inclusive).
    MessageChunkRangesNeeded = 5,
    /// sender -> receiver: "I no longer know this uuid".
    MessageNoLongerExists = 6,
}

impl FrameType {
    /// Recover a `FrameType` from a wire byte, matching modulo 16.
    pub fn from_wire_byte(byte: u8) -> Option<Self> {
        match byte % 16 {
            1 => Some(Self::MessageChunk),
            2 => Some(Self::MessageReceiptRequest),
            3 => Some(Self::MessageReceipt),
            4 => Some(Self::MessageChunksNeeded),
            5 => Some(Self::MessageChunkRangesNeeded),
            6 => Some(Self::MessageNoLongerExists),
            _ => None,
        }
    }
}

/// The fixed fields common to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Identifies the message (or, for control frames, the message the
    /// control frame refers to).
    pub uuid: Uuid,
    /// `None` means broadcast; `Some(id)` names the intended receiver.
    pub destination: Option<ClusterIdentity>,
    /// Total serialized size of the message this frame belongs to.
    pub total_size: u32,
    /// Chunk size used to fragment the message this frame belongs to.
    pub chunk_size: u16,
}

impl FrameHeader {
    /// Number of chunks a message of this header's `total_size` is split
    /// into, given `chunk_size`.
    pub fn total_chunks(&self) -> u32 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.total_size.div_ceil(self.chunk_size as u32)
    }

    fn write(&self, frame_type: u8, out: &mut Vec<u8>) {
        out.push(frame_type);
        out.extend_from_slice(&self.uuid.cluster_id.time.to_le_bytes());
        out.extend_from_slice(&self.uuid.cluster_id.rand.to_le_bytes());
        out.extend_from_slice(&self.uuid.time.to_le_bytes());
        out.extend_from_slice(&self.uuid.rand.to_le_bytes());
        let dest = self.destination.unwrap_or(ClusterIdentity::ZERO);
        out.extend_from_slice(&dest.time.to_le_bytes());
        out.extend_from_slice(&dest.rand.to_le_bytes());
        out.extend_from_slice(&self.total_size.to_le_bytes());
        out.extend_from_slice(&self.chunk_size.to_le_bytes());
    }

    fn read(buf: &[u8]) -> Result<(u8, Self)> {
        if buf.len() < HEADER_LEN {
            return Err(ClusterError::invalid_frame(format!(
                "datagram too short for header: {} < {HEADER_LEN}",
                buf.len()
            )));
        }
        let frame_type = buf[0];
        let mut off = 1;
        let mut next_u64 = || {
            let v = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
            off += 8;
            v
        };
        let cid_time = next_u64();
        let cid_rand = next_u64();
        let uuid_time = next_u64();
        let uuid_rand = next_u64();
        let dest_time = next_u64();
        let dest_rand = next_u64();
        let total_size = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let chunk_size = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());

        let dest = ClusterIdentity { time: dest_time, rand: dest_rand };
        let header = FrameHeader {
            uuid: Uuid {
                cluster_id: ClusterIdentity { time: cid_time, rand: cid_rand },
                time: uuid_time,
                rand: uuid_rand,
            },
            destination: if dest.is_zero() { None } else { Some(dest) },
            total_size,
            chunk_size,
        };
        Ok((frame_type, header))
    }
}

/// A fully parsed/encodable frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One chunk of a fragmented message.
    Chunk { header: FrameHeader, index: u32, payload: Vec<u8> },
    /// Request for a receipt.
    ReceiptRequest { header: FrameHeader },
    /// Confirmation of complete, processed delivery.
    Receipt { header: FrameHeader, error_code: u16 },
    /// List of missing chunk indices.
    ChunksNeeded { header: FrameHeader, indices: Vec<u32> },
    /// List of missing chunk index ranges, inclusive on both ends.
    ChunkRangesNeeded { header: FrameHeader, ranges: Vec<(u32, u32)> },
    /// The sender no longer has state for this uuid.
    NoLongerExists { header: FrameHeader },
}

impl Frame {
    /// Shared header of any frame variant.
    pub fn header(&self) -> &FrameHeader {
        match self {
            Frame::Chunk { header, .. }
            | Frame::ReceiptRequest { header }
            | Frame::Receipt { header, .. }
            | Frame::ChunksNeeded { header, .. }
            | Frame::ChunkRangesNeeded { header, .. }
            | Frame::NoLongerExists { header } => header,
        }
    }

    /// Encode this frame to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 32);
        match self {
            Frame::Chunk { header, index, payload } => {
                header.write(FrameType::MessageChunk as u8, &mut out);
                out.extend_from_slice(&index.to_le_bytes());
                out.extend_from_slice(payload);
            }
            Frame::ReceiptRequest { header } => {
                header.write(FrameType::MessageReceiptRequest as u8, &mut out);
            }
            Frame::Receipt { header, error_code } => {
                header.write(FrameType::MessageReceipt as u8, &mut out);
                out.extend_from_slice(&error_code.to_le_bytes());
            }
            Frame::ChunksNeeded { header, indices } => {
                header.write(FrameType::MessageChunksNeeded as u8, &mut out);
                out.extend_from_slice(&(indices.len() as u16).to_le_bytes());
                for idx in indices {
                    out.extend_from_slice(&idx.to_le_bytes());
                }
            }
            Frame::ChunkRangesNeeded { header, ranges } => {
                header.write(FrameType::MessageChunkRangesNeeded as u8, &mut out);
                out.extend_from_slice(&(ranges.len() as u16).to_le_bytes());
                for (lo, hi) in ranges {
                    out.extend_from_slice(&lo.to_le_bytes());
                    out.extend_from_slice(&hi.to_le_bytes());
                }
            }
            Frame::NoLongerExists { header } => {
                header.write(FrameType::MessageNoLongerExists as u8, &mut out);
            }
        }
        out
    }

    /// Decode a datagram into a `Frame`. Unknown/reserved types and
    /// malformed trailers return an error; the caller is expected to log
    /// and drop the datagram, per the error-handling policy.
    pub fn decode(buf: &[u8]) -> Result<Frame> {
        let (type_byte, header) = FrameHeader::read(buf)?;
        let frame_type = FrameType::from_wire_byte(type_byte)
            .ok_or_else(|| ClusterError::invalid_frame(format!("unknown frame type {type_byte}")))?;
        let rest = &buf[HEADER_LEN..];

        match frame_type {
            FrameType::MessageChunk => {
                if rest.len() < 4 {
                    return Err(ClusterError::invalid_frame("chunk trailer missing index"));
                }
                let index = u32::from_le_bytes(rest[0..4].try_into().unwrap());
                let payload = rest[4..].to_vec();
                Ok(Frame::Chunk { header, index, payload })
            }
            FrameType::MessageReceiptRequest => Ok(Frame::ReceiptRequest { header }),
            FrameType::MessageReceipt => {
                if rest.len() < 2 {
                    return Err(ClusterError::invalid_frame("receipt trailer missing error code"));
                }
                let error_code = u16::from_le_bytes(rest[0..2].try_into().unwrap());
                Ok(Frame::Receipt { header, error_code })
            }
            FrameType::MessageChunksNeeded => {
                if rest.len() < 2 {
                    return Err(ClusterError::invalid_frame("chunks-needed trailer missing count"));
                }
                let count = u16::from_le_bytes(rest[0..2].try_into().unwrap()) as usize;
                let mut indices = Vec::with_capacity(count);
                let mut off = 2;
                for _ in 0..count {
                    if rest.len() < off + 4 {
                        return Err(ClusterError::invalid_frame("chunks-needed trailer truncated"));
                    }
                    indices.push(u32::from_le_bytes(rest[off..off + 4].try_into().unwrap()));
                    off += 4;
                }
                Ok(Frame::ChunksNeeded { header, indices })
            }
            FrameType::MessageChunkRangesNeeded => {
                if rest.len() < 2 {
                    return Err(ClusterError::invalid_frame("ranges-needed trailer missing count"));
                }
                let count = u16::from_le_bytes(rest[0..2].try_into().unwrap()) as usize;
                let mut ranges = Vec::with_capacity(count);
                let mut off = 2;
                for _ in 0..count {
                    if rest.len() < off + 8 {
                        return Err(ClusterError::invalid_frame("ranges-needed trailer truncated"));
                    }
                    let lo = u32::from_le_bytes(rest[off..off + 4].try_into().unwrap());
                    let hi = u32::from_le_bytes(rest[off + 4..off + 8].try_into().unwrap());
                    ranges.push((lo, hi));
                    off += 8;
                }
                Ok(Frame::ChunkRangesNeeded { header, ranges })
            }
            FrameType::MessageNoLongerExists => Ok(Frame::NoLongerExists { header }),
        }
    }
}

/// Split a list of missing-chunk indices into windows no larger than
/// `MAX_MISSING_LIST`, in the order callers should send them.
pub fn missing_index_windows(indices: &[u32]) -> impl Iterator<Item = &[u32]> {
    indices.chunks(crate::constants::MAX_MISSING_LIST)
}
