//! Stream reassembly of candidate frames.
//!
//! The serial link delivers bytes in arbitrary chunks. `FrameAssembler`
//! buffers them, hunts for the sync byte, checks the header for plausibility
//! and hands out complete candidate frames. Candidates are not checksummed
//! here; that is the caller's job.

use crate::frame::{Origin, CHECKSUM_LEN, HEADER_LEN, MAX_PAYLOAD_LEN, RESERVED, SYNC};

/// Per-direction frame assembler.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    discarded: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(64),
            discarded: 0,
        }
    }

    /// Append newly received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Lazily yield every complete candidate frame currently buffered.
    /// Partial frames stay buffered for the next call.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { assembler: self }
    }

    /// Extract the next complete candidate frame, if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(start) = self.buf.iter().position(|&b| b == SYNC) else {
                self.discard(self.buf.len());
                return None;
            };
            self.discard(start);

            if !self.header_plausible() {
                // Drop the false sync byte and keep hunting.
                self.discard(1);
                continue;
            }

            if self.buf.len() < HEADER_LEN {
                return None;
            }

            let total = HEADER_LEN + self.buf[2] as usize + CHECKSUM_LEN;
            if self.buf.len() < total {
                return None;
            }

            return Some(self.buf.drain(..total).collect());
        }
    }

    /// True while part of a frame is buffered.
    pub fn is_mid_frame(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Number of bytes thrown away while resynchronizing.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Checks whatever header bytes are already present.
    fn header_plausible(&self) -> bool {
        if let Some(&origin) = self.buf.get(1) {
            if Origin::from_byte(origin).is_none() {
                return false;
            }
        }
        if let Some(&len) = self.buf.get(2) {
            if len as usize > MAX_PAYLOAD_LEN {
                return false;
            }
        }
        if let Some(&reserved) = self.buf.get(3) {
            if reserved != RESERVED {
                return false;
            }
        }
        true
    }

    fn discard(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.buf.drain(..count);
        self.discarded += count as u64;
    }
}

/// Iterator over complete candidate frames.
pub struct Frames<'a> {
    assembler: &'a mut FrameAssembler,
}

impl Iterator for Frames<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.assembler.next_frame()
    }
}
