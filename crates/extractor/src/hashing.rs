use sha2::{Digest, Sha256};

use crate::observation::FrameIndex;

/// Summary of the frame indices one pass observed. Two passes over the same
/// source must produce equal summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequenceSummary {
    pub frame_count: u64,
    pub first_frame: Option<FrameIndex>,
    pub last_frame: Option<FrameIndex>,
    pub fingerprint_sha256_hex: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FrameSequenceHasher {
    hasher: Sha256,
    frame_count: u64,
    first_frame: Option<FrameIndex>,
    last_frame: Option<FrameIndex>,
}

impl FrameSequenceHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame_index: FrameIndex) {
        self.hasher.update(frame_index.to_le_bytes());
        self.frame_count = self.frame_count.saturating_add(1);
        self.first_frame.get_or_insert(frame_index);
        self.last_frame = Some(frame_index);
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn finish(self) -> FrameSequenceSummary {
        FrameSequenceSummary {
            frame_count: self.frame_count,
            first_frame: self.first_frame,
            last_frame: self.last_frame,
            fingerprint_sha256_hex: to_hex_lower(&self.hasher.finalize()),
        }
    }
}

pub(crate) fn hash_column_layout<'a>(
    columns: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> String {
    let mut hasher = Sha256::new();
    for (name, value_type) in columns {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(value_type.as_bytes());
        hasher.update([0u8]);
    }
    to_hex_lower(&hasher.finalize())
}

pub(crate) fn hash_bytes(bytes: &[u8]) -> String {
    to_hex_lower(&Sha256::digest(bytes))
}

fn to_hex_lower(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write as _;
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}
