use std::ops::Range;

use crate::RecoveryError;

/// Byte layout of a protected message: `iv || tag || blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub iv_len: usize,
    pub tag_len: usize,
    pub block_size: usize,
}

impl Layout {
    pub const fn new(iv_len: usize, tag_len: usize, block_size: usize) -> Self {
        Self {
            iv_len,
            tag_len,
            block_size,
        }
    }

    pub fn header_len(&self) -> usize {
        self.iv_len + self.tag_len
    }

    fn validate(&self) -> Result<(), RecoveryError> {
        // Padding values are single bytes, and a one byte block leaves no room
        // to tell padding lengths apart.
        if !(2..=255).contains(&self.block_size) {
            return Err(RecoveryError::InvalidLayout(format!(
                "block size must be between 2 and 255, got {}",
                self.block_size
            )));
        }
        if self.header_len() < self.block_size {
            return Err(RecoveryError::InvalidLayout(format!(
                "iv and tag ({} bytes) must span at least one {}-byte block",
                self.header_len(),
                self.block_size
            )));
        }
        Ok(())
    }
}

impl Default for Layout {
    /// AES-128 IV, HMAC-SHA256 tag, 16-byte blocks.
    fn default() -> Self {
        Self::new(16, 32, 16)
    }
}

/// An immutable, validated ciphertext.
///
/// Blocks are addressed by their distance from the end of the message:
/// block 0 is the last block (the one carrying the padding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    bytes: Vec<u8>,
    layout: Layout,
}

impl Ciphertext {
    pub fn new(bytes: Vec<u8>, layout: Layout) -> Result<Self, RecoveryError> {
        layout.validate()?;
        if bytes.len() <= layout.header_len() {
            return Err(RecoveryError::TooShort {
                len: bytes.len(),
                header_len: layout.header_len(),
            });
        }
        let body_len = bytes.len() - layout.header_len();
        if body_len % layout.block_size != 0 {
            return Err(RecoveryError::Misaligned {
                body_len,
                block_size: layout.block_size,
            });
        }
        Ok(Self { bytes, layout })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn block_size(&self) -> usize {
        self.layout.block_size
    }

    pub fn block_count(&self) -> usize {
        self.plaintext_len() / self.layout.block_size
    }

    pub fn plaintext_len(&self) -> usize {
        self.bytes.len() - self.layout.header_len()
    }

    /// Length of the prefix that ends with the given block. Queries against
    /// an interior block are cut here so the oracle checks its padding.
    pub fn truncated_len(&self, block_index: usize) -> usize {
        self.bytes.len() - block_index * self.layout.block_size
    }

    /// Plaintext offset of the byte `pos` places from the end of a block
    /// (`pos` runs from 1 to the block size).
    pub fn plaintext_offset(&self, block_index: usize, pos: usize) -> usize {
        self.plaintext_len() - block_index * self.layout.block_size - pos
    }

    pub fn plaintext_range(&self, block_index: usize) -> Range<usize> {
        let end = self.plaintext_len() - block_index * self.layout.block_size;
        (end - self.layout.block_size)..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    use rstest::rstest;

    fn ciphertext_with_blocks(n_blocks: usize) -> Ciphertext {
        let layout = Layout::default();
        let bytes = vec![0u8; layout.header_len() + n_blocks * layout.block_size];
        Ciphertext::new(bytes, layout).unwrap()
    }

    #[test]
    fn block_count_excludes_iv_and_tag() {
        let ciphertext = ciphertext_with_blocks(3);

        assert_eq!(ciphertext.len(), 96);
        assert_eq!(ciphertext.plaintext_len(), 48);
        assert_eq!(ciphertext.block_count(), 3);
    }

    #[rstest]
    #[case(0)]
    #[case(47)]
    #[case(48)]
    fn ciphertext_without_blocks_is_too_short(#[case] len: usize) {
        let result = Ciphertext::new(vec![0u8; len], Layout::default());

        assert!(matches!(result, Err(RecoveryError::TooShort { .. })));
    }

    #[rstest]
    #[case(49)]
    #[case(63)]
    #[case(65)]
    fn ciphertext_with_partial_block_is_misaligned(#[case] len: usize) {
        let result = Ciphertext::new(vec![0u8; len], Layout::default());

        assert!(matches!(result, Err(RecoveryError::Misaligned { .. })));
    }

    #[rstest]
    #[case(Layout::new(16, 32, 1))]
    #[case(Layout::new(16, 32, 256))]
    #[case(Layout::new(4, 4, 16))]
    fn invalid_layouts_are_rejected(#[case] layout: Layout) {
        let result = Ciphertext::new(vec![0u8; 1024], layout);

        assert!(matches!(result, Err(RecoveryError::InvalidLayout(_))));
    }

    #[test]
    fn truncated_len_ends_after_target_block() {
        let ciphertext = ciphertext_with_blocks(3);

        assert_eq!(ciphertext.truncated_len(0), 96);
        assert_eq!(ciphertext.truncated_len(1), 80);
        assert_eq!(ciphertext.truncated_len(2), 64);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(5)]
    fn block_offsets_are_disjoint_and_cover_plaintext(#[case] n_blocks: usize) {
        let ciphertext = ciphertext_with_blocks(n_blocks);
        let block_size = ciphertext.block_size();

        let mut seen = HashSet::new();
        for block_index in 0..ciphertext.block_count() {
            for pos in 1..=block_size {
                let offset = ciphertext.plaintext_offset(block_index, pos);
                assert!(seen.insert(offset), "offset {offset} written twice");
                // Workers write position `pos` at `block_size - pos` of their chunk.
                let range = ciphertext.plaintext_range(block_index);
                assert_eq!(range.start + block_size - pos, offset);
            }
        }

        assert_eq!(seen, (0..ciphertext.plaintext_len()).collect());
    }

    #[test]
    fn position_one_is_last_byte_of_block() {
        let ciphertext = ciphertext_with_blocks(3);

        assert_eq!(ciphertext.plaintext_offset(0, 1), 47);
        assert_eq!(ciphertext.plaintext_offset(0, 16), 32);
        assert_eq!(ciphertext.plaintext_offset(2, 16), 0);
        assert_eq!(ciphertext.plaintext_range(1), 16..32);
    }
}
