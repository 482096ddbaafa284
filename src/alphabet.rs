// Candidate plaintext bytes, ordered by how often they show up in English
// prose. Every recovered byte costs one oracle query per candidate tried, so
// searching the most common characters first keeps the expected number of
// queries per byte low. The price is that bytes missing from the table (e.g.
// '\n' or anything non-ASCII other than 0x97) can never be recovered.
//
// The order is a parameter of a recovery run: `Alphabet::english()` is the
// default, and `Alphabet::from_ordered` accepts any other ranking.
use thiserror::Error;

#[rustfmt::skip]
const ENGLISH_BY_FREQUENCY: [u8; 96] = [
    b' ', b'e', b't', b'a', b'o', b'i', b'n', b's', b'h', b'r', b'd', b'l',
    b'u', b'c', b'w', b'm', b'f', b'g', b'y', b'p', b'b', b',', b'.', b'v',
    b'k', b'\'', b'-', b'T', b'I', b'B', b'W', b'H', b'P', b'A', b'x', b'O',
    b'S', b'F', b'E', b'q', 0x97, b'?', b'N', b'1', b'j', b'z', b'Y', b'M',
    b'!', b'9', b'8', b'C', b'4', b':', b'L', b'R', b'D', b';', b'J', b'G',
    b'U', b'3', b'0', b'K', b'"', b'2', b'6', b'V', b')', b'(', b'5', b'7',
    b'Q', b'/', b'Z', b']', b'[', b'^', b'#', b'$', b'%', b'&', b'*', b'+',
    b'<', b'=', b'>', b'@', b'X', b'\\', b'_', b'`', b'{', b'|', b'}', b'~',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AlphabetError {
    #[error("alphabet must contain at least one byte")]
    Empty,
    #[error("byte 0x{byte:02x} appears more than once (ranks {first} and {second})")]
    Duplicate { byte: u8, first: usize, second: usize },
}

/// A candidate byte and its frequency rank; rank 0 is tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlphabetEntry {
    pub byte: u8,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    entries: Vec<AlphabetEntry>,
    members: [bool; 256],
}

impl Alphabet {
    pub fn english() -> Self {
        // The table is a deduplicated constant, so this cannot fail.
        let mut members = [false; 256];
        let entries = ENGLISH_BY_FREQUENCY
            .iter()
            .enumerate()
            .map(|(rank, &byte)| {
                members[byte as usize] = true;
                AlphabetEntry { byte, rank }
            })
            .collect();
        Self { entries, members }
    }

    pub fn from_ordered(bytes: &[u8]) -> Result<Self, AlphabetError> {
        if bytes.is_empty() {
            return Err(AlphabetError::Empty);
        }
        let mut first_seen: [Option<usize>; 256] = [None; 256];
        let mut entries = Vec::with_capacity(bytes.len());
        for (rank, &byte) in bytes.iter().enumerate() {
            if let Some(first) = first_seen[byte as usize] {
                return Err(AlphabetError::Duplicate {
                    byte,
                    first,
                    second: rank,
                });
            }
            first_seen[byte as usize] = Some(rank);
            entries.push(AlphabetEntry { byte, rank });
        }
        Ok(Self {
            entries,
            members: first_seen.map(|rank| rank.is_some()),
        })
    }

    pub fn contains(&self, byte: u8) -> bool {
        self.members[byte as usize]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[AlphabetEntry] {
        &self.entries
    }

    /// Candidate bytes, most frequent first.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.iter().map(|entry| entry.byte)
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::english()
    }
}
