use std::fmt::{Display, Formatter};
use uuid::Uuid;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Number of symbols in every generated identifier.
pub const SHORT_ID_LEN: usize = 10;

/// Number of leading UUID bytes folded into the identifier.
const SOURCE_BYTES: usize = 9;

/// A short, lowercase base-36 identifier used as a directory name.
///
/// The identifier is safe on case-insensitive filesystems and carries
/// enough randomness that collisions are rare; callers still check the
/// filesystem before using one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShortId {
    name: String,
}

impl ShortId {
    /// Creates an identifier from a fresh random UUIDv4.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Derives the identifier from the first nine bytes of `uuid`.
    ///
    /// The bytes form a little-endian magnitude which is written out in
    /// base 36, least significant digit first.
    pub fn from_uuid(uuid: Uuid) -> Self {
        let mut value = uuid.as_bytes()[..SOURCE_BYTES]
            .iter()
            .rev()
            .fold(0u128, |acc, &b| (acc << 8) | u128::from(b));

        let mut name = String::with_capacity(SHORT_ID_LEN);
        for _ in 0..SHORT_ID_LEN {
            // The remainder is always below 36.
            name.push(char::from(ALPHABET[(value % 36) as usize]));
            value /= 36;
        }

        Self { name }
    }

    /// An endless sequence of freshly generated identifiers.
    pub fn candidates() -> impl Iterator<Item = ShortId> {
        std::iter::repeat_with(ShortId::new)
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl Default for ShortId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<str> for ShortId {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl Display for ShortId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
