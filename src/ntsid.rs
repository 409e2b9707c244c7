use crate::err::{DeserializationError, DeserializationResult};
use std::fmt::{self, Debug, Display, Write};

/// A Windows NT security identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sid {
    revision: u8,
    // The identifier authority is a 48-bit big-endian quantity.
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Parse a SID from the start of `bytes`, returning the SID and the
    /// number of bytes it occupied.
    pub(crate) fn from_slice(bytes: &[u8], offset: u64) -> DeserializationResult<(Sid, usize)> {
        if bytes.len() < 8 {
            return Err(DeserializationError::Truncated {
                what: "sid",
                offset,
                need: 8,
                have: bytes.len(),
            });
        }

        let revision = bytes[0];
        let sub_count = usize::from(bytes[1]);
        let total = 8 + sub_count * 4;
        if bytes.len() < total {
            return Err(DeserializationError::Truncated {
                what: "sid sub-authorities",
                offset,
                need: total,
                have: bytes.len(),
            });
        }

        let mut authority: u64 = 0;
        for &b in &bytes[2..8] {
            authority = (authority << 8) | u64::from(b);
        }

        let mut sub_authorities = Vec::with_capacity(sub_count);
        for i in 0..sub_count {
            let start = 8 + i * 4;
            sub_authorities.push(u32::from_le_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ]));
        }

        Ok((
            Sid {
                revision,
                authority,
                sub_authorities,
            },
            total,
        ))
    }

    pub fn to_string(&self) -> String {
        let mut repr = String::with_capacity(16 + self.sub_authorities.len() * 11);

        write!(repr, "S-{}-{}", self.revision, self.authority)
            .expect("writing to a String cannot fail");

        for sub_authority in &self.sub_authorities {
            write!(repr, "-{sub_authority}").expect("writing to a String cannot fail");
        }

        repr
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string())
    }
}

impl Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string())
    }
}
