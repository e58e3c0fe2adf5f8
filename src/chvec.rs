//! Choice vector: the ordered mapping from composite-hash bit positions to
//! `(attribute, per-attribute-hash bit)` pairs.

use crate::bits::{bit_is_set, set_bit, Bits, MAXBITS};
use crate::error::{RelnError, Result};

pub const MAXCHVEC: usize = MAXBITS as usize;

/// On-disk size of one `ChVecItem` record in the info file: two `u32`s.
pub const CHVEC_ITEM_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChVecItem {
    pub att: u32,
    pub bit: u32,
}

impl ChVecItem {
    fn to_bytes(self) -> [u8; CHVEC_ITEM_SIZE] {
        let mut out = [0u8; CHVEC_ITEM_SIZE];
        out[0..4].copy_from_slice(&self.att.to_be_bytes());
        out[4..8].copy_from_slice(&self.bit.to_be_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let att = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let bit = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        Self { att, bit }
    }
}

/// Ordered sequence of exactly `MAXCHVEC` items. `cv[i]` says which bit of
/// which attribute's hash becomes bit `i` of a composite tuple hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoiceVector {
    items: [ChVecItem; MAXCHVEC],
}

impl ChoiceVector {
    pub fn items(&self) -> &[ChVecItem; MAXCHVEC] {
        &self.items
    }

    pub fn get(&self, i: usize) -> ChVecItem {
        self.items[i]
    }

    /// Parses the textual form: a comma-separated list of up to `MAXCHVEC`
    /// `att:bit` tokens. Positions not given a token are filled round-robin
    /// across attributes, low-order per-attribute hash bit first: position
    /// `i` gets `att = i % nattrs`, `bit = i / nattrs`. Duplicates are
    /// allowed.
    pub fn parse(text: &str, nattrs: u32) -> Result<Self> {
        if nattrs == 0 {
            return Err(RelnError::Configuration("nattrs must be positive".into()));
        }

        let mut items = [ChVecItem { att: 0, bit: 0 }; MAXCHVEC];
        for (i, slot) in items.iter_mut().enumerate() {
            *slot = ChVecItem { att: (i as u32) % nattrs, bit: (i as u32) / nattrs };
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self { items });
        }

        for (i, token) in trimmed.split(',').enumerate() {
            if i >= MAXCHVEC {
                return Err(RelnError::Configuration(format!(
                    "choice vector has more than {MAXCHVEC} entries"
                )));
            }
            let token = token.trim();
            let (att_str, bit_str) = token.split_once(':').ok_or_else(|| {
                RelnError::Configuration(format!("bad choice vector token '{token}'"))
            })?;
            let att: u32 = att_str
                .parse()
                .map_err(|_| RelnError::Configuration(format!("bad attribute index '{att_str}'")))?;
            let bit: u32 = bit_str
                .parse()
                .map_err(|_| RelnError::Configuration(format!("bad bit index '{bit_str}'")))?;
            if att >= nattrs {
                return Err(RelnError::Configuration(format!(
                    "choice vector attribute {att} out of range (nattrs={nattrs})"
                )));
            }
            if bit >= MAXBITS {
                return Err(RelnError::Configuration(format!(
                    "choice vector bit {bit} out of range (MAXBITS={MAXBITS})"
                )));
            }
            items[i] = ChVecItem { att, bit };
        }

        Ok(Self { items })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAXCHVEC * CHVEC_ITEM_SIZE);
        for item in &self.items {
            out.extend_from_slice(&item.to_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAXCHVEC * CHVEC_ITEM_SIZE {
            return Err(RelnError::Configuration("truncated choice vector".into()));
        }
        let mut items = [ChVecItem { att: 0, bit: 0 }; MAXCHVEC];
        for (i, slot) in items.iter_mut().enumerate() {
            let start = i * CHVEC_ITEM_SIZE;
            *slot = ChVecItem::from_bytes(&bytes[start..start + CHVEC_ITEM_SIZE]);
        }
        Ok(Self { items })
    }
}

/// Assembles the composite tuple hash from per-attribute hashes: for each
/// position `i`, bit `i` of the result equals bit `cv[i].bit` of the hash of
/// attribute `cv[i].att`.
pub fn composite_hash(cv: &ChoiceVector, attr_hashes: &[Bits]) -> Bits {
    let mut h = 0;
    for i in 0..MAXCHVEC as u32 {
        let item = cv.get(i as usize);
        if let Some(&ah) = attr_hashes.get(item.att as usize) {
            if bit_is_set(ah, item.bit) {
                h = set_bit(h, i);
            }
        }
    }
    h
}
