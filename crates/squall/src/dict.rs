//! Pre-generated pool of random header fields.
//!
//! Generated once at startup, immutable for the life of the process. The
//! CONTINUATION flood draws field names and values from here instead of
//! paying for RNG-driven string generation in the emission loop.

use eyre::eyre;
use rand::Rng;

pub const DICT_ENTRIES: usize = 100;
pub const DEFAULT_FIELD_SIZE: usize = 1000;
pub const MAX_FIELD_SIZE: usize = 4000;

pub struct HeaderDict {
    entries: Vec<String>,
    field_size: usize,
}

impl HeaderDict {
    /// Generate [`DICT_ENTRIES`] random lowercase strings of `field_size`
    /// characters each. `field_size` above [`MAX_FIELD_SIZE`] is a startup
    /// validation error.
    pub fn generate(field_size: usize) -> eyre::Result<Self> {
        if field_size > MAX_FIELD_SIZE {
            return Err(eyre!(
                "header field size {field_size} too big (max {MAX_FIELD_SIZE})"
            ));
        }

        let mut rng = rand::thread_rng();
        let entries = (0..DICT_ENTRIES)
            .map(|_| {
                (0..field_size)
                    .map(|_| rng.gen_range(b'a'..=b'z') as char)
                    .collect()
            })
            .collect();

        Ok(Self {
            entries,
            field_size,
        })
    }

    pub fn field_size(&self) -> usize {
        self.field_size
    }

    /// One random entry; each call draws independently.
    pub fn pick(&self, rng: &mut impl Rng) -> &str {
        &self.entries[rng.gen_range(0..self.entries.len())]
    }
}
