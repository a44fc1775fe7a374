use sha2::{Digest, Sha256};
use uuid::{Builder, Uuid};

/// Per-run source of node and style identifiers.
///
/// Every conversion owns one generator; nothing is shared between runs, so
/// concurrent conversions never have to reconcile ids with each other.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    seed: Option<u64>,
    counter: u64,
}

impl IdGenerator {
    /// Ids from the operating system RNG.
    pub fn random() -> Self {
        Self {
            seed: None,
            counter: 0,
        }
    }

    /// Reproducible ids derived from `seed`; still formatted as UUID v4.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            counter: 0,
        }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::random(),
        }
    }

    pub fn next_id(&mut self) -> String {
        self.counter += 1;
        match self.seed {
            None => Uuid::new_v4().to_string(),
            Some(seed) => {
                let mut hasher = Sha256::new();
                hasher.update(seed.to_le_bytes());
                hasher.update(self.counter.to_le_bytes());
                let digest = hasher.finalize();
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&digest[..16]);
                Builder::from_random_bytes(bytes).into_uuid().to_string()
            }
        }
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.counter
    }
}

/// Whether `id` is a hyphenated RFC 4122 version 4 UUID.
pub fn is_uuid_v4(id: &str) -> bool {
    id.len() == 36
        && Uuid::parse_str(id).is_ok_and(|uuid| uuid.get_version_num() == 4)
}
