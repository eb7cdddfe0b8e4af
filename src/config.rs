//! Codec configuration.

/// How class fields are laid out on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompatibleMode {
    /// Writer and reader share the exact class layout; fields are written positionally.
    #[default]
    SchemaConsistent,
    /// Every level and field carries an id, so either side may add or drop
    /// fields and levels independently.
    Compatible,
}

/// Decoding limits to guard against malicious or corrupt input.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Maximum nesting depth of containers and objects.
    pub max_depth: usize,
    /// Maximum element count accepted for a single sequence or map.
    pub max_collection_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_collection_len: 16 * 1024 * 1024,
        }
    }
}

/// Options shared by one encode or decode call.
///
/// Writer and reader must agree on every field except `limits`.
#[derive(Clone, Debug)]
pub struct Config {
    /// Track object identity so shared and cyclic references round-trip.
    pub ref_tracking: bool,
    /// Never track bool, integer and float values, even with `ref_tracking` on.
    pub basic_types_ref_ignored: bool,
    /// Never track string and binary values, even with `ref_tracking` on.
    pub string_ref_ignored: bool,
    pub compatible_mode: CompatibleMode,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ref_tracking: false,
            basic_types_ref_ignored: true,
            string_ref_ignored: true,
            compatible_mode: CompatibleMode::default(),
            limits: Limits::default(),
        }
    }
}

impl Config {
    pub fn with_ref_tracking(mut self, enabled: bool) -> Self {
        self.ref_tracking = enabled;
        self
    }

    pub fn with_basic_types_ref_ignored(mut self, ignored: bool) -> Self {
        self.basic_types_ref_ignored = ignored;
        self
    }

    pub fn with_string_ref_ignored(mut self, ignored: bool) -> Self {
        self.string_ref_ignored = ignored;
        self
    }

    pub fn with_compatible_mode(mut self, mode: CompatibleMode) -> Self {
        self.compatible_mode = mode;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Checks a decoded element count against `max_collection_len`.
    pub(crate) fn check_collection_len(&self, len: u64) -> crate::Result<usize> {
        match usize::try_from(len) {
            Ok(n) if n <= self.limits.max_collection_len => Ok(n),
            _ => Err(crate::EncoderError::LimitExceeded(format!(
                "Collection length {} exceeds limit {}",
                len, self.limits.max_collection_len
            ))),
        }
    }
}
