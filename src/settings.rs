//! Settings related to the serial bridge transport.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

// =============================================================================
// Public Interface
// =============================================================================

/// Maximum payload of a single physical write or notification in the serial
/// bridge protocol.
pub const MAX_CHUNK: usize = 20;

/// Default minimum growth increment of the bridge byte queues.
pub const DEFAULT_QUEUE_GROWTH: usize = 256;

/// Groups all settings of a serial bridge connection and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// Number of payload bytes carried by each physical write. Always in
    /// `1..=MAX_CHUNK`.
    pub max_chunk: usize,
    /// When `true`, data chunks are written with the "wait for response" flag
    /// so that transport failures can be captured and reported by `flush`.
    pub write_with_response: bool,
    /// The minimum number of bytes the inbound and outbound queues grow by
    /// whenever they run out of space.
    pub queue_growth: usize,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}
impl Default for Settings {
    fn default() -> Self {
        SettingsBuilder::new().finalize()
    }
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use brspcom::SettingsBuilder;
///
/// let settings = SettingsBuilder::new().max_chunk(16).finalize();
/// assert_eq!(settings.max_chunk, 16);
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl SettingsBuilder {
    /// Start building the settings using the protocol default values.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                max_chunk: MAX_CHUNK,
                write_with_response: true,
                queue_growth: DEFAULT_QUEUE_GROWTH,
                _private_use_builder: (),
            },
        }
    }

    /// Set the payload size of each physical write, clamped to
    /// `1..=MAX_CHUNK`.
    pub fn max_chunk(mut self, max_chunk: usize) -> Self {
        self.settings.max_chunk = max_chunk.max(1).min(MAX_CHUNK);
        self
    }

    /// Set whether data chunks are written with response
    pub fn write_with_response(mut self, write_with_response: bool) -> Self {
        self.settings.write_with_response = write_with_response;
        self
    }

    /// Set the minimum growth increment of the byte queues
    pub fn queue_growth(mut self, queue_growth: usize) -> Self {
        self.settings.queue_growth = queue_growth.max(1);
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            max_chunk: 20,
            write_with_response: true,
            queue_growth: 256,
            _private_use_builder: (),
        }
    );
    assert_eq!(settings, Settings::default());
}

#[test]
fn max_chunk() {
    let settings = SettingsBuilder::new().max_chunk(8).finalize();
    assert_eq!(settings.max_chunk, 8);
}

#[test]
fn max_chunk_is_clamped() {
    assert_eq!(SettingsBuilder::new().max_chunk(0).finalize().max_chunk, 1);
    assert_eq!(
        SettingsBuilder::new().max_chunk(512).finalize().max_chunk,
        MAX_CHUNK
    );
}

#[test]
fn write_with_response() {
    let settings = SettingsBuilder::new().write_with_response(false).finalize();
    assert!(!settings.write_with_response);
}

#[test]
fn queue_growth() {
    let settings = SettingsBuilder::new().queue_growth(64).finalize();
    assert_eq!(settings.queue_growth, 64);
    let settings = SettingsBuilder::new().queue_growth(0).finalize();
    assert_eq!(settings.queue_growth, 1);
}
