use std::time::Duration;
use thiserror::Error;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/94.0.4606.81 Safari/537.36";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("Duplicate threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("Thumbnail divisor must be at least 1")]
    ZeroDivisor,

    #[error("JPEG quality must be within 1..=100, got {0}")]
    QualityOutOfRange(u8),

    #[error("Fingerprint hash size must be at least 1")]
    ZeroHashSize,

    #[error("Retry policy must allow at least 1 attempt")]
    ZeroAttempts,
}

/// Bounded retry with jittered delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the random delay added to `base_delay`.
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// No delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay before the next attempt: `base_delay` plus up to `max_jitter`.
    pub fn delay(&self) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base_delay;
        }
        self.base_delay + Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(2500),
        }
    }
}

/// Settings for one gallery build.
#[derive(Debug, Clone)]
pub struct GalleryConfig {
    /// Maximum number of definitions in flight at once.
    pub concurrency: usize,
    /// Inclusive similarity score at which two records count as duplicates.
    pub duplicate_threshold: f64,
    /// Thumbnails are `final_size / thumbnail_divisor` on each axis.
    pub thumbnail_divisor: u32,
    pub jpeg_quality: u8,
    /// Side length of the square perceptual hash, in bits.
    pub hash_size: u32,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub output_file_name: String,
    /// Retry policy for tag enrichment lookups.
    pub enrich_retry: RetryPolicy,
}

impl GalleryConfig {
    pub fn new() -> Self {
        Self {
            concurrency: 32,
            duplicate_threshold: 0.99,
            thumbnail_divisor: 4,
            jpeg_quality: 50,
            hash_size: 16,
            request_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            output_file_name: "gallery.zip".to_string(),
            enrich_retry: RetryPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if !(0.0..=1.0).contains(&self.duplicate_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.duplicate_threshold));
        }
        if self.thumbnail_divisor == 0 {
            return Err(ConfigError::ZeroDivisor);
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::QualityOutOfRange(self.jpeg_quality));
        }
        if self.hash_size == 0 {
            return Err(ConfigError::ZeroHashSize);
        }
        if self.enrich_retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self::new()
    }
}
