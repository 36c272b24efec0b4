use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// Fixed-size perceptual digest of an image's visual content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(ImageHash);

impl Fingerprint {
    pub fn bits(&self) -> usize {
        self.0.as_bytes().len() * 8
    }

    /// Similarity in `[0, 1]`: the fraction of matching digest bits.
    ///
    /// Symmetric, and exactly `1.0` for identical digests. Digests of
    /// different sizes never match.
    pub fn correlation(&self, other: &Fingerprint) -> f64 {
        if self.bits() != other.bits() {
            return 0.0;
        }
        if self.bits() == 0 {
            return 1.0;
        }
        1.0 - self.0.dist(&other.0) as f64 / self.bits() as f64
    }

    pub fn to_base64(&self) -> String {
        self.0.to_base64()
    }
}

/// Computes mean-hash fingerprints at a fixed square hash size.
#[derive(Debug, Clone, Copy)]
pub struct PerceptualService {
    hash_size: u32,
}

impl PerceptualService {
    pub fn new(hash_size: u32) -> Self {
        Self { hash_size }
    }

    pub fn fingerprint(&self, image: &DynamicImage) -> Fingerprint {
        let hasher = HasherConfig::new()
            .hash_size(self.hash_size, self.hash_size)
            .hash_alg(HashAlg::Mean)
            .to_hasher();
        Fingerprint(hasher.hash_image(image))
    }
}

impl Default for PerceptualService {
    fn default() -> Self {
        Self::new(16)
    }
}
