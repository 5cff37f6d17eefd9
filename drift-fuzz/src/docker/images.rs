use std::fmt;

use clap::ValueEnum;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Repository every image drift builds or commits is tagged under.
pub const IMAGE_REPOSITORY: &str = "drift";

/// Images a round can start from. Each has a Dockerfile under the images
/// directory named after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
pub enum BaseImage {
    #[serde(rename = "debian-12")]
    #[value(name = "debian-12")]
    Debian12,
    #[serde(rename = "ubuntu-22-04")]
    #[value(name = "ubuntu-22-04")]
    Ubuntu2204,
    #[serde(rename = "debian-12-postgres-16")]
    #[value(name = "debian-12-postgres-16")]
    Debian12Postgres16,
}

impl BaseImage {
    pub const ALL: [BaseImage; 3] = [
        BaseImage::Debian12,
        BaseImage::Ubuntu2204,
        BaseImage::Debian12Postgres16,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BaseImage::Debian12 => "debian-12",
            BaseImage::Ubuntu2204 => "ubuntu-22-04",
            BaseImage::Debian12Postgres16 => "debian-12-postgres-16",
        }
    }

    /// Tag of the built image, e.g. `drift:debian-12`.
    pub fn tag(&self) -> String {
        format!("{IMAGE_REPOSITORY}:{}", self.name())
    }

    /// Dockerfile path relative to the build context.
    pub fn dockerfile(&self) -> String {
        format!("images/{}.Dockerfile", self.name())
    }

    pub fn is_base_tag(tag: &str) -> bool {
        Self::ALL.iter().any(|image| image.tag() == tag)
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        *Self::ALL.choose(rng).unwrap_or(&BaseImage::Debian12)
    }
}

impl fmt::Display for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
