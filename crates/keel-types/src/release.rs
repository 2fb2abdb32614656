use semver::Version as Semver;
use serde::{Deserialize, Serialize};

/// Version every component starts at when no prior release exists.
pub fn first_version() -> Semver {
    Semver::new(0, 0, 1)
}

/// Which semver field a new release bumps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    Major,
    Minor,
    #[default]
    Patch,
}

impl ReleaseType {
    /// The version following `current` for this release type. Pre-release
    /// and build metadata are dropped; bumped fields reset the lower ones.
    pub fn bump(&self, current: &Semver) -> Semver {
        match self {
            Self::Major => Semver::new(current.major + 1, 0, 0),
            Self::Minor => Semver::new(current.major, current.minor + 1, 0),
            Self::Patch => Semver::new(current.major, current.minor, current.patch + 1),
        }
    }
}
