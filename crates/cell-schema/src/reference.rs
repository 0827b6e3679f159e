//! Cell image references.
//!
//! A reference names one version of one image in one registry:
//!
//! ```text
//! [REGISTRY[:PORT]/]ORGANIZATION/NAME:VERSION
//! ```
//!
//! When the registry segment is omitted the central registry
//! ([`DEFAULT_REGISTRY`]) is assumed.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Registry used when a reference carries no registry segment.
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// Pattern for organization and image names.
pub const IDENTIFIER_PATTERN: &str = "[a-z0-9]+(-[a-z0-9]+)*";

/// Pattern for image versions.
pub const VERSION_PATTERN: &str = r"[0-9]+\.[0-9]+\.[0-9]+";

/// Pattern for registry hosts, with an optional port.
pub const REGISTRY_PATTERN: &str = "[a-z0-9]+((-|\\.)[a-z0-9]+)*(:[0-9]+)?";

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{IDENTIFIER_PATTERN}$")).unwrap());
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{VERSION_PATTERN}$")).unwrap());
static REGISTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{REGISTRY_PATTERN}$")).unwrap());

/// Errors produced while parsing an [`ImageRef`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// The input was empty.
    #[error("no cell image specified")]
    Empty,

    /// Wrong number of `/` segments or `:` separators.
    #[error(
        "incorrect image name format '{input}'. Image name should be \
         [REGISTRY[:REGISTRY_PORT]/]ORGANIZATION/IMAGE_NAME:VERSION"
    )]
    Format {
        /// The rejected input.
        input: String,
    },

    /// The registry segment is not a valid host.
    #[error("invalid registry '{0}'")]
    InvalidRegistry(String),

    /// The organization does not match [`IDENTIFIER_PATTERN`].
    #[error("invalid organization '{0}': expected lowercase alphanumerics separated by single hyphens")]
    InvalidOrganization(String),

    /// The image name does not match [`IDENTIFIER_PATTERN`].
    #[error("invalid image name '{0}': expected lowercase alphanumerics separated by single hyphens")]
    InvalidName(String),

    /// The version does not match [`VERSION_PATTERN`].
    #[error("invalid image version '{0}': expected MAJOR.MINOR.PATCH")]
    InvalidVersion(String),
}

/// A parsed cell image reference.
///
/// Used purely as a lookup key into the local repository; it is immutable
/// once parsed.
///
/// # Example
///
/// ```
/// use cell_schema::ImageRef;
///
/// let image: ImageRef = "wso2/hello-world:1.0.0".parse().unwrap();
/// assert_eq!(image.registry(), "registry-1.docker.io");
/// assert_eq!(image.organization(), "wso2");
/// assert_eq!(image.name(), "hello-world");
/// assert_eq!(image.version(), "1.0.0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    registry: String,
    organization: String,
    name: String,
    version: String,
}

impl ImageRef {
    /// Parse a reference string.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::Empty`] for empty input,
    /// [`ReferenceError::Format`] when the input does not have two or three
    /// `/` segments or the last segment does not split into exactly one
    /// `name:version` pair, and one of the `Invalid*` variants when a
    /// component fails its pattern.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let format_error = || ReferenceError::Format {
            input: input.to_string(),
        };

        let segments: Vec<&str> = input.split('/').collect();
        let (registry, organization, tagged) = match segments.as_slice() {
            [organization, tagged] => (DEFAULT_REGISTRY, *organization, *tagged),
            [registry, organization, tagged] => (*registry, *organization, *tagged),
            _ => return Err(format_error()),
        };

        let tag: Vec<&str> = tagged.split(':').collect();
        let [name, version] = tag.as_slice() else {
            return Err(format_error());
        };

        Self::new(registry, organization, name, version)
    }

    /// Build a reference from its components, validating each one.
    ///
    /// # Errors
    ///
    /// Returns an `Invalid*` variant of [`ReferenceError`] for the first
    /// component that fails validation.
    pub fn new(
        registry: &str,
        organization: &str,
        name: &str,
        version: &str,
    ) -> Result<Self, ReferenceError> {
        if !REGISTRY_RE.is_match(registry) {
            return Err(ReferenceError::InvalidRegistry(registry.to_string()));
        }
        if !IDENTIFIER_RE.is_match(organization) {
            return Err(ReferenceError::InvalidOrganization(organization.to_string()));
        }
        if !IDENTIFIER_RE.is_match(name) {
            return Err(ReferenceError::InvalidName(name.to_string()));
        }
        if !VERSION_RE.is_match(version) {
            return Err(ReferenceError::InvalidVersion(version.to_string()));
        }

        Ok(Self {
            registry: registry.to_string(),
            organization: organization.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// Registry host (possibly with a port).
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Owning organization.
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Image name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image version (`MAJOR.MINOR.PATCH`).
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether the reference points at the central registry.
    pub fn is_default_registry(&self) -> bool {
        self.registry == DEFAULT_REGISTRY
    }

    /// `ORGANIZATION/NAME:VERSION`, without the registry.
    pub fn short(&self) -> String {
        format!("{}/{}:{}", self.organization, self.name, self.version)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            self.registry, self.organization, self.name, self.version
        )
    }
}

impl FromStr for ImageRef {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.to_string()
    }
}
