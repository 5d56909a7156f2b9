//! Registry paths and their identity
//!
//! A [`RegistryPath`] is `(view, hive, segments)`. Segments keep the
//! spelling they were declared with for display, but equality, hashing and
//! ordering use the case-folded form, so `HKLM\Software\Vendor` and
//! `hklm/software//vendor` are the same entity.
//!
//! The [`PathResolver`] owns the host architecture. On a 32-bit host there
//! is no redirected view, so `32:` paths collapse onto the native view at
//! parse time and nothing downstream needs to care.

use crate::error::ParseError;
use crate::types::{ResourceId, ValueName};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Canonical segment separator
pub const SEPARATOR: char = '\\';

/// Prefix selecting the 32-bit (WOW64) view
pub const REDIRECTED_PREFIX: &str = "32:";

/// Registry view a path is resolved in
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// The view matching the host's bitness
    #[default]
    Native,
    /// The 32-bit view exposed by 64-bit Windows
    #[serde(rename = "32")]
    Redirected32,
}

impl FromStr for View {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" | "64" => Ok(Self::Native),
            "32" | "redirected32" | "wow64" => Ok(Self::Redirected32),
            _ => Err(ParseError::InvalidReference(s.to_string())),
        }
    }
}

/// Bitness of the machine whose registry is managed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostArch {
    X64,
    X86,
}

impl HostArch {
    /// Detect the architecture of the running operating system
    ///
    /// A 32-bit process on 64-bit Windows still reports [`HostArch::X64`].
    #[must_use]
    pub fn detect() -> Self {
        #[cfg(windows)]
        {
            if crate::accessor::windows::is_64bit_os() {
                Self::X64
            } else {
                Self::X86
            }
        }

        #[cfg(not(windows))]
        {
            if cfg!(target_pointer_width = "64") {
                Self::X64
            } else {
                Self::X86
            }
        }
    }

    /// Whether a separate redirected view exists
    #[inline]
    #[must_use]
    pub fn has_redirected_view(self) -> bool {
        matches!(self, Self::X64)
    }
}

impl FromStr for HostArch {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x64" | "amd64" | "64" => Ok(Self::X64),
            "x86" | "i386" | "32" => Ok(Self::X86),
            _ => Err(ParseError::InvalidReference(s.to_string())),
        }
    }
}

/// Top-level registry namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Hive {
    #[serde(rename = "HKLM")]
    LocalMachine,
    #[serde(rename = "HKCU")]
    CurrentUser,
    #[serde(rename = "HKU")]
    Users,
    #[serde(rename = "HKCR")]
    ClassesRoot,
    #[serde(rename = "HKCC")]
    CurrentConfig,
}

impl Hive {
    /// All recognized hives
    pub const ALL: [Hive; 5] = [
        Hive::LocalMachine,
        Hive::CurrentUser,
        Hive::Users,
        Hive::ClassesRoot,
        Hive::CurrentConfig,
    ];

    /// Short canonical name
    #[must_use]
    pub fn abbreviation(self) -> &'static str {
        match self {
            Hive::LocalMachine => "HKLM",
            Hive::CurrentUser => "HKCU",
            Hive::Users => "HKU",
            Hive::ClassesRoot => "HKCR",
            Hive::CurrentConfig => "HKCC",
        }
    }

    /// Win32 predefined key name
    #[must_use]
    pub fn long_name(self) -> &'static str {
        match self {
            Hive::LocalMachine => "HKEY_LOCAL_MACHINE",
            Hive::CurrentUser => "HKEY_CURRENT_USER",
            Hive::Users => "HKEY_USERS",
            Hive::ClassesRoot => "HKEY_CLASSES_ROOT",
            Hive::CurrentConfig => "HKEY_CURRENT_CONFIG",
        }
    }

    /// Look up a hive by short or long name, case-insensitively
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|hive| {
            name.eq_ignore_ascii_case(hive.abbreviation())
                || name.eq_ignore_ascii_case(hive.long_name())
        })
    }
}

impl Display for Hive {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

/// Identity of a registry key location
#[derive(Debug, Clone)]
pub struct RegistryPath {
    view: View,
    hive: Hive,
    segments: Vec<String>,
    folded: String,
}

impl RegistryPath {
    /// Build a path from already split segments
    #[must_use]
    pub fn new(view: View, hive: Hive, segments: Vec<String>) -> Self {
        let folded = fold(&segments);
        Self {
            view,
            hive,
            segments,
            folded,
        }
    }

    /// Root of a hive
    #[inline]
    #[must_use]
    pub fn hive_root(view: View, hive: Hive) -> Self {
        Self::new(view, hive, Vec::new())
    }

    #[inline]
    #[must_use]
    pub fn view(&self) -> View {
        self.view
    }

    #[inline]
    #[must_use]
    pub fn hive(&self) -> Hive {
        self.hive
    }

    /// Segments as declared
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Segments joined with the canonical separator, without the hive
    #[must_use]
    pub fn subkey(&self) -> String {
        self.segments.join("\\")
    }

    /// Last segment, if this is not a hive root
    #[inline]
    #[must_use]
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    #[inline]
    #[must_use]
    pub fn is_hive_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Parent key, or `None` for a hive root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            None
        } else {
            Some(Self::new(
                self.view,
                self.hive,
                self.segments[..self.segments.len() - 1].to_vec(),
            ))
        }
    }

    /// Child key with one more segment
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::new(self.view, self.hive, segments)
    }

    /// Proper ancestors from nearest to farthest, excluding the hive root
    pub fn ancestors(&self) -> impl Iterator<Item = RegistryPath> + '_ {
        (1..self.segments.len())
            .rev()
            .map(move |len| Self::new(self.view, self.hive, self.segments[..len].to_vec()))
    }

    /// Strict prefix test on the folded identity
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        if self.view != other.view || self.hive != other.hive {
            return false;
        }
        if self.segments.len() >= other.segments.len() {
            return false;
        }
        self.folded.is_empty()
            || (other.folded.starts_with(&self.folded)
                && other.folded[self.folded.len()..].starts_with(SEPARATOR))
    }

    /// Same location in another view
    #[must_use]
    pub fn with_view(&self, view: View) -> Self {
        Self {
            view,
            ..self.clone()
        }
    }

    fn identity(&self) -> (View, Hive, &str) {
        (self.view, self.hive, &self.folded)
    }
}

fn fold(segments: &[String]) -> String {
    segments
        .iter()
        .map(|segment| segment.to_lowercase())
        .collect::<Vec<_>>()
        .join("\\")
}

impl PartialEq for RegistryPath {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for RegistryPath {}

impl Hash for RegistryPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for RegistryPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RegistryPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl Display for RegistryPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.view == View::Redirected32 {
            f.write_str(REDIRECTED_PREFIX)?;
        }
        f.write_str(self.hive.abbreviation())?;
        for segment in &self.segments {
            write!(f, "{SEPARATOR}{segment}")?;
        }
        Ok(())
    }
}

impl RegistryPath {
    /// Spelling with the lowercase hive abbreviation, as used for keys
    /// enumerated from the live registry rather than declared
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        if self.view == View::Redirected32 {
            out.push_str(REDIRECTED_PREFIX);
        }
        out.push_str(&self.hive.abbreviation().to_ascii_lowercase());
        for segment in &self.segments {
            out.push(SEPARATOR);
            out.push_str(segment);
        }
        out
    }
}

impl FromStr for RegistryPath {
    type Err = ParseError;

    /// Parse assuming a 64-bit host and the native default view
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathResolver::default().parse(s)
    }
}

impl Serialize for RegistryPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses raw path strings into normalized [`RegistryPath`] identities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathResolver {
    host: HostArch,
    default_view: View,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(HostArch::X64, View::Native)
    }
}

impl PathResolver {
    #[must_use]
    pub fn new(host: HostArch, default_view: View) -> Self {
        Self { host, default_view }
    }

    #[inline]
    #[must_use]
    pub fn host(&self) -> HostArch {
        self.host
    }

    #[inline]
    #[must_use]
    pub fn default_view(&self) -> View {
        self.default_view
    }

    /// View actually backing `view` on this host
    #[inline]
    #[must_use]
    pub fn effective_view(&self, view: View) -> View {
        if self.host.has_redirected_view() {
            view
        } else {
            View::Native
        }
    }

    /// Re-home a path built elsewhere onto this host's views
    #[must_use]
    pub fn normalize(&self, path: &RegistryPath) -> RegistryPath {
        let view = self.effective_view(path.view());
        if view == path.view() {
            path.clone()
        } else {
            path.with_view(view)
        }
    }

    /// Normalize every path carried by a resource identity
    #[must_use]
    pub fn normalize_id(&self, id: &ResourceId) -> ResourceId {
        match id {
            ResourceId::Key(path) => ResourceId::Key(self.normalize(path)),
            ResourceId::Value { key, name } => ResourceId::Value {
                key: self.normalize(key),
                name: name.clone(),
            },
        }
    }

    /// Parse `["32:"] HIVE ("\" SEGMENT)*`
    ///
    /// Only `\` separates segments; `/` is an ordinary name character.
    /// Runs of separators collapse. A bare hive parses to its root; a hive
    /// followed by separators only is rejected.
    pub fn parse(&self, raw: &str) -> Result<RegistryPath, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Empty);
        }

        let (view, rest) = match strip_prefix_ignore_case(trimmed, REDIRECTED_PREFIX) {
            Some(rest) => (View::Redirected32, rest),
            None => (self.default_view, trimmed),
        };
        if rest.is_empty() {
            return Err(ParseError::MissingHive(raw.to_string()));
        }

        let (hive_name, tail) = match rest.split_once(SEPARATOR) {
            Some((hive, tail)) => (hive, Some(tail)),
            None => (rest, None),
        };
        let hive = Hive::from_name(hive_name).ok_or_else(|| ParseError::UnknownHive {
            hive: hive_name.to_string(),
            raw: raw.to_string(),
        })?;

        let segments: Vec<String> = match tail {
            Some(tail) => {
                let segments: Vec<String> = tail
                    .split(SEPARATOR)
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
                    .collect();
                if segments.is_empty() {
                    return Err(ParseError::EmptyAfterHive(raw.to_string()));
                }
                segments
            }
            None => Vec::new(),
        };

        Ok(RegistryPath::new(self.effective_view(view), hive, segments))
    }

    /// Parse a value path: the last segment names the value and a trailing
    /// doubled separator (`Key\\`) names the key's default value
    pub fn parse_value(&self, raw: &str) -> Result<(RegistryPath, ValueName), ParseError> {
        let trimmed = raw.trim();
        if let Some(key) = trimmed.strip_suffix("\\\\") {
            return Ok((self.parse(key)?, ValueName::default_value()));
        }

        match trimmed.rsplit_once(SEPARATOR) {
            Some((key, name)) if !name.is_empty() => Ok((self.parse(key)?, ValueName::new(name))),
            _ => Err(ParseError::MissingValueName(raw.to_string())),
        }
    }

    /// Parse `Registry_key[<path>]` or `Registry_value[<value path>]`
    pub fn parse_ref(&self, raw: &str) -> Result<ResourceId, ParseError> {
        let trimmed = raw.trim();
        let invalid = || ParseError::InvalidReference(raw.to_string());
        let inner = |prefix: &str| {
            strip_prefix_ignore_case(trimmed, prefix).and_then(|rest| rest.strip_suffix(']'))
        };

        if let Some(path) = inner("Registry_key[") {
            return Ok(ResourceId::Key(self.parse(path)?));
        }
        if let Some(path) = inner("Registry_value[") {
            let (key, name) = self.parse_value(path)?;
            return Ok(ResourceId::Value { key, name });
        }
        Err(invalid())
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
