//! Type definitions for destinations and delivery modes

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a resource set is sent to a destination.
///
/// Each mode pairs a [`Protocol`] (which transport carries the data) with a
/// [`DispatchStrategy`] (how the set is cut into transport calls).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardMode {
    /// DICOM C-STORE of the whole set in one association
    Dicom,
    /// DICOM, one association per series
    DicomSeriesBySeries,
    /// DICOMweb STOW-RS, one request per series
    DicomWeb,
    /// DICOMweb, one request per series, oversized series sent instance by instance
    DicomWebSeriesBySeries,
    /// Direct peer-to-peer transfer of the whole set
    Peering,
    /// Accelerated transfer of the whole set
    Transfer,
}

impl ForwardMode {
    pub const ALL: [Self; 6] = [
        Self::Dicom,
        Self::DicomSeriesBySeries,
        Self::DicomWeb,
        Self::DicomWebSeriesBySeries,
        Self::Peering,
        Self::Transfer,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dicom => "dicom",
            Self::DicomSeriesBySeries => "dicom-series-by-series",
            Self::DicomWeb => "dicom-web",
            Self::DicomWebSeriesBySeries => "dicom-web-series-by-series",
            Self::Peering => "peering",
            Self::Transfer => "transfer",
        }
    }

    /// The transport protocol this mode is carried over
    #[must_use]
    pub const fn protocol(self) -> Protocol {
        match self {
            Self::Dicom | Self::DicomSeriesBySeries => Protocol::Dicom,
            Self::DicomWeb | Self::DicomWebSeriesBySeries => Protocol::DicomWeb,
            Self::Peering => Protocol::Peer,
            Self::Transfer => Protocol::Transfer,
        }
    }

    /// How the resource set is split into transport calls
    #[must_use]
    pub const fn strategy(self) -> DispatchStrategy {
        match self {
            Self::Dicom | Self::Peering | Self::Transfer => DispatchStrategy::WholeSet,
            Self::DicomSeriesBySeries | Self::DicomWeb => DispatchStrategy::PerGroup,
            Self::DicomWebSeriesBySeries => DispatchStrategy::PerGroupSplit,
        }
    }
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForwardMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownMode(s.to_string()))
    }
}

impl Serialize for ForwardMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ForwardMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Transport protocols a [`crate::Transport`] can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Dicom,
    DicomWeb,
    Peer,
    Transfer,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dicom => "dicom",
            Self::DicomWeb => "dicom-web",
            Self::Peer => "peer",
            Self::Transfer => "transfer",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStrategy {
    /// One call carrying every item
    WholeSet,
    /// One call per group, each awaited before the next
    PerGroup,
    /// Like `PerGroup`, but groups above the size threshold go one item per call
    PerGroupSplit,
}

/// A system resource sets are forwarded to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Name of the modality, peer or DICOMweb server on the transport side
    pub name: String,

    pub mode: ForwardMode,

    /// Fallback destination name.
    ///
    /// Kept as configuration metadata only: forwarding never switches to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate: Option<String>,
}

impl Destination {
    #[must_use]
    pub fn new(name: impl Into<String>, mode: ForwardMode) -> Self {
        Self {
            name: name.into(),
            mode,
            alternate: None,
        }
    }

    #[must_use]
    pub fn with_alternate(mut self, alternate: impl Into<String>) -> Self {
        self.alternate = Some(alternate.into());
        self
    }
}

/// Granularity at which the event source reports new resource sets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    /// A whole study once it is stable
    #[default]
    Study,
    /// A single series once it is stable
    Series,
    /// Every received instance on its own
    Instance,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Study => "study",
            Self::Series => "series",
            Self::Instance => "instance",
        })
    }
}
