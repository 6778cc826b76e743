//! Connection candidates produced by the resolver.

use std::fmt;

use berth_config::{EndpointKind, EngineEndpoint};

/// Where a candidate endpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorSource {
    /// Explicit address supplied by the caller.
    Override,
    /// Environment variable with this name.
    Environment(&'static str),
    /// The platform's default engine address.
    PlatformDefault,
    /// A well-known alternate engine address.
    Alternate,
}

impl fmt::Display for DescriptorSource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => formatter.write_str("override"),
            Self::Environment(variable) => write!(formatter, "${variable}"),
            Self::PlatformDefault => formatter.write_str("platform default"),
            Self::Alternate => formatter.write_str("alternate"),
        }
    }
}

/// One endpoint the resolver will try, in ascending `priority` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// Transport family.
    pub kind: EndpointKind,
    /// Full endpoint address.
    pub endpoint: EngineEndpoint,
    /// Position in the trial order; 0 is tried first.
    pub priority: u32,
    /// Origin of the candidate.
    pub source: DescriptorSource,
}

impl ChannelDescriptor {
    /// Describes `endpoint` at the given priority.
    #[must_use]
    pub fn new(endpoint: EngineEndpoint, priority: u32, source: DescriptorSource) -> Self {
        Self {
            kind: endpoint.kind(),
            endpoint,
            priority,
            source,
        }
    }

    /// Raw address: a socket path, a pipe path or `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        self.endpoint.address()
    }
}

impl fmt::Display for ChannelDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} ({})", self.endpoint, self.source)
    }
}
