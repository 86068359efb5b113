//! Endpoint resolution
//!
//! Every request goes to one of three well-known servers. Engine-control
//! calls always hit the control-plane port; everything else goes to the
//! candidate (primary) or the reference (non-primary) server.

use std::fmt;

/// Method prefix reserved for consensus/engine-control calls
pub const CONTROL_PLANE_PREFIX: &str = "engine_";

/// Default host for all three servers
pub const DEFAULT_HOST: &str = "localhost";

/// Default candidate server port
pub const DEFAULT_CANDIDATE_PORT: u16 = 51515;

/// Default reference server port
pub const DEFAULT_REFERENCE_PORT: u16 = 8545;

/// Default control-plane port
pub const DEFAULT_CONTROL_PORT: u16 = 8550;

/// Server role a request is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Candidate,
    Reference,
    ControlPlane,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Candidate => write!(f, "candidate"),
            Target::Reference => write!(f, "reference"),
            Target::ControlPlane => write!(f, "control-plane"),
        }
    }
}

/// Pick the target for `method`
pub fn resolve(method: &str, primary: bool) -> Target {
    if method.starts_with(CONTROL_PLANE_PREFIX) {
        Target::ControlPlane
    } else if primary {
        Target::Candidate
    } else {
        Target::Reference
    }
}

/// Network addresses of the three servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub host: String,
    pub candidate_port: u16,
    pub reference_port: u16,
    pub control_port: u16,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            candidate_port: DEFAULT_CANDIDATE_PORT,
            reference_port: DEFAULT_REFERENCE_PORT,
            control_port: DEFAULT_CONTROL_PORT,
        }
    }
}

impl Endpoints {
    /// Port serving `target`
    pub fn port(&self, target: Target) -> u16 {
        match target {
            Target::Candidate => self.candidate_port,
            Target::Reference => self.reference_port,
            Target::ControlPlane => self.control_port,
        }
    }

    /// HTTP URL for `target`
    pub fn url(&self, target: Target) -> String {
        format!("http://{}:{}", self.host, self.port(target))
    }

    /// Resolve `method` straight to a URL
    pub fn url_for(&self, method: &str, primary: bool) -> String {
        self.url(resolve(method, primary))
    }
}
