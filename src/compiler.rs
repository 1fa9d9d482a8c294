//! GOST v2 configuration compiler.
//!
//! Maps a snapshot of transits and servers to the JSON document the relay
//! service on server A loads. Pure: no I/O, output order follows input order.
//!
//! ```text
//! tcp/udp        ServeNodes: tcp://:<listen>/<dest>:<port>, udp://:<listen>/<dest>:<port>
//! ws/wss/tls     ServeNodes: tcp://:<listen>, udp://:<listen>
//!                ChainNodes: relay+<proto>://<server_b>:<connect_port>
//! ```
//!
//! Transits that reference a missing server or carry an unknown protocol are
//! left out of the document and reported as [`CompileWarning`]s.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Protocol, ServerMap, TransitRecord};

/// Top-level GOST configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(rename = "Debug")]
    pub debug: bool,
    #[serde(rename = "Retries")]
    pub retries: u32,
    #[serde(rename = "Routes")]
    pub routes: Vec<Route>,
}

/// One GOST route: local listeners plus an optional forwarding chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "ServeNodes")]
    pub serve_nodes: Vec<String>,
    #[serde(rename = "ChainNodes", skip_serializing_if = "Option::is_none")]
    pub chain_nodes: Option<Vec<String>>,
}

/// Settings that shape the document but do not come from the registries.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub debug: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { debug: true }
    }
}

/// Why a transit was left out of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarningKind {
    MissingServerA { server_id: i64 },
    MissingServerB { server_id: i64 },
    UnknownProtocol { protocol: String },
}

/// A skipped transit, keyed by transit id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileWarning {
    pub transit_id: i64,
    pub transit_name: String,
    #[serde(flatten)]
    pub kind: WarningKind,
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            WarningKind::MissingServerA { server_id } => write!(
                f,
                "transit {} ('{}'): server A (id {server_id}) not found, skipped",
                self.transit_id, self.transit_name
            ),
            WarningKind::MissingServerB { server_id } => write!(
                f,
                "transit {} ('{}'): server B (id {server_id}) not found, skipped",
                self.transit_id, self.transit_name
            ),
            WarningKind::UnknownProtocol { protocol } => write!(
                f,
                "transit {} ('{}'): unsupported protocol '{protocol}', skipped",
                self.transit_id, self.transit_name
            ),
        }
    }
}

/// Result of [`compile`].
#[derive(Debug, Clone, Serialize)]
pub struct Compiled {
    pub document: ConfigDocument,
    /// Ids of transits that produced a route, in route order.
    pub included: Vec<i64>,
    pub warnings: Vec<CompileWarning>,
}

/// Build the GOST document for `transits`, resolving servers through `servers`.
pub fn compile(
    transits: &[TransitRecord],
    servers: &ServerMap,
    options: CompileOptions,
) -> Compiled {
    let mut routes = Vec::with_capacity(transits.len());
    let mut included = Vec::with_capacity(transits.len());
    let mut warnings = Vec::new();

    for transit in transits {
        match compile_route(transit, servers) {
            Ok(route) => {
                routes.push(route);
                included.push(transit.id);
            }
            Err(kind) => {
                let warning = CompileWarning {
                    transit_id: transit.id,
                    transit_name: transit.name.clone(),
                    kind,
                };
                warn!("{warning}");
                warnings.push(warning);
            }
        }
    }

    Compiled {
        document: ConfigDocument {
            debug: options.debug,
            retries: 0,
            routes,
        },
        included,
        warnings,
    }
}

fn compile_route(transit: &TransitRecord, servers: &ServerMap) -> Result<Route, WarningKind> {
    if !servers.contains_key(&transit.server_a_id) {
        return Err(WarningKind::MissingServerA {
            server_id: transit.server_a_id,
        });
    }
    // Direct forwards never use server B, but the transit still names one.
    let Some(server_b) = servers.get(&transit.server_b_id) else {
        return Err(WarningKind::MissingServerB {
            server_id: transit.server_b_id,
        });
    };
    let Some(protocol) = Protocol::parse(&transit.encryption_protocol) else {
        return Err(WarningKind::UnknownProtocol {
            protocol: transit.encryption_protocol.clone(),
        });
    };

    let listen = transit.server_a_listen_port;
    let route = match protocol.chain_scheme() {
        None => {
            let target = format!("{}:{}", transit.destination_ip, transit.destination_port);
            Route {
                serve_nodes: vec![
                    format!("tcp://:{listen}/{target}"),
                    format!("udp://:{listen}/{target}"),
                ],
                chain_nodes: None,
            }
        }
        Some(scheme) => Route {
            serve_nodes: vec![format!("tcp://:{listen}"), format!("udp://:{listen}")],
            chain_nodes: Some(vec![format!(
                "{scheme}://{}:{}",
                server_b.ip_address, transit.server_b_connect_port
            )]),
        },
    };
    Ok(route)
}

impl ConfigDocument {
    /// Serialize with 4-space indentation, the layout GOST installs ship with.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        let mut buf = Vec::with_capacity(256);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        // serde_json only emits valid UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
