//! The fixed (host, guest, mechanism) catalog and its config-driven filter.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::{BenchError, BenchResult};

/// A language that can act as host or guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Go,
    Python3,
    Java,
}

impl Lang {
    pub const ALL: [Lang; 3] = [Lang::Go, Lang::Python3, Lang::Java];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Go => "go",
            Lang::Python3 => "python3",
            Lang::Java => "java",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lang {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "go" => Ok(Lang::Go),
            "python3" => Ok(Lang::Python3),
            "java" => Ok(Lang::Java),
            other => Err(BenchError::Config(format!(
                "unsupported language '{other}' (allowed: go, python3, java)"
            ))),
        }
    }
}

/// The call pathway under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    Metaffi,
    Grpc,
    Cpython,
    Ctypes,
    Jep,
    Jni,
    Jpype,
}

impl Mechanism {
    /// Every mechanism appearing in the catalog, sorted by name.
    pub const ALL: [Mechanism; 7] = [
        Mechanism::Cpython,
        Mechanism::Ctypes,
        Mechanism::Grpc,
        Mechanism::Jep,
        Mechanism::Jni,
        Mechanism::Jpype,
        Mechanism::Metaffi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::Metaffi => "metaffi",
            Mechanism::Grpc => "grpc",
            Mechanism::Cpython => "cpython",
            Mechanism::Ctypes => "ctypes",
            Mechanism::Jep => "jep",
            Mechanism::Jni => "jni",
            Mechanism::Jpype => "jpype",
        }
    }

    /// The fixed native binding for a host/guest pair.
    pub fn native_for(host: Lang, guest: Lang) -> Option<Mechanism> {
        match (host, guest) {
            (Lang::Go, Lang::Python3) => Some(Mechanism::Cpython),
            (Lang::Go, Lang::Java) => Some(Mechanism::Jni),
            (Lang::Python3, Lang::Go) => Some(Mechanism::Ctypes),
            (Lang::Python3, Lang::Java) => Some(Mechanism::Jpype),
            (Lang::Java, Lang::Go) => Some(Mechanism::Jni),
            (Lang::Java, Lang::Python3) => Some(Mechanism::Jep),
            _ => None,
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mechanism {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        Mechanism::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == norm)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Mechanism::ALL.iter().map(|m| m.as_str()).collect();
                BenchError::Config(format!(
                    "unsupported mechanism '{}' (allowed: {})",
                    s.trim(),
                    allowed.join(", ")
                ))
            })
    }
}

/// One test target: `host` calling into `guest` through `mechanism`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub host: Lang,
    pub guest: Lang,
    pub mechanism: Mechanism,
}

impl Triple {
    pub const fn new(host: Lang, guest: Lang, mechanism: Mechanism) -> Self {
        Triple { host, guest, mechanism }
    }

    /// Key used inside the resume ledger.
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.host, self.guest, self.mechanism)
    }

    /// File name of both raw and canonical result documents.
    pub fn result_filename(&self) -> String {
        format!("{}_to_{}_{}.json", self.host, self.guest, self.mechanism)
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{} [{}]", self.host, self.guest, self.mechanism)
    }
}

/// The full catalog: for each host, for each guest != host, the managed FFI
/// layer, the pair's native binding and gRPC, in that order.
pub fn catalog() -> &'static [Triple] {
    static CATALOG: OnceLock<Vec<Triple>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        let mut triples = Vec::with_capacity(18);
        for host in Lang::ALL {
            for guest in Lang::ALL {
                if host == guest {
                    continue;
                }
                triples.push(Triple::new(host, guest, Mechanism::Metaffi));
                if let Some(native) = Mechanism::native_for(host, guest) {
                    triples.push(Triple::new(host, guest, native));
                }
                triples.push(Triple::new(host, guest, Mechanism::Grpc));
            }
        }
        triples
    })
}

/// Parse a `host:guest` allow-list entry.
pub fn parse_pair(pair: &str) -> BenchResult<(Lang, Lang)> {
    let parts: Vec<&str> = pair.split(':').collect();
    if parts.len() != 2 {
        return Err(BenchError::Config(format!(
            "invalid pair '{pair}', expected host:guest"
        )));
    }
    let host: Lang = parts[0].parse().map_err(|_| invalid_pair(pair))?;
    let guest: Lang = parts[1].parse().map_err(|_| invalid_pair(pair))?;
    if host == guest {
        return Err(invalid_pair(pair));
    }
    Ok((host, guest))
}

fn invalid_pair(pair: &str) -> BenchError {
    BenchError::Config(format!(
        "invalid pair '{pair}', allowed hosts are go, python3, java and host != guest"
    ))
}

/// Filter the catalog. An empty selection is an error, not a no-op.
pub fn select_triples(
    hosts: &[Lang],
    pairs: &[(Lang, Lang)],
    mechanisms: &[Mechanism],
) -> BenchResult<Vec<Triple>> {
    let selected: Vec<Triple> = catalog()
        .iter()
        .copied()
        .filter(|t| hosts.contains(&t.host))
        .filter(|t| pairs.is_empty() || pairs.contains(&(t.host, t.guest)))
        .filter(|t| mechanisms.contains(&t.mechanism))
        .collect();

    if selected.is_empty() {
        return Err(BenchError::Config("no triples selected by config".into()));
    }
    Ok(selected)
}
