use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Field quantities that can be back-transformed. The order of `FieldKind::ALL`
/// is the component order of every cell-centred source array.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Ex,
    Ey,
    Ez,
    Bx,
    By,
    Bz,
    Jx,
    Jy,
    Jz,
    Rho,
}

impl FieldKind {
    pub const ALL: [FieldKind; 10] = [
        FieldKind::Ex,
        FieldKind::Ey,
        FieldKind::Ez,
        FieldKind::Bx,
        FieldKind::By,
        FieldKind::Bz,
        FieldKind::Jx,
        FieldKind::Jy,
        FieldKind::Jz,
        FieldKind::Rho,
    ];

    pub const NCOMP: usize = 10;

    /// Parses the user-facing variable name (`Ex`, ..., `jz`, `rho`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Ex" => Some(FieldKind::Ex),
            "Ey" => Some(FieldKind::Ey),
            "Ez" => Some(FieldKind::Ez),
            "Bx" => Some(FieldKind::Bx),
            "By" => Some(FieldKind::By),
            "Bz" => Some(FieldKind::Bz),
            "jx" => Some(FieldKind::Jx),
            "jy" => Some(FieldKind::Jy),
            "jz" => Some(FieldKind::Jz),
            "rho" => Some(FieldKind::Rho),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Ex => "Ex",
            FieldKind::Ey => "Ey",
            FieldKind::Ez => "Ez",
            FieldKind::Bx => "Bx",
            FieldKind::By => "By",
            FieldKind::Bz => "Bz",
            FieldKind::Jx => "jx",
            FieldKind::Jy => "jy",
            FieldKind::Jz => "jz",
            FieldKind::Rho => "rho",
        }
    }

    /// Component index inside a cell-centred source array.
    pub fn source_component(&self) -> usize {
        *self as usize
    }
}

/// Output variables resolved once at startup into `(kind, source component)` pairs.
/// Output component `n` of every chunk is `entries[n]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDispatch {
    pub entries: Vec<(FieldKind, usize)>,
}

impl FieldDispatch {
    pub fn resolve(names: &[String]) -> Result<Self> {
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let kind = FieldKind::from_name(name).ok_or_else(|| {
                anyhow::anyhow!(
                    "Field variable '{}' is not supported for back-transformed output. Supported: Ex, Ey, Ez, Bx, By, Bz, jx, jy, jz, rho",
                    name
                )
            })?;
            if entries.iter().any(|(k, _)| *k == kind) {
                anyhow::bail!("Field variable '{}' requested more than once.", name);
            }
            entries.push((kind, kind.source_component()));
        }
        Ok(FieldDispatch { entries })
    }

    pub fn ncomp(&self) -> usize {
        self.entries.len()
    }

    pub fn var_names(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
