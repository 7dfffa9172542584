//! Device family identification.
//!
//! Every engraver answers the handshake with a two-byte signature that maps
//! to a model. The model is resolved once at connect time and never changes
//! for the life of the session.

use serde::Serialize;

/// Engraver model families known to the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Model {
    OldKbot,
    OldNor,
    OldLit,
    OldBle,
    NewNor,
    NewLit,
    NewBle,
}

impl Model {
    /// Look up a model from the two signature bytes of a handshake reply.
    ///
    /// Returns `None` for any pair outside the known table.
    pub fn from_signature(b2: u8, b3: u8) -> Option<Model> {
        match (b2, b3) {
            (1, 0) => Some(Model::OldBle),
            (1, 10) => Some(Model::NewBle),
            (10, 1) => Some(Model::OldKbot),
            (11, 1) => Some(Model::OldNor),
            (11, 2) => Some(Model::NewNor),
            (13, 1) => Some(Model::OldLit),
            (13, 2) => Some(Model::NewLit),
            _ => None,
        }
    }

    /// Commercial product name for this model family.
    pub fn product_name(&self) -> &'static str {
        match self {
            Model::OldBle | Model::NewBle => "NEJE-BL",
            Model::OldKbot => "K-Bot V3S",
            Model::OldNor | Model::NewNor => "DK-8-KZ",
            Model::OldLit | Model::NewLit => "DK-8-FKZ",
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Model::OldKbot => write!(f, "OLD_KBOT"),
            Model::OldNor => write!(f, "OLD_NOR"),
            Model::OldLit => write!(f, "OLD_LIT"),
            Model::OldBle => write!(f, "OLD_BLE"),
            Model::NewNor => write!(f, "NEW_NOR"),
            Model::NewLit => write!(f, "NEW_LIT"),
            Model::NewBle => write!(f, "NEW_BLE"),
        }
    }
}
