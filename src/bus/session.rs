use serde::{Deserialize, Serialize};

/// Per-session flag kept in the transport's session state.
///
/// Absent state means the session is open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionState {
    #[serde(default, alias = "IsFaulted")]
    pub blocked: bool,
}

impl SessionState {
    pub fn blocked() -> Self {
        Self { blocked: true }
    }

    pub fn from_bytes(bytes: Option<&[u8]>) -> Result<Self, serde_json::Error> {
        match bytes {
            None => Ok(Self::default()),
            Some(b) if b.is_empty() => Ok(Self::default()),
            Some(b) => serde_json::from_slice(b),
        }
    }

    pub fn to_bytes(self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self)
    }
}
