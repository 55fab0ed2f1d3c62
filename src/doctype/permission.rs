use serde::{Deserialize, Serialize};

use super::schema::flag;
use std::fmt;

/// Role that bypasses DocType permission rules.
pub const ADMINISTRATOR: &str = "Administrator";

/// One row of a DocType's permission table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocPerm {
    pub role: String,
    #[serde(default, deserialize_with = "flag")]
    pub read: bool,
    #[serde(default, deserialize_with = "flag")]
    pub write: bool,
    #[serde(default, deserialize_with = "flag")]
    pub create: bool,
    #[serde(default, deserialize_with = "flag")]
    pub delete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermType {
    Read,
    Write,
    Create,
    Delete,
}

impl fmt::Display for PermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermType::Read => "read",
            PermType::Write => "write",
            PermType::Create => "create",
            PermType::Delete => "delete",
        })
    }
}

impl DocPerm {
    fn grants(&self, ptype: PermType) -> bool {
        match ptype {
            PermType::Read => self.read,
            PermType::Write => self.write,
            PermType::Create => self.create,
            PermType::Delete => self.delete,
        }
    }
}

pub fn has_permission(perms: &[DocPerm], role: &str, ptype: PermType) -> bool {
    role == ADMINISTRATOR || perms.iter().any(|p| p.role == role && p.grants(ptype))
}
