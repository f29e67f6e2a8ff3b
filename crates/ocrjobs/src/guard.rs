//! Ownership checks applied before any job or result is read or changed.

use uuid::Uuid;

use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied,
}

/// Grants access only to the owner of the resource.
pub fn authorize(resource_owner: Uuid, caller: Uuid) -> Access {
    if resource_owner == caller {
        Access::Allowed
    } else {
        Access::Denied
    }
}

impl Access {
    /// Converts a denial into the same `NotFound` a missing resource produces.
    pub fn or_not_found(self, resource: &'static str, id: Uuid) -> Result<(), JobError> {
        match self {
            Access::Allowed => Ok(()),
            Access::Denied => {
                log::debug!("Ownership check denied access to {} {}", resource, id);
                Err(JobError::not_found(resource, id))
            }
        }
    }
}
