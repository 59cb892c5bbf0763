//! Actor roles for display grouping.
//!
//! Roles never take part in authorization. They only sort the shared-with
//! list into hospitals and doctors on the audit surface.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use medledger_core::ActorId;

/// What kind of party an actor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Patient,
    Lab,
    Hospital,
    Doctor,
}

impl Role {
    /// Guess a role from the conventional identifier prefix.
    pub fn from_prefix(actor: &ActorId) -> Option<Self> {
        let (prefix, _) = actor.as_str().split_once('-')?;
        match prefix.to_ascii_uppercase().as_str() {
            "PAT" => Some(Role::Patient),
            "LAB" => Some(Role::Lab),
            "HOSP" => Some(Role::Hospital),
            "DOC" => Some(Role::Doctor),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "PAT",
            Role::Lab => "LAB",
            Role::Hospital => "HOSP",
            Role::Doctor => "DOC",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known actor roles, with prefix fallback for unregistered actors.
#[derive(Debug, Clone, Default)]
pub struct RoleDirectory {
    roles: HashMap<ActorId, Role>,
}

impl RoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the role of `actor`.
    pub fn register(&mut self, actor: impl Into<ActorId>, role: Role) {
        self.roles.insert(actor.into(), role);
    }

    /// The registered role, else the prefix guess.
    pub fn role_of(&self, actor: &ActorId) -> Option<Role> {
        self.roles
            .get(actor)
            .copied()
            .or_else(|| Role::from_prefix(actor))
    }

    /// Split an access set by role.
    pub fn group<'a>(&self, actors: impl IntoIterator<Item = &'a ActorId>) -> SharedWith {
        let mut grouped = SharedWith::default();
        for actor in actors {
            let bucket = match self.role_of(actor) {
                Some(Role::Hospital) => &mut grouped.hospitals,
                Some(Role::Doctor) => &mut grouped.doctors,
                _ => &mut grouped.others,
            };
            bucket.insert(actor.clone());
        }
        grouped
    }
}

/// An effective access set grouped for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedWith {
    pub hospitals: BTreeSet<ActorId>,
    pub doctors: BTreeSet<ActorId>,
    pub others: BTreeSet<ActorId>,
}

impl SharedWith {
    pub fn is_empty(&self) -> bool {
        self.hospitals.is_empty() && self.doctors.is_empty() && self.others.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hospitals.len() + self.doctors.len() + self.others.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_fallback() {
        assert_eq!(Role::from_prefix(&ActorId::from("HOSP-01")), Some(Role::Hospital));
        assert_eq!(Role::from_prefix(&ActorId::from("doc-7A2F")), Some(Role::Doctor));
        assert_eq!(Role::from_prefix(&ActorId::from("PAT-123")), Some(Role::Patient));
        assert_eq!(Role::from_prefix(&ActorId::from("clinic")), None);
        assert_eq!(Role::from_prefix(&ActorId::from("XYZ-1")), None);
    }

    #[test]
    fn test_registered_role_wins() {
        let mut dir = RoleDirectory::new();
        dir.register("HOSP-99", Role::Doctor);
        assert_eq!(dir.role_of(&ActorId::from("HOSP-99")), Some(Role::Doctor));
        assert_eq!(dir.role_of(&ActorId::from("HOSP-01")), Some(Role::Hospital));
    }

    #[test]
    fn test_group() {
        let mut dir = RoleDirectory::new();
        dir.register("clinic-north", Role::Hospital);

        let actors: BTreeSet<ActorId> = ["HOSP-02", "DOC-01", "clinic-north", "ACME"]
            .into_iter()
            .map(ActorId::from)
            .collect();
        let grouped = dir.group(&actors);

        assert_eq!(grouped.len(), 4);
        assert_eq!(
            grouped.hospitals.iter().map(ActorId::as_str).collect::<Vec<_>>(),
            vec!["HOSP-02", "clinic-north"]
        );
        assert_eq!(grouped.doctors.len(), 1);
        assert!(grouped.others.contains(&ActorId::from("ACME")));

        let json = serde_json::to_value(&grouped).unwrap();
        assert_eq!(json["doctors"][0], "DOC-01");
    }
}
